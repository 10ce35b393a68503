//! Classification of inbound chat text.

use lazy_regex::regex;

/// Words that make the bot answer with the chat's identifiers
pub const TRIGGER_WORDS: [&str; 2] = ["ботяра", "bot_health"];

/// URL fragments the bot downloads from without `**`
pub const SUPPORTED_SITES: [&str; 6] = [
    "instagram.com/",
    "tiktok.com/",
    "reddit.com/",
    "x.com/",
    "youtube.com/shorts",
    "facebook.com/reel",
];

/// What an inbound text asks for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// A trigger word: reply with a canned line and the identifiers
    HealthCheck,
    /// Download `url`
    Download {
        /// First `http(s)://` token of the message
        url: String,
        /// Prefixed with `**`, so the site list is bypassed
        forced: bool,
    },
    /// A URL of a site that is not on the list
    UnsupportedSite,
    /// Nothing for the bot
    Ignore,
}

/// Classify a message text.
#[must_use]
pub fn classify(text: &str) -> Inbound {
    let text = text.trim();

    let triggered = text
        .split_whitespace()
        .any(|word| TRIGGER_WORDS.contains(&word.to_lowercase().as_str()));
    if triggered {
        return Inbound::HealthCheck;
    }

    if !text.contains("http") {
        return Inbound::Ignore;
    }

    let text = text.replace("** ", "**");
    let Some(caps) = regex!(r"(\*\*)?(https?://\S+)").captures(&text) else {
        return Inbound::Ignore;
    };
    let forced = caps.get(1).is_some();
    let url = caps.get(2).map_or("", |m| m.as_str()).to_string();

    if forced || SUPPORTED_SITES.iter().any(|site| url.contains(site)) {
        Inbound::Download { url, forced }
    } else {
        Inbound::UnsupportedSite
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn download(url: &str, forced: bool) -> Inbound {
        Inbound::Download {
            url: url.to_string(),
            forced,
        }
    }

    #[test]
    fn test_trigger_words_any_case() {
        assert_eq!(classify("привіт Ботяра"), Inbound::HealthCheck);
        assert_eq!(classify("  BOT_HEALTH "), Inbound::HealthCheck);
        // Only whole words count
        assert_eq!(classify("ботяраааа"), Inbound::Ignore);
    }

    #[test]
    fn test_supported_site() {
        assert_eq!(
            classify("look https://www.tiktok.com/@a/video/1 lol"),
            download("https://www.tiktok.com/@a/video/1", false)
        );
        assert_eq!(
            classify("https://www.youtube.com/shorts/abc"),
            download("https://www.youtube.com/shorts/abc", false)
        );
    }

    #[test]
    fn test_unsupported_site() {
        assert_eq!(
            classify("https://vimeo.com/12345"),
            Inbound::UnsupportedSite
        );
        assert_eq!(
            classify("https://www.youtube.com/watch?v=1"),
            Inbound::UnsupportedSite
        );
    }

    #[test]
    fn test_forced_prefix_with_and_without_space() {
        assert_eq!(
            classify("**https://vimeo.com/12345"),
            download("https://vimeo.com/12345", true)
        );
        assert_eq!(
            classify("** https://vimeo.com/1"),
            download("https://vimeo.com/1", true)
        );
    }

    #[test]
    fn test_plain_text_is_ignored() {
        assert_eq!(classify("hello there"), Inbound::Ignore);
        assert_eq!(classify("http is a protocol"), Inbound::Ignore);
        assert_eq!(classify(""), Inbound::Ignore);
    }
}
