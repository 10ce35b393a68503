//! Localized user-facing texts and the canned replies to the health keyword.

use rand::seq::IndexedRandom;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

/// Reply language
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Language {
    /// Ukrainian
    #[default]
    Ua,
    /// English
    En,
}

impl Language {
    /// Parse a language code; anything that is not English falls back to Ukrainian.
    ///
    /// Accepts locale-like values such as `en_US.UTF-8`.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        if code.trim().to_lowercase().starts_with("en") {
            Self::En
        } else {
            Self::Ua
        }
    }

    /// Short code used in file names
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Ua => "ua",
            Self::En => "en",
        }
    }
}

/// Fixed texts the bot sends outside of job errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Text {
    /// Site is not in the supported list
    UnsupportedSite,
    /// Job is waiting for a worker
    Queued,
    /// Usage shown on `/start`
    Welcome,
    /// Sending media failed
    SendFailed,
    /// Answer to `/cancel`
    CancelledJobs,
}

/// Render a fixed text. `arg` fills the single placeholder some texts have.
#[must_use]
pub fn text(language: Language, which: Text, arg: &str) -> String {
    match (language, which) {
        (Language::Ua, Text::UnsupportedSite) => {
            "Цей сайт не підтримується. Спробуйте додати ** перед https://".to_string()
        }
        (Language::En, Text::UnsupportedSite) => {
            "This site is not supported. Try adding ** before the https://".to_string()
        }
        (Language::Ua, Text::Queued) => format!("⏳ Завантаження в черзі (позиція {arg})."),
        (Language::En, Text::Queued) => format!("⏳ Download queued (position {arg})."),
        (Language::Ua, Text::Welcome) => "👋 Надішліть посилання на Instagram Reels, TikTok, \
             Reddit, X, YouTube Shorts або Facebook Reels, і я поверну відео сюди.\n\
             Для інших сайтів додайте ** перед https://"
            .to_string(),
        (Language::En, Text::Welcome) => "👋 Send me a link to Instagram Reels, TikTok, \
             Reddit, X, YouTube Shorts or Facebook Reels and I will post the video here.\n\
             For other sites put ** before the https://"
            .to_string(),
        (Language::Ua, Text::SendFailed) => {
            format!("Помилка надсилання: {arg}. Спробуйте пізніше.")
        }
        (Language::En, Text::SendFailed) => {
            format!("Error sending media: {arg}. Please try again later.")
        }
        (Language::Ua, Text::CancelledJobs) => format!("Скасовано завдань: {arg}"),
        (Language::En, Text::CancelledJobs) => format!("Cancelled jobs: {arg}"),
    }
}

#[derive(Deserialize)]
struct ResponsesFile {
    responses: Vec<String>,
}

/// Canned replies picked at random when the bot is mentioned
#[derive(Debug, Clone)]
pub struct ResponseBook {
    language: Language,
    responses: Vec<String>,
}

impl ResponseBook {
    /// Load `responses_<lang>.json` from `dir`, falling back to a built-in line.
    #[must_use]
    pub fn load(dir: &Path, language: Language) -> Self {
        let path = dir.join(format!("responses_{}.json", language.code()));
        let responses = match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str::<ResponsesFile>(&raw) {
                Ok(file) => file.responses,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "Malformed responses file");
                    Vec::new()
                }
            },
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Responses file not readable");
                Vec::new()
            }
        };
        Self::from_responses(language, responses)
    }

    /// Build a book from an in-memory list
    #[must_use]
    pub fn from_responses(language: Language, responses: Vec<String>) -> Self {
        Self {
            language,
            responses,
        }
    }

    /// Language of the book
    #[must_use]
    pub const fn language(&self) -> Language {
        self.language
    }

    /// Pick a random response
    #[must_use]
    pub fn pick(&self) -> &str {
        self.responses
            .choose(&mut rand::rng())
            .map_or_else(|| fallback(self.language), String::as_str)
    }
}

const fn fallback(language: Language) -> &'static str {
    match language {
        Language::Ua => "Вибачте, у мене проблеми із завантаженням відповідей! 😅",
        Language::En => "Sorry, I'm having trouble loading my responses right now! 😅",
    }
}
