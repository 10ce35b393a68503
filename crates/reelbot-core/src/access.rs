//! Access policy: who may submit download jobs.

use crate::config::{normalize_username, AppSettings};
use crate::error::JobError;
use std::collections::HashSet;

/// Allow-lists loaded once at startup
#[derive(Debug, Clone, Default)]
pub struct AccessRule {
    allowed_usernames: HashSet<String>,
    allowed_chat_ids: HashSet<i64>,
    enabled: bool,
}

impl AccessRule {
    /// Create a rule from explicit lists. Usernames are normalized.
    #[must_use]
    pub fn new<I, S>(usernames: I, chat_ids: impl IntoIterator<Item = i64>, enabled: bool) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            allowed_usernames: usernames
                .into_iter()
                .map(|name| normalize_username(name.as_ref()))
                .collect(),
            allowed_chat_ids: chat_ids.into_iter().collect(),
            enabled,
        }
    }

    /// Build the rule from the loaded settings
    #[must_use]
    pub fn from_settings(settings: &AppSettings) -> Self {
        Self {
            allowed_usernames: settings.allowed_usernames(),
            allowed_chat_ids: settings.allowed_chat_ids(),
            enabled: settings.access_limited(),
        }
    }

    /// Whether the allow-lists are enforced
    #[must_use]
    pub const fn enabled(&self) -> bool {
        self.enabled
    }

    /// Decide whether `(username, chat_id)` may submit jobs.
    ///
    /// A disabled rule allows everyone. An allowed chat grants access to every
    /// member regardless of username; otherwise the username must be listed.
    ///
    /// # Errors
    ///
    /// Returns `JobError::AccessDenied` carrying the caller's identifiers.
    pub fn evaluate(&self, username: Option<&str>, chat_id: i64) -> Result<(), JobError> {
        if !self.enabled || self.allowed_chat_ids.contains(&chat_id) {
            return Ok(());
        }

        let listed = username
            .map(normalize_username)
            .is_some_and(|name| !name.is_empty() && self.allowed_usernames.contains(&name));
        if listed {
            return Ok(());
        }

        Err(JobError::AccessDenied {
            username: username.map(str::to_string),
            chat_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule() -> AccessRule {
        AccessRule::new(["@Alice", "bob"], [-100_500], true)
    }

    #[test]
    fn test_allowed_chat_wins_over_unknown_user() {
        assert!(rule().evaluate(Some("mallory"), -100_500).is_ok());
        assert!(rule().evaluate(None, -100_500).is_ok());
    }

    #[test]
    fn test_username_match_is_normalized() {
        assert!(rule().evaluate(Some("alice"), 1).is_ok());
        assert!(rule().evaluate(Some("@BOB"), 1).is_ok());
    }

    #[test]
    fn test_denial_carries_identifiers() {
        let Err(err) = rule().evaluate(Some("mallory"), 42) else {
            panic!("expected denial");
        };
        assert_eq!(
            err,
            JobError::AccessDenied {
                username: Some("mallory".to_string()),
                chat_id: 42
            }
        );
    }

    #[test]
    fn test_missing_username_is_denied() {
        assert!(rule().evaluate(None, 42).is_err());
        assert!(rule().evaluate(Some(""), 42).is_err());
    }

    #[test]
    fn test_from_settings() {
        let settings = AppSettings {
            limit_bot_access_str: Some("True".to_string()),
            allowed_usernames_str: Some("carol".to_string()),
            allowed_chat_ids_str: Some("7".to_string()),
            ..AppSettings::default()
        };
        let rule = AccessRule::from_settings(&settings);
        assert!(rule.enabled());
        assert!(rule.evaluate(Some("Carol"), 1).is_ok());
        assert!(rule.evaluate(Some("dave"), 7).is_ok());
        assert!(rule.evaluate(Some("dave"), 8).is_err());
    }
}
