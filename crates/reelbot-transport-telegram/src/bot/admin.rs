//! Error reports sent to the bot admins.

use crate::bot::resilient::send_message_resilient;
use crate::config::TelegramSettings;
use html_escape::encode_text;
use reelbot_core::error::JobError;
use teloxide::prelude::*;
use teloxide::types::{ChatId, ParseMode};
use tracing::{debug, warn};

/// Forwards unexpected job errors to the admin chats
#[derive(Debug, Clone, Default)]
pub struct AdminNotifier {
    chat_ids: Vec<i64>,
}

impl AdminNotifier {
    /// Enabled only with `SEND_ERROR_TO_ADMIN` and at least one admin chat
    #[must_use]
    pub fn from_settings(settings: &TelegramSettings) -> Self {
        let chat_ids = if settings.send_error_to_admin {
            settings.admin_chat_ids()
        } else {
            Vec::new()
        };
        Self { chat_ids }
    }

    /// Whether reports are sent at all
    #[must_use]
    pub fn enabled(&self) -> bool {
        !self.chat_ids.is_empty()
    }

    /// Report `error` to every admin chat. Failures are logged only.
    pub async fn notify(&self, bot: &Bot, error: &JobError, username: Option<&str>, url: &str) {
        if !self.enabled() {
            debug!("Admin chat IDs are not set; error report not sent");
            return;
        }

        let text = report_text(error, username, url);
        for &chat_id in &self.chat_ids {
            let sent =
                send_message_resilient(bot, ChatId(chat_id), text.clone(), Some(ParseMode::Html));
            if let Err(e) = sent.await {
                warn!(admin_chat_id = chat_id, error = %e, "Failed to report error to admin");
            }
        }
    }
}

fn report_text(error: &JobError, username: Option<&str>, url: &str) -> String {
    format!(
        "<code>{}</code>\n\nWho triggered the error: <code>@{}</code>\nUrl was {}",
        encode_text(&error.to_string()),
        encode_text(username.unwrap_or("unknown")),
        encode_text(url)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_without_flag() {
        let settings = TelegramSettings {
            admins_chat_ids_str: Some("1,2".to_string()),
            send_error_to_admin: false,
            ..TelegramSettings::default()
        };
        assert!(!AdminNotifier::from_settings(&settings).enabled());
    }

    #[test]
    fn test_enabled_with_flag_and_ids() {
        let settings = TelegramSettings {
            admins_chat_ids_str: Some("1, 2".to_string()),
            send_error_to_admin: true,
            ..TelegramSettings::default()
        };
        assert!(AdminNotifier::from_settings(&settings).enabled());
    }

    #[test]
    fn test_report_is_escaped() {
        let text = report_text(
            &JobError::DownloadFailed("<bad>".to_string()),
            Some("alice"),
            "https://x.com/a?b=1&c=2",
        );
        assert!(text.contains("download failed: &lt;bad&gt;"));
        assert!(text.contains("@alice"));
        assert!(text.contains("b=1&amp;c=2"));
    }
}
