//! Text replies with automatic retry on transient Telegram API failures.
//!
//! Media uploads do not go through here: a failed upload is reported to the
//! chat instead of being sent again.

use anyhow::Result;
use reelbot_core::utils::{retry_transport_operation, truncate_str};
use teloxide::prelude::*;
use teloxide::types::{ChatId, Message, ParseMode};

/// Telegram rejects longer messages
const MAX_MESSAGE_CHARS: usize = 4000;

/// Send a text message, retrying with exponential backoff.
///
/// Text longer than Telegram allows is truncated.
///
/// # Errors
///
/// Returns the last error after all retries are exhausted.
///
/// ```ignore
/// send_message_resilient(&bot, chat_id, "⏳ Queued", None).await?;
/// ```
pub async fn send_message_resilient(
    bot: &Bot,
    chat_id: ChatId,
    text: impl Into<String>,
    parse_mode: Option<ParseMode>,
) -> Result<Message> {
    let text = text.into();
    let text = if text.chars().count() > MAX_MESSAGE_CHARS {
        format!("{}...", truncate_str(&text, MAX_MESSAGE_CHARS))
    } else {
        text
    };

    retry_transport_operation(|| async {
        let mut req = bot.send_message(chat_id, text.clone());
        if let Some(pm) = parse_mode {
            req = req.parse_mode(pm);
        }
        req.await
            .map_err(|e| anyhow::anyhow!("Telegram send error: {e}"))
    })
    .await
}
