//! Uploading a finished job's media to the chat.

use crate::bot::resilient::send_message_resilient;
use reelbot_core::config::THROTTLE_DELAY_SECS;
use reelbot_core::delivery::{ensure_within_ceiling, Artifact, MediaBatch, MediaFile, MediaKind};
use reelbot_core::error::JobError;
use reelbot_core::responses::{text, Language, Text};
use std::time::Duration;
use teloxide::prelude::*;
use teloxide::types::{ChatId, InputFile, InputMedia, InputMediaPhoto, InputMediaVideo};
use tracing::{debug, info, warn};

/// Upload everything in the artifact's plan.
///
/// Dropped files are announced first. Every file is measured again right
/// before its upload; anything above `ceiling` is skipped. Upload failures
/// are reported to the chat and not retried.
pub async fn deliver(
    bot: &Bot,
    chat_id: ChatId,
    artifact: &Artifact,
    spoiler: bool,
    ceiling: u64,
    language: Language,
) {
    let plan = artifact.plan();
    for notice in &plan.notices {
        notify(bot, chat_id, notice.user_message(language)).await;
    }

    let total = plan.batches.len();
    for (index, batch) in plan.batches.iter().enumerate() {
        let (files, rejected) = recheck(&batch.files, ceiling).await;
        for error in rejected {
            notify(bot, chat_id, error.user_message(language)).await;
        }

        let sent = match files.as_slice() {
            [] => Ok(()),
            [file] => send_single(bot, chat_id, file, spoiler && !batch.is_group()).await,
            _ => send_group(bot, chat_id, batch, &files).await,
        };
        if let Err(e) = sent {
            warn!(chat_id = chat_id.0, error = %e, "Failed to upload media");
            notify(bot, chat_id, text(language, Text::SendFailed, &e.to_string())).await;
        }

        if plan.throttle && index + 1 < total {
            debug!(delay_secs = THROTTLE_DELAY_SECS, "Throttling between uploads");
            tokio::time::sleep(Duration::from_secs(THROTTLE_DELAY_SECS)).await;
        }
    }
    info!(chat_id = chat_id.0, batches = total, "Delivery finished");
}

async fn notify(bot: &Bot, chat_id: ChatId, message: String) {
    if let Err(e) = send_message_resilient(bot, chat_id, message, None).await {
        warn!(chat_id = chat_id.0, error = %e, "Failed to send message");
    }
}

/// Measure files again and split them into uploadable and rejected.
async fn recheck(files: &[MediaFile], ceiling: u64) -> (Vec<&MediaFile>, Vec<JobError>) {
    let mut accepted = Vec::with_capacity(files.len());
    let mut rejected = Vec::new();
    for file in files {
        let checked = match tokio::fs::metadata(&file.path).await {
            Ok(meta) => ensure_within_ceiling(meta.len(), ceiling),
            Err(e) => Err(JobError::DownloadFailed(format!("media file vanished: {e}"))),
        };
        match checked {
            Ok(()) => accepted.push(file),
            Err(e) => {
                warn!(path = %file.path.display(), reason = %e, "Skipping upload");
                rejected.push(e);
            }
        }
    }
    (accepted, rejected)
}

async fn send_single(
    bot: &Bot,
    chat_id: ChatId,
    file: &MediaFile,
    spoiler: bool,
) -> Result<(), teloxide::RequestError> {
    let input = InputFile::file(file.path.clone());
    match file.kind {
        MediaKind::Video => {
            bot.send_video(chat_id, input)
                .has_spoiler(spoiler)
                .disable_notification(true)
                .await?;
        }
        MediaKind::Photo => {
            bot.send_photo(chat_id, input)
                .disable_notification(true)
                .await?;
        }
    }
    Ok(())
}

async fn send_group(
    bot: &Bot,
    chat_id: ChatId,
    batch: &MediaBatch,
    files: &[&MediaFile],
) -> Result<(), teloxide::RequestError> {
    debug!(kind = ?batch.kind, count = files.len(), "Sending media group");
    let media: Vec<InputMedia> = files
        .iter()
        .map(|file| {
            let input = InputFile::file(file.path.clone());
            match file.kind {
                MediaKind::Video => InputMedia::Video(InputMediaVideo::new(input)),
                MediaKind::Photo => InputMedia::Photo(InputMediaPhoto::new(input)),
            }
        })
        .collect();
    bot.send_media_group(chat_id, media)
        .disable_notification(true)
        .await?;
    Ok(())
}
