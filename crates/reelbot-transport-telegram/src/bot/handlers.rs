use crate::bot::resilient::send_message_resilient;
use crate::bot::upload::deliver;
use crate::bot::BotContext;
use anyhow::Result;
use reelbot_core::dispatcher::{JobHandle, QueueSnapshot};
use reelbot_core::error::JobError;
use reelbot_core::inbound::{classify, Inbound};
use reelbot_core::job::Job;
use reelbot_core::responses::{text, Text};
use std::sync::Arc;
use teloxide::{
    prelude::*,
    types::{ChatId, MessageEntityKind, ParseMode},
    utils::command::BotCommands,
};
use tracing::{info, warn};

/// Supported commands for the bot
#[derive(BotCommands, Clone)]
#[command(rename_rule = "lowercase", description = "Supported commands:")]
pub enum Command {
    /// Show usage
    #[command(description = "Start the bot.")]
    Start,
    /// Check bot health
    #[command(description = "Check bot health.")]
    Healthcheck,
    /// Show queue and anti-spam statistics
    #[command(description = "Show bot statistics.")]
    Stats,
    /// Cancel this chat's downloads
    #[command(description = "Cancel downloads of this chat.")]
    Cancel,
}

/// Safe extraction of user ID from a message.
/// Returns 0 if the user information is missing.
pub fn get_user_id_safe(msg: &Message) -> i64 {
    msg.from.as_ref().map_or(0, |u| u.id.0.cast_signed())
}

/// Telegram username of the sender, without `@`
pub fn get_username(msg: &Message) -> Option<String> {
    msg.from.as_ref().and_then(|u| u.username.clone())
}

/// Whether the message text carries a spoiler entity
fn has_spoiler(msg: &Message) -> bool {
    msg.entities()
        .is_some_and(|entities| entities.iter().any(|e| e.kind == MessageEntityKind::Spoiler))
}

/// Text of the canned reply to the health keyword
fn health_reply(response: &str, chat_id: i64, username: Option<&str>) -> String {
    format!(
        "{response}\n[Chat ID]: {chat_id}\n[Username]: {}",
        username.unwrap_or("None")
    )
}

fn stats_text(queue: QueueSnapshot, cooldown_mins: u64, entries: u64, silenced: u64) -> String {
    format!(
        "<b>📊 Bot Statistics</b>\n\n\
        <b>Downloads:</b>\n\
        • Running: {}/{}\n\
        • Queued: {}/{}\n\n\
        <b>Anti-spam protection (Access Denied):</b>\n\
        • Cooldown period: {} min.\n\
        • Cache entries: {}\n\
        • Blocked notifications: {}",
        queue.running, queue.workers, queue.queued, queue.capacity, cooldown_mins, entries, silenced
    )
}

/// Start handler
///
/// # Errors
///
/// Returns an error if the welcome message cannot be sent.
pub async fn start(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    info!("User {} initiated /start command.", get_user_id_safe(&msg));
    send_message_resilient(&bot, msg.chat.id, text(ctx.language(), Text::Welcome, ""), None).await?;
    Ok(())
}

/// Healthcheck handler
///
/// # Errors
///
/// Returns an error if the response cannot be sent.
pub async fn healthcheck(bot: Bot, msg: Message) -> Result<()> {
    let user_id = get_user_id_safe(&msg);
    info!("Healthcheck command received from user {user_id}.");
    bot.send_message(msg.chat.id, "OK").await?;
    info!("Responded 'OK' to healthcheck from user {user_id}.");
    Ok(())
}

/// Stats handler - queue counters and unauthorized cache metrics
///
/// # Errors
///
/// Returns an error if the stats response cannot be sent.
pub async fn stats(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    if !authorize(&bot, &msg, &ctx).await? {
        return Ok(());
    }
    info!("Stats command received from user {}.", get_user_id_safe(&msg));

    let stats = stats_text(
        ctx.jobs.snapshot(),
        ctx.unauthorized.cooldown().as_secs() / 60,
        ctx.unauthorized.entry_count(),
        ctx.unauthorized.silenced_count(),
    );
    send_message_resilient(&bot, msg.chat.id, stats, Some(ParseMode::Html)).await?;
    Ok(())
}

/// Cancel handler - cancels every queued and running job of the chat
///
/// # Errors
///
/// Returns an error if the response cannot be sent.
pub async fn cancel(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    if !authorize(&bot, &msg, &ctx).await? {
        return Ok(());
    }
    let cancelled = ctx.jobs.cancel_chat(msg.chat.id.0);
    let reply = text(ctx.language(), Text::CancelledJobs, &cancelled.to_string());
    send_message_resilient(&bot, msg.chat.id, reply, None).await?;
    Ok(())
}

/// Check the allow-lists; answers denied chats (once per cooldown).
///
/// Returns `true` if the caller may continue.
async fn authorize(bot: &Bot, msg: &Message, ctx: &BotContext) -> Result<bool> {
    let username = get_username(msg);
    let Err(denied) = ctx.access.evaluate(username.as_deref(), msg.chat.id.0) else {
        return Ok(true);
    };

    let chat_id = msg.chat.id.0;
    let name = username.as_deref().unwrap_or("Unknown");
    if ctx.unauthorized.should_send(chat_id, name).await {
        info!("⛔️ Unauthorized access from chat {chat_id} ({name}). Sending denial message.");
        send_message_resilient(bot, msg.chat.id, denied.user_message(ctx.language()), None).await?;
        ctx.unauthorized.mark_sent(chat_id).await;
    }
    Ok(false)
}

/// Plain text handler: health keyword or a link to download
///
/// # Errors
///
/// Returns an error if a reply cannot be sent.
pub async fn handle_text(bot: Bot, msg: Message, ctx: Arc<BotContext>) -> Result<()> {
    let Some(body) = msg.text() else {
        return Ok(());
    };

    match classify(body) {
        Inbound::Ignore => Ok(()),
        Inbound::HealthCheck => {
            let reply = health_reply(
                ctx.responses.pick(),
                msg.chat.id.0,
                get_username(&msg).as_deref(),
            );
            send_message_resilient(&bot, msg.chat.id, reply, None).await?;
            Ok(())
        }
        Inbound::UnsupportedSite => {
            if !authorize(&bot, &msg, &ctx).await? {
                return Ok(());
            }
            // Groups are full of links the bot has no business with
            if msg.chat.is_private() {
                let reply = text(ctx.language(), Text::UnsupportedSite, "");
                send_message_resilient(&bot, msg.chat.id, reply, None).await?;
            }
            Ok(())
        }
        Inbound::Download { url, forced } => {
            if !authorize(&bot, &msg, &ctx).await? {
                return Ok(());
            }
            info!(chat_id = msg.chat.id.0, %url, forced, "Download requested");
            submit_download(bot, msg, ctx, url).await
        }
    }
}

/// Submit the job and hand its report to a background delivery task, so the
/// chat's next update is not held up by the download.
async fn submit_download(bot: Bot, msg: Message, ctx: Arc<BotContext>, url: String) -> Result<()> {
    let job = Job::new(url, get_username(&msg), get_user_id_safe(&msg), msg.chat.id.0);
    let handle = match ctx.jobs.submit(job) {
        Ok(handle) => handle,
        Err(e) => {
            send_message_resilient(&bot, msg.chat.id, e.user_message(ctx.language()), None).await?;
            return Ok(());
        }
    };

    if let Some(position) = ctx.jobs.position(handle.id()) {
        let reply = text(ctx.language(), Text::Queued, &position.to_string());
        send_message_resilient(&bot, msg.chat.id, reply, None).await?;
    }

    let spoiler = has_spoiler(&msg);
    tokio::spawn(finish_job(bot, msg.chat.id, ctx, handle, spoiler));
    Ok(())
}

async fn finish_job(
    bot: Bot,
    chat_id: ChatId,
    ctx: Arc<BotContext>,
    handle: JobHandle,
    spoiler: bool,
) {
    let Some(report) = handle.wait().await else {
        warn!(chat_id = chat_id.0, "Job vanished without a report");
        return;
    };
    let language = ctx.language();

    match report.result {
        Ok(artifact) => {
            let ceiling = ctx.settings.app.max_artifact_bytes();
            deliver(&bot, chat_id, &artifact, spoiler, ceiling, language).await;
        }
        // The /cancel reply already told the chat
        Err(JobError::Cancelled) => {}
        Err(error) => {
            if error.is_unexpected() {
                ctx.admin
                    .notify(
                        &bot,
                        &error,
                        report.job.requesting_user.as_deref(),
                        &report.job.source_url,
                    )
                    .await;
            }
            if let Err(e) =
                send_message_resilient(&bot, chat_id, error.user_message(language), None).await
            {
                warn!(chat_id = chat_id.0, error = %e, "Failed to report job error");
            }
        }
    }
}
