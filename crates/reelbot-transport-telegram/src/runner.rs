use crate::bot;
use crate::bot::admin::AdminNotifier;
use crate::bot::handlers::Command;
use crate::bot::{BotContext, UnauthorizedCache};
use crate::config::{BotSettings, TELEGRAM_REQUEST_TIMEOUT_SECS};
use reelbot_core::access::AccessRule;
use reelbot_core::delivery::MediaProbe;
use reelbot_core::dispatcher::{Dispatcher as JobDispatcher, DispatcherConfig, JobRunner};
use reelbot_core::responses::ResponseBook;
use reelbot_core::transcode::Ffmpeg;
use reelbot_core::ytdlp::MediaDownloader;
use std::sync::Arc;
use std::time::Duration;
use teloxide::dispatching::UpdateHandler;
use teloxide::prelude::*;
use tracing::{error, info, warn};

/// Run the Telegram transport runtime until Ctrl+C.
///
/// # Errors
///
/// Returns an error if the HTTP client for the Bot API cannot be built.
pub async fn run_bot(settings: Arc<BotSettings>) -> anyhow::Result<()> {
    let client = teloxide::net::default_reqwest_settings()
        .timeout(Duration::from_secs(TELEGRAM_REQUEST_TIMEOUT_SECS))
        .build()?;
    let bot = Bot::with_client(settings.telegram.token(), client);

    let jobs = init_jobs(&settings);
    let context = Arc::new(BotContext {
        access: init_access(&settings),
        responses: ResponseBook::load(&settings.app.responses_dir, settings.app.language()),
        unauthorized: init_unauthorized_cache(&settings),
        admin: AdminNotifier::from_settings(&settings.telegram),
        jobs: jobs.clone(),
        settings,
    });
    let handler = setup_handler();

    info!("Bot is running...");

    Dispatcher::builder(bot, handler)
        .dependencies(dptree::deps![context])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;

    info!("Bot stopped, cancelling outstanding jobs.");
    jobs.shutdown();
    Ok(())
}

fn init_jobs(settings: &BotSettings) -> JobDispatcher {
    let probe: Arc<dyn MediaProbe> = Arc::new(Ffmpeg::from_settings(&settings.app));
    let runner: Arc<dyn JobRunner> = Arc::new(MediaDownloader::new(&settings.app, probe));
    let config = DispatcherConfig::from(settings.app.as_ref());

    info!(
        "Initializing job dispatcher (workers: {}, queue: {}, per-chat exclusive: {}, \
         timeout: {}s)",
        config.workers,
        config.queue_capacity,
        config.per_chat_exclusive,
        config.job_timeout.as_secs()
    );
    JobDispatcher::new(config, runner)
}

fn init_access(settings: &BotSettings) -> AccessRule {
    let access = AccessRule::from_settings(&settings.app);
    if !access.enabled() {
        warn!("LIMIT_BOT_ACCESS is off: everyone may download.");
    } else if settings.app.allowed_usernames().is_empty()
        && settings.app.allowed_chat_ids().is_empty()
    {
        warn!("Access is limited but both allow-lists are empty: every download is denied.");
    }
    access
}

fn init_unauthorized_cache(settings: &BotSettings) -> UnauthorizedCache {
    let cooldown = settings.telegram.unauthorized_cooldown_secs;
    let ttl = settings.telegram.unauthorized_cache_ttl_secs;
    let max_size = settings.telegram.unauthorized_cache_max_size;

    info!(
        "Initializing UnauthorizedCache (cooldown: {}s, ttl: {}s, max_size: {})",
        cooldown, ttl, max_size
    );

    UnauthorizedCache::new(cooldown, ttl, max_size)
}

fn setup_handler() -> UpdateHandler<teloxide::RequestError> {
    dptree::entry()
        .branch(
            Update::filter_message()
                .filter_command::<Command>()
                .endpoint(handle_command),
        )
        .branch(
            Update::filter_message()
                .filter(|msg: Message| msg.text().is_some())
                .endpoint(handle_text_message),
        )
}

async fn handle_command(
    bot: Bot,
    msg: Message,
    cmd: Command,
    context: Arc<BotContext>,
) -> Result<(), teloxide::RequestError> {
    let res = match cmd {
        Command::Start => bot::handlers::start(bot, msg, context).await,
        Command::Healthcheck => bot::handlers::healthcheck(bot, msg).await,
        Command::Stats => bot::handlers::stats(bot, msg, context).await,
        Command::Cancel => bot::handlers::cancel(bot, msg, context).await,
    };
    if let Err(e) = res {
        error!("Command error: {}", e);
    }
    respond(())
}

async fn handle_text_message(
    bot: Bot,
    msg: Message,
    context: Arc<BotContext>,
) -> Result<(), teloxide::RequestError> {
    if let Err(e) = bot::handlers::handle_text(bot, msg, context).await {
        error!("Text handler error: {}", e);
    }
    respond(())
}
