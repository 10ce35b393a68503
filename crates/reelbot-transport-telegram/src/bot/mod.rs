/// Admin error reports
pub mod admin;
/// Shared state handed to every handler
pub mod context;
/// Command and message handlers
pub mod handlers;
/// Resilient messaging with automatic retry for Telegram API operations
pub mod resilient;
/// Unauthorized access flood protection
pub mod unauthorized_cache;
/// Media uploads for finished jobs
pub mod upload;

pub use context::BotContext;
pub use unauthorized_cache::UnauthorizedCache;
