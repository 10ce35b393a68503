use crate::bot::admin::AdminNotifier;
use crate::bot::UnauthorizedCache;
use crate::config::BotSettings;
use reelbot_core::access::AccessRule;
use reelbot_core::dispatcher::Dispatcher;
use reelbot_core::responses::{Language, ResponseBook};
use std::sync::Arc;

/// Everything a handler needs, injected once through `dptree::deps!`
pub struct BotContext {
    /// Loaded settings
    pub settings: Arc<BotSettings>,
    /// Allow-lists
    pub access: AccessRule,
    /// Job queue
    pub jobs: Dispatcher,
    /// Canned replies to the health keyword
    pub responses: ResponseBook,
    /// "Access Denied" flood protection
    pub unauthorized: UnauthorizedCache,
    /// Error reports for admins
    pub admin: AdminNotifier,
}

impl BotContext {
    /// Reply language
    #[must_use]
    pub fn language(&self) -> Language {
        self.responses.language()
    }
}
