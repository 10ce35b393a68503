//! Telegram transport settings.

use config::{Config, ConfigError};
use reelbot_core::config::AppSettings;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Cooldown period (seconds) between "Access Denied" messages for same chat.
/// Default: 20 minutes.
pub const UNAUTHORIZED_COOLDOWN_SECS: u64 = 1200;
/// Time-to-live (seconds) for cache entries.
/// Default: 2 hours.
pub const UNAUTHORIZED_CACHE_TTL_SECS: u64 = 7200;
/// Maximum cache capacity (number of entries).
pub const UNAUTHORIZED_CACHE_MAX_SIZE: u64 = 10_000;
/// HTTP timeout of Bot API requests; uploads of 50MB need a long one.
pub const TELEGRAM_REQUEST_TIMEOUT_SECS: u64 = 300;

const fn default_cooldown() -> u64 {
    UNAUTHORIZED_COOLDOWN_SECS
}

const fn default_cache_ttl() -> u64 {
    UNAUTHORIZED_CACHE_TTL_SECS
}

const fn default_cache_max_size() -> u64 {
    UNAUTHORIZED_CACHE_MAX_SIZE
}

/// Telegram transport settings loaded from environment variables.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct TelegramSettings {
    /// Telegram Bot API token (`TELEGRAM_TOKEN`).
    #[serde(default)]
    pub telegram_token: String,
    /// Fallback token variable (`BOT_TOKEN`), used when `TELEGRAM_TOKEN` is unset.
    #[serde(default)]
    pub bot_token: Option<String>,
    /// Comma-separated chat IDs that receive error reports.
    #[serde(rename = "admins_chat_ids")]
    pub admins_chat_ids_str: Option<String>,
    /// Whether unexpected job errors are reported to the admins.
    #[serde(default)]
    pub send_error_to_admin: bool,
    /// Seconds between two "Access Denied" replies to the same chat.
    #[serde(default = "default_cooldown")]
    pub unauthorized_cooldown_secs: u64,
    /// Seconds an anti-spam entry is kept at most.
    #[serde(default = "default_cache_ttl")]
    pub unauthorized_cache_ttl_secs: u64,
    /// Anti-spam cache capacity.
    #[serde(default = "default_cache_max_size")]
    pub unauthorized_cache_max_size: u64,
}

impl TelegramSettings {
    /// Create new settings by loading from environment and files.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(reelbot_core::config::build_config()?)
    }

    /// Deserialize settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if deserialization fails or neither
    /// `TELEGRAM_TOKEN` nor `BOT_TOKEN` is set.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        let settings: Self = config.try_deserialize()?;
        if settings.token().is_empty() {
            return Err(ConfigError::NotFound("telegram_token".into()));
        }
        Ok(settings)
    }

    /// The Bot API token, preferring `TELEGRAM_TOKEN` over `BOT_TOKEN`.
    #[must_use]
    pub fn token(&self) -> &str {
        let primary = self.telegram_token.trim();
        if primary.is_empty() {
            self.bot_token.as_deref().map_or("", str::trim)
        } else {
            primary
        }
    }

    /// Returns the admin chat IDs that receive error reports.
    #[must_use]
    pub fn admin_chat_ids(&self) -> Vec<i64> {
        self.admins_chat_ids_str
            .as_ref()
            .map(|s| {
                s.split(|c: char| c == ',' || c == ';' || c.is_whitespace())
                    .filter(|token| !token.is_empty())
                    .filter_map(|id| id.parse::<i64>().ok())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Combined settings used by the Telegram transport layer.
#[derive(Clone)]
pub struct BotSettings {
    /// Core settings shared across transport handlers.
    pub app: Arc<AppSettings>,
    /// Telegram-specific settings.
    pub telegram: Arc<TelegramSettings>,
}

impl BotSettings {
    /// Create a new combined settings bundle.
    #[must_use]
    pub fn new(app: AppSettings, telegram: TelegramSettings) -> Self {
        Self {
            app: Arc::new(app),
            telegram: Arc::new(telegram),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TelegramSettings;
    use config::Config;

    #[test]
    fn test_admin_list_parsing() {
        let mut settings = TelegramSettings {
            admins_chat_ids_str: Some("123,456".to_string()),
            ..TelegramSettings::default()
        };
        assert_eq!(settings.admin_chat_ids(), vec![123, 456]);

        settings.admins_chat_ids_str = Some("333; -444 abc".to_string());
        assert_eq!(settings.admin_chat_ids(), vec![333, -444]);

        settings.admins_chat_ids_str = None;
        assert!(settings.admin_chat_ids().is_empty());
    }

    #[test]
    fn test_bot_token_fallback_and_defaults() -> Result<(), config::ConfigError> {
        let config = Config::builder()
            .set_override("bot_token", "123:abc")?
            .set_override("send_error_to_admin", "True")?
            .build()?;
        let settings = TelegramSettings::from_config(config)?;
        assert_eq!(settings.token(), "123:abc");
        assert!(settings.send_error_to_admin);
        assert_eq!(settings.unauthorized_cooldown_secs, 1200);
        assert_eq!(settings.unauthorized_cache_max_size, 10_000);
        Ok(())
    }

    #[test]
    fn test_both_token_variables_prefer_telegram_token() -> Result<(), config::ConfigError> {
        let config = Config::builder()
            .set_override("telegram_token", "111:primary")?
            .set_override("bot_token", "222:fallback")?
            .build()?;
        let settings = TelegramSettings::from_config(config)?;
        assert_eq!(settings.token(), "111:primary");
        Ok(())
    }

    #[test]
    fn test_missing_token_is_rejected() -> Result<(), config::ConfigError> {
        let config = Config::builder()
            .set_override("send_error_to_admin", "false")?
            .build()?;
        let result = TelegramSettings::from_config(config);
        assert!(matches!(result, Err(config::ConfigError::NotFound(_))));
        Ok(())
    }
}
