//! Configuration and settings management
//!
//! Loads settings from config files and environment variables and defines
//! the limits shared by the dispatcher, the downloader and delivery.

use crate::responses::Language;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::error;

const MB: u64 = 1024 * 1024;

/// Concurrent jobs when `WORKER_POOL_SIZE` is not set
pub const DEFAULT_WORKER_POOL_SIZE: usize = 2;
/// Waiting jobs when `JOB_QUEUE_CAPACITY` is not set
pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 16;
/// Wall-clock limit of a whole job
pub const DEFAULT_JOB_TIMEOUT_SECS: u64 = 600; // 10 minutes
/// Limit of a single yt-dlp / gallery-dl run
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = 120;
/// Limit of a single ffmpeg run
pub const DEFAULT_TRANSCODE_TIMEOUT_SECS: u64 = 300;
/// Longest video we agree to download and send (12 minutes)
pub const DEFAULT_MAX_VIDEO_DURATION_SECS: u64 = 720;
/// Telegram bot upload ceiling in megabytes
pub const DEFAULT_MAX_ARTIFACT_MB: u64 = 50;
/// Size ffmpeg aims for when a video is above the ceiling
pub const DEFAULT_COMPRESSION_TARGET_MB: u64 = 40;
/// Platform ceiling for uploaded media in bytes
pub const MAX_ARTIFACT_BYTES: u64 = DEFAULT_MAX_ARTIFACT_MB * MB;

/// More media than this in one job turns on throttled delivery
pub const THROTTLE_MEDIA_THRESHOLD: usize = 10;
/// Pause between batches when delivery is throttled
pub const THROTTLE_DELAY_SECS: u64 = 15;
/// Videos per media group
pub const VIDEO_GROUP_SIZE: usize = 2;
/// Photos per media group
pub const PHOTO_GROUP_SIZE: usize = 10;

// Telegram API retry configuration
/// Initial backoff for Telegram API retries
pub const TELEGRAM_API_INITIAL_BACKOFF_MS: u64 = 500;
/// Maximum backoff for Telegram API retries
pub const TELEGRAM_API_MAX_BACKOFF_MS: u64 = 4000;
/// Maximum attempts for Telegram API operations
pub const TELEGRAM_API_MAX_RETRIES: usize = 3;

/// Build the layered configuration source shared by all settings structs.
///
/// Sources, later ones win: `config/default`, `config/{RUN_MODE}`,
/// `config/local`, `APP__`-prefixed environment, plain environment.
///
/// # Errors
///
/// Returns a `ConfigError` if a config file is malformed.
pub fn build_config() -> Result<Config, ConfigError> {
    let run_mode = std::env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

    Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(File::with_name(&format!("config/{run_mode}")).required(false))
        // Not checked into git
        .add_source(File::with_name("config/local").required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        // Environment::default() maps UPPER_SNAKE_CASE to snake_case;
        // empty variables count as unset
        .add_source(Environment::default().ignore_empty(true))
        .build()
}

/// Core settings: access control, job limits and external tools
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppSettings {
    /// Raw `LIMIT_BOT_ACCESS` value; access is limited unless it is falsy
    #[serde(rename = "limit_bot_access")]
    pub limit_bot_access_str: Option<String>,
    /// Comma-separated list of allowed Telegram usernames
    #[serde(rename = "allowed_usernames")]
    pub allowed_usernames_str: Option<String>,
    /// Comma-separated list of allowed chat IDs (groups)
    #[serde(rename = "allowed_chat_ids")]
    pub allowed_chat_ids_str: Option<String>,

    /// Reply language code (`ua` or `en`)
    #[serde(default = "default_language")]
    pub language: String,
    /// Directory containing `responses_<lang>.json`
    #[serde(default = "default_responses_dir")]
    pub responses_dir: PathBuf,

    /// Number of jobs allowed to run at the same time
    #[serde(default = "default_worker_pool_size")]
    pub worker_pool_size: usize,
    /// Number of jobs allowed to wait for a worker
    #[serde(default = "default_job_queue_capacity")]
    pub job_queue_capacity: usize,
    /// Allow at most one running job per chat
    #[serde(default = "default_true")]
    pub per_chat_exclusive: bool,
    /// Wall-clock limit of a whole job
    #[serde(default = "default_job_timeout_secs")]
    pub job_timeout_secs: u64,
    /// Limit of a single downloader run
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
    /// Limit of a single transcoder run
    #[serde(default = "default_transcode_timeout_secs")]
    pub transcode_timeout_secs: u64,
    /// Longest accepted video in seconds
    #[serde(default = "default_max_video_duration_secs")]
    pub max_video_duration_secs: u64,
    /// Upload ceiling in megabytes
    #[serde(default = "default_max_artifact_mb")]
    pub max_artifact_mb: u64,
    /// Compression target in megabytes
    #[serde(default = "default_compression_target_mb")]
    pub compression_target_mb: u64,

    /// Pass a cookies file to yt-dlp and gallery-dl
    #[serde(default)]
    pub instacookies: bool,
    /// Path of the Netscape cookies file
    #[serde(default = "default_cookies_file")]
    pub cookies_file: PathBuf,

    /// yt-dlp executable
    #[serde(default = "default_ytdlp_bin")]
    pub ytdlp_bin: String,
    /// gallery-dl executable
    #[serde(default = "default_gallery_dl_bin")]
    pub gallery_dl_bin: String,
    /// ffmpeg executable
    #[serde(default = "default_ffmpeg_bin")]
    pub ffmpeg_bin: String,
    /// ffprobe executable
    #[serde(default = "default_ffprobe_bin")]
    pub ffprobe_bin: String,
}

fn default_language() -> String {
    "ua".to_string()
}

fn default_responses_dir() -> PathBuf {
    PathBuf::from(".")
}

const fn default_worker_pool_size() -> usize {
    DEFAULT_WORKER_POOL_SIZE
}

const fn default_job_queue_capacity() -> usize {
    DEFAULT_JOB_QUEUE_CAPACITY
}

const fn default_true() -> bool {
    true
}

const fn default_job_timeout_secs() -> u64 {
    DEFAULT_JOB_TIMEOUT_SECS
}

const fn default_download_timeout_secs() -> u64 {
    DEFAULT_DOWNLOAD_TIMEOUT_SECS
}

const fn default_transcode_timeout_secs() -> u64 {
    DEFAULT_TRANSCODE_TIMEOUT_SECS
}

const fn default_max_video_duration_secs() -> u64 {
    DEFAULT_MAX_VIDEO_DURATION_SECS
}

const fn default_max_artifact_mb() -> u64 {
    DEFAULT_MAX_ARTIFACT_MB
}

const fn default_compression_target_mb() -> u64 {
    DEFAULT_COMPRESSION_TARGET_MB
}

fn default_cookies_file() -> PathBuf {
    PathBuf::from("instagram_cookies.txt")
}

fn default_ytdlp_bin() -> String {
    "yt-dlp".to_string()
}

fn default_gallery_dl_bin() -> String {
    "gallery-dl".to_string()
}

fn default_ffmpeg_bin() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_bin() -> String {
    "ffprobe".to_string()
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            limit_bot_access_str: None,
            allowed_usernames_str: None,
            allowed_chat_ids_str: None,
            language: default_language(),
            responses_dir: default_responses_dir(),
            worker_pool_size: DEFAULT_WORKER_POOL_SIZE,
            job_queue_capacity: DEFAULT_JOB_QUEUE_CAPACITY,
            per_chat_exclusive: true,
            job_timeout_secs: DEFAULT_JOB_TIMEOUT_SECS,
            download_timeout_secs: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            transcode_timeout_secs: DEFAULT_TRANSCODE_TIMEOUT_SECS,
            max_video_duration_secs: DEFAULT_MAX_VIDEO_DURATION_SECS,
            max_artifact_mb: DEFAULT_MAX_ARTIFACT_MB,
            compression_target_mb: DEFAULT_COMPRESSION_TARGET_MB,
            instacookies: false,
            cookies_file: default_cookies_file(),
            ytdlp_bin: default_ytdlp_bin(),
            gallery_dl_bin: default_gallery_dl_bin(),
            ffmpeg_bin: default_ffmpeg_bin(),
            ffprobe_bin: default_ffprobe_bin(),
        }
    }
}

/// Split a list setting on commas, semicolons and whitespace.
fn split_list(raw: Option<&String>) -> impl Iterator<Item = &str> {
    raw.into_iter()
        .flat_map(|s| s.split(|c: char| c == ',' || c == ';' || c.is_whitespace()))
        .filter(|token| !token.is_empty())
}

/// Normalize a Telegram username for comparison: no `@`, lower case.
#[must_use]
pub fn normalize_username(name: &str) -> String {
    name.trim().trim_start_matches('@').to_lowercase()
}

impl AppSettings {
    /// Create new settings by loading from environment and files
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use reelbot_core::config::AppSettings;
    ///
    /// let settings = AppSettings::new().expect("Failed to load configuration");
    /// ```
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if loading fails.
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_config(build_config()?)
    }

    /// Deserialize settings from an already built configuration.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if a value has the wrong type.
    pub fn from_config(config: Config) -> Result<Self, ConfigError> {
        config.try_deserialize()
    }

    /// Whether the allow-lists are enforced.
    ///
    /// Limiting is on unless `LIMIT_BOT_ACCESS` is `false`, `0`, `no` or `off`.
    #[must_use]
    pub fn access_limited(&self) -> bool {
        self.limit_bot_access_str.as_deref().map_or(true, |raw| {
            !matches!(
                raw.trim().to_lowercase().as_str(),
                "false" | "0" | "no" | "off"
            )
        })
    }

    /// Returns the normalized set of allowed usernames
    #[must_use]
    pub fn allowed_usernames(&self) -> HashSet<String> {
        split_list(self.allowed_usernames_str.as_ref())
            .map(normalize_username)
            .filter(|name| !name.is_empty())
            .collect()
    }

    /// Returns the set of allowed chat IDs
    #[must_use]
    pub fn allowed_chat_ids(&self) -> HashSet<i64> {
        split_list(self.allowed_chat_ids_str.as_ref())
            .filter_map(|id| id.parse::<i64>().ok())
            .collect()
    }

    /// Reply language
    #[must_use]
    pub fn language(&self) -> Language {
        Language::from_code(&self.language)
    }

    /// Worker pool size, at least one
    #[must_use]
    pub fn worker_pool_size(&self) -> usize {
        self.worker_pool_size.max(1)
    }

    /// Queue capacity, at least one
    #[must_use]
    pub fn job_queue_capacity(&self) -> usize {
        self.job_queue_capacity.max(1)
    }

    /// Wall-clock limit of a whole job
    #[must_use]
    pub const fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout_secs)
    }

    /// Limit of a single downloader run
    #[must_use]
    pub const fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Limit of a single transcoder run
    #[must_use]
    pub const fn transcode_timeout(&self) -> Duration {
        Duration::from_secs(self.transcode_timeout_secs)
    }

    /// Longest accepted video
    #[must_use]
    pub const fn max_video_duration(&self) -> Duration {
        Duration::from_secs(self.max_video_duration_secs)
    }

    /// Upload ceiling in bytes
    #[must_use]
    pub const fn max_artifact_bytes(&self) -> u64 {
        self.max_artifact_mb.saturating_mul(MB)
    }

    /// Compression target in bytes
    #[must_use]
    pub const fn compression_target_bytes(&self) -> u64 {
        self.compression_target_mb.saturating_mul(MB)
    }

    /// Cookies file to pass to the downloaders, if enabled and present.
    #[must_use]
    pub fn cookies_path(&self) -> Option<&Path> {
        if !self.instacookies {
            return None;
        }
        if self.cookies_file.exists() {
            Some(self.cookies_file.as_path())
        } else {
            error!(
                path = %self.cookies_file.display(),
                "INSTACOOKIES is enabled but the cookies file was not found, ignoring"
            );
            None
        }
    }
}
