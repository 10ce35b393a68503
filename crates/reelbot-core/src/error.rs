//! Errors reported back to the chat that submitted a job.
//!
//! None of them is fatal to the process: every variant ends up as a reply.

use crate::responses::Language;
use std::time::Duration;
use thiserror::Error;

const MB: f64 = 1024.0 * 1024.0;

/// Errors a job can end with
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum JobError {
    /// Neither the chat nor the user is on the allow-list
    #[error("access denied for user {username:?} in chat {chat_id}")]
    AccessDenied {
        /// Username of the caller, if Telegram provided one
        username: Option<String>,
        /// Chat the request came from
        chat_id: i64,
    },
    /// The waiting queue is full
    #[error("job queue is full (capacity {capacity})")]
    QueueFull {
        /// Configured queue capacity
        capacity: usize,
    },
    /// A job or one of its processes ran out of time
    #[error("timed out after {}s", after.as_secs())]
    Timeout {
        /// Limit that was exceeded
        after: Duration,
    },
    /// Media is larger than the upload ceiling
    #[error("artifact of {size} bytes exceeds the {limit} byte limit")]
    ArtifactTooLarge {
        /// Size of the file
        size: u64,
        /// Upload ceiling
        limit: u64,
    },
    /// Video is longer than allowed
    #[error("video lasts {duration_secs}s, limit is {limit_secs}s")]
    VideoTooLong {
        /// Duration reported by the tools
        duration_secs: u64,
        /// Configured limit
        limit_secs: u64,
    },
    /// The external tool failed or produced nothing usable
    #[error("download failed: {0}")]
    DownloadFailed(String),
    /// Cancelled by the user or by shutdown
    #[error("job cancelled")]
    Cancelled,
}

impl JobError {
    /// Whether the error should also be reported to the admins
    #[must_use]
    pub const fn is_unexpected(&self) -> bool {
        matches!(self, Self::DownloadFailed(_) | Self::Timeout { .. })
    }

    /// Message shown to the user in the chat
    #[must_use]
    pub fn user_message(&self, language: Language) -> String {
        match language {
            Language::Ua => self.message_ua(),
            Language::En => self.message_en(),
        }
    }

    fn message_en(&self) -> String {
        match self {
            Self::AccessDenied { username, chat_id } => format!(
                "⛔️ Access denied. Ask the bot owner to allow you.\n\
                 [Chat ID]: {chat_id}\n[Username]: {}",
                username.as_deref().unwrap_or("none")
            ),
            Self::QueueFull { .. } => {
                "Too many downloads in progress. Please try again in a minute.".to_string()
            }
            Self::Timeout { after } => format!(
                "The download took longer than {} seconds and was stopped.",
                after.as_secs()
            ),
            Self::ArtifactTooLarge { limit, .. } => format!(
                "The video is too large to send (over {:.0}MB).",
                *limit as f64 / MB
            ),
            Self::VideoTooLong { limit_secs, .. } => format!(
                "The video is too long to send (over {} minutes).",
                limit_secs / 60
            ),
            Self::DownloadFailed(reason) => format!("Could not download the media: {reason}"),
            Self::Cancelled => "The download was cancelled.".to_string(),
        }
    }

    fn message_ua(&self) -> String {
        match self {
            Self::AccessDenied { username, chat_id } => format!(
                "⛔️ Доступ заборонено. Попросіть власника бота додати вас.\n\
                 [Chat ID]: {chat_id}\n[Username]: {}",
                username.as_deref().unwrap_or("none")
            ),
            Self::QueueFull { .. } => {
                "Забагато завантажень. Спробуйте ще раз за хвилину.".to_string()
            }
            Self::Timeout { after } => format!(
                "Завантаження тривало довше {} секунд і було зупинене.",
                after.as_secs()
            ),
            Self::ArtifactTooLarge { limit, .. } => format!(
                "Відео завелике для надсилання (понад {:.0}MB).",
                *limit as f64 / MB
            ),
            Self::VideoTooLong { limit_secs, .. } => format!(
                "Відео задовге для надсилання (понад {} хвилин).",
                limit_secs / 60
            ),
            Self::DownloadFailed(reason) => format!("О Курва! Якась помилка. Спробуй ще. {reason}"),
            Self::Cancelled => "Завантаження скасовано.".to_string(),
        }
    }
}
