//! Download job model and its state machine.

use chrono::{DateTime, Utc};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Unique job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    /// Generate a fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First block of the UUID is plenty for logs
        let simple = self.0.as_simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Lifecycle of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    /// Waiting for a worker slot
    Queued,
    /// Holding a worker slot
    Running,
    /// Media ready for delivery
    Succeeded,
    /// Ended with an error
    Failed,
    /// Cancelled before completion
    Cancelled,
}

impl JobState {
    /// Succeeded, Failed and Cancelled never change again
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::Cancelled)
    }

    const fn can_move_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::Running | Self::Cancelled)
                | (Self::Running, Self::Succeeded | Self::Failed | Self::Cancelled)
        )
    }
}

/// Rejected state change
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("invalid job transition {from:?} -> {to:?}")]
pub struct InvalidTransition {
    /// Current state
    pub from: JobState,
    /// Requested state
    pub to: JobState,
}

/// A request to download media from `source_url` into `chat_id`
#[derive(Debug, Clone)]
pub struct Job {
    /// Job identifier
    pub id: JobId,
    /// URL handed to the downloader
    pub source_url: String,
    /// Telegram username of the requester, if any
    pub requesting_user: Option<String>,
    /// Telegram user ID of the requester
    pub user_id: i64,
    /// Chat the media goes back to
    pub chat_id: i64,
    /// Submission time
    pub submitted_at: DateTime<Utc>,
    state: JobState,
}

impl Job {
    /// Create a queued job
    #[must_use]
    pub fn new(
        source_url: impl Into<String>,
        requesting_user: Option<String>,
        user_id: i64,
        chat_id: i64,
    ) -> Self {
        Self {
            id: JobId::new(),
            source_url: source_url.into(),
            requesting_user,
            user_id,
            chat_id,
            submitted_at: Utc::now(),
            state: JobState::Queued,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> JobState {
        self.state
    }

    /// Move to `next`, leaving the state untouched if the move is not allowed.
    ///
    /// # Errors
    ///
    /// Returns `InvalidTransition` for moves outside the state machine.
    pub fn transition(&mut self, next: JobState) -> Result<(), InvalidTransition> {
        if !self.state.can_move_to(next) {
            return Err(InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path() -> Result<(), InvalidTransition> {
        let mut job = Job::new("https://x.com/a/status/1", None, 1, 1);
        assert_eq!(job.state(), JobState::Queued);
        job.transition(JobState::Running)?;
        job.transition(JobState::Succeeded)?;
        assert!(job.state().is_terminal());
        Ok(())
    }

    #[test]
    fn test_terminal_states_are_final() -> Result<(), InvalidTransition> {
        let mut job = Job::new("u", None, 1, 1);
        job.transition(JobState::Cancelled)?;
        for next in [
            JobState::Queued,
            JobState::Running,
            JobState::Succeeded,
            JobState::Failed,
        ] {
            assert!(job.transition(next).is_err());
            assert_eq!(job.state(), JobState::Cancelled);
        }
        Ok(())
    }

    #[test]
    fn test_cannot_skip_running() {
        let mut job = Job::new("u", None, 1, 1);
        let err = job.transition(JobState::Succeeded);
        assert_eq!(
            err,
            Err(InvalidTransition {
                from: JobState::Queued,
                to: JobState::Succeeded
            })
        );
    }

    #[test]
    fn test_ids_are_unique() {
        assert_ne!(JobId::new(), JobId::new());
        assert_eq!(JobId::new().to_string().len(), 8);
    }
}
