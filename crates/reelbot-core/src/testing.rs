//! Test doubles for the dispatcher and delivery planning.

use crate::delivery::{Artifact, DeliveryPlan, MediaFile, MediaKind, MockMediaProbe};
use crate::dispatcher::{JobRunner, MockJobRunner};
use crate::error::JobError;
use crate::job::Job;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Artifact with an empty plan in a fresh temporary directory
pub fn empty_artifact() -> Result<Artifact, JobError> {
    tempfile::tempdir()
        .map(|dir| Artifact::new(dir, DeliveryPlan::default()))
        .map_err(|e| JobError::DownloadFailed(e.to_string()))
}

/// A runner that fails every job with `DownloadFailed(reason)`
pub fn mock_runner_failing(reason: &'static str) -> MockJobRunner {
    let mut mock = MockJobRunner::new();
    mock.expect_run()
        .returning(move |_, _| Err(JobError::DownloadFailed(reason.to_string())));
    mock
}

/// A probe that reports `duration` for every file
pub fn probe_with_duration(duration: Option<Duration>) -> MockMediaProbe {
    let mut mock = MockMediaProbe::new();
    mock.expect_duration().returning(move |_, _| duration);
    mock
}

/// A media file that only exists on paper
pub fn media_file(name: &str, kind: MediaKind, size: u64) -> MediaFile {
    MediaFile {
        path: PathBuf::from(name),
        kind,
        size,
    }
}

/// Runner whose jobs block until [`GatedRunner::release`] lets them through.
///
/// Records start order and how many jobs of each chat overlapped.
pub struct GatedRunner {
    gate: Semaphore,
    started: Mutex<Vec<String>>,
    running: Mutex<HashMap<i64, (usize, usize)>>,
}

impl GatedRunner {
    fn with_permits(permits: usize) -> Self {
        Self {
            gate: Semaphore::new(permits),
            started: Mutex::new(Vec::new()),
            running: Mutex::new(HashMap::new()),
        }
    }

    /// Jobs finish immediately
    pub fn open() -> Self {
        Self::with_permits(Semaphore::MAX_PERMITS)
    }

    /// Jobs wait for `release`
    pub fn closed() -> Self {
        Self::with_permits(0)
    }

    /// Let `jobs` more jobs finish
    pub fn release(&self, jobs: usize) {
        self.gate.add_permits(jobs);
    }

    /// URLs in the order their jobs started
    pub fn started(&self) -> Vec<String> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Highest number of simultaneously running jobs seen for `chat_id`
    pub fn max_overlap(&self, chat_id: i64) -> usize {
        self.running
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&chat_id)
            .map_or(0, |(_, max)| *max)
    }

    fn track(&self, chat_id: i64, delta: isize) {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        let (now, max) = running.entry(chat_id).or_insert((0, 0));
        *now = now.saturating_add_signed(delta);
        *max = (*max).max(*now);
    }
}

#[async_trait]
impl JobRunner for GatedRunner {
    async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, JobError> {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(job.source_url.clone());
        self.track(job.chat_id, 1);

        let passed = tokio::select! {
            permit = self.gate.acquire() => {
                permit.map(|p| p.forget()).map_err(|_| JobError::Cancelled)
            }
            () = cancel.cancelled() => Err(JobError::Cancelled),
        };

        self.track(job.chat_id, -1);
        passed?;
        empty_artifact()
    }
}

/// Runner that never finishes on its own
pub struct StuckRunner;

#[async_trait]
impl JobRunner for StuckRunner {
    async fn run(&self, _job: &Job, _cancel: CancellationToken) -> Result<Artifact, JobError> {
        std::future::pending().await
    }
}
