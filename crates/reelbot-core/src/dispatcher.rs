//! Job queue and dispatcher
//!
//! Jobs wait in a bounded FIFO queue and run on a fixed number of worker
//! slots. With per-chat exclusivity a chat never has two running jobs: the
//! scheduler skips queued jobs whose chat is busy and picks the oldest job
//! that may start. Every state change (submit, completion, cancellation)
//! re-runs the scheduler, so a free slot is never left idle while an
//! eligible job waits.

use crate::config::AppSettings;
use crate::delivery::Artifact;
use crate::error::JobError;
use crate::job::{Job, JobId, JobState};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executes one job while it holds a worker slot
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Download the job's media and plan its delivery.
    ///
    /// Implementations must stop promptly once `cancel` fires.
    async fn run(&self, job: &Job, cancel: CancellationToken) -> Result<Artifact, JobError>;
}

/// Dispatcher limits
#[derive(Debug, Clone, Copy)]
pub struct DispatcherConfig {
    /// Worker slots
    pub workers: usize,
    /// Waiting jobs accepted before `QueueFull`
    pub queue_capacity: usize,
    /// At most one running job per chat
    pub per_chat_exclusive: bool,
    /// Wall-clock limit of one job
    pub job_timeout: Duration,
}

impl From<&AppSettings> for DispatcherConfig {
    fn from(settings: &AppSettings) -> Self {
        Self {
            workers: settings.worker_pool_size(),
            queue_capacity: settings.job_queue_capacity(),
            per_chat_exclusive: settings.per_chat_exclusive,
            job_timeout: settings.job_timeout(),
        }
    }
}

/// Terminal outcome of a job
#[derive(Debug)]
pub struct JobReport {
    /// The job in its terminal state
    pub job: Job,
    /// Media ready for delivery, or the reason there is none
    pub result: Result<Artifact, JobError>,
}

/// Returned by [`Dispatcher::submit`]; resolves when the job ends
#[derive(Debug)]
pub struct JobHandle {
    id: JobId,
    receiver: oneshot::Receiver<JobReport>,
}

impl JobHandle {
    /// Id of the submitted job
    #[must_use]
    pub const fn id(&self) -> JobId {
        self.id
    }

    /// Wait for the terminal report. `None` if the dispatcher went away.
    pub async fn wait(self) -> Option<JobReport> {
        self.receiver.await.ok()
    }
}

/// Point-in-time view of the dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueSnapshot {
    /// Jobs waiting for a slot
    pub queued: usize,
    /// Jobs holding a slot
    pub running: usize,
    /// Queue capacity
    pub capacity: usize,
    /// Worker slots
    pub workers: usize,
}

struct PendingJob {
    job: Job,
    reply: oneshot::Sender<JobReport>,
}

impl PendingJob {
    fn finish_cancelled(self) {
        let Self { mut job, reply } = self;
        if let Err(e) = job.transition(JobState::Cancelled) {
            warn!(job_id = %job.id, error = %e, "Unexpected state while cancelling");
        }
        info!(job_id = %job.id, chat_id = job.chat_id, "Queued job cancelled");
        let _ = reply.send(JobReport {
            job,
            result: Err(JobError::Cancelled),
        });
    }
}

struct RunningJob {
    chat_id: i64,
    cancel: CancellationToken,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<PendingJob>,
    busy_chats: HashSet<i64>,
    running: HashMap<JobId, RunningJob>,
}

struct Inner {
    config: DispatcherConfig,
    slots: Arc<Semaphore>,
    state: Mutex<QueueState>,
    runner: Arc<dyn JobRunner>,
    shutdown: CancellationToken,
}

enum Outcome {
    Finished(Result<Result<Artifact, JobError>, JoinError>),
    TimedOut,
    Cancelled,
}

/// Bounded job queue feeding a fixed pool of worker slots.
///
/// Cheap to clone; all clones share the same queue.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<Inner>,
}

impl Dispatcher {
    /// Create a dispatcher. Zero workers or capacity are raised to one.
    #[must_use]
    pub fn new(mut config: DispatcherConfig, runner: Arc<dyn JobRunner>) -> Self {
        config.workers = config.workers.max(1);
        config.queue_capacity = config.queue_capacity.max(1);
        Self {
            inner: Arc::new(Inner {
                slots: Arc::new(Semaphore::new(config.workers)),
                config,
                state: Mutex::new(QueueState::default()),
                runner,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    /// Limits in effect
    #[must_use]
    pub fn config(&self) -> DispatcherConfig {
        self.inner.config
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueue a job and start it right away if a slot is free.
    ///
    /// # Errors
    ///
    /// - `JobError::QueueFull` when the waiting queue is at capacity
    /// - `JobError::Cancelled` after [`Dispatcher::shutdown`]
    pub fn submit(&self, job: Job) -> Result<JobHandle, JobError> {
        if self.inner.shutdown.is_cancelled() {
            return Err(JobError::Cancelled);
        }

        let id = job.id;
        let chat_id = job.chat_id;
        let (reply, receiver) = oneshot::channel();
        let queued = {
            let mut state = self.lock();
            let capacity = self.inner.config.queue_capacity;
            if state.pending.len() >= capacity {
                warn!(job_id = %id, chat_id, capacity, "Job queue is full");
                return Err(JobError::QueueFull { capacity });
            }
            state.pending.push_back(PendingJob { job, reply });
            state.pending.len()
        };
        debug!(job_id = %id, chat_id, queued, "Job queued");

        self.pump();
        Ok(JobHandle { id, receiver })
    }

    /// Start queued jobs while slots are free.
    fn pump(&self) {
        loop {
            let Ok(permit) = Arc::clone(&self.inner.slots).try_acquire_owned() else {
                return;
            };
            let Some((pending, cancel)) = self.take_next() else {
                return;
            };
            tokio::spawn(self.clone().execute(pending, cancel, permit));
        }
    }

    fn take_next(&self) -> Option<(PendingJob, CancellationToken)> {
        let exclusive = self.inner.config.per_chat_exclusive;
        let mut state = self.lock();
        let index = state
            .pending
            .iter()
            .position(|p| !exclusive || !state.busy_chats.contains(&p.job.chat_id))?;
        let mut pending = state.pending.remove(index)?;

        if let Err(e) = pending.job.transition(JobState::Running) {
            warn!(job_id = %pending.job.id, error = %e, "Unexpected state while starting");
        }
        if exclusive {
            state.busy_chats.insert(pending.job.chat_id);
        }
        let cancel = self.inner.shutdown.child_token();
        state.running.insert(
            pending.job.id,
            RunningJob {
                chat_id: pending.job.chat_id,
                cancel: cancel.clone(),
            },
        );
        Some((pending, cancel))
    }

    async fn execute(
        self,
        pending: PendingJob,
        cancel: CancellationToken,
        permit: OwnedSemaphorePermit,
    ) {
        let PendingJob { mut job, reply } = pending;
        let timeout = self.inner.config.job_timeout;
        info!(job_id = %job.id, chat_id = job.chat_id, url = %job.source_url, "Job started");

        let runner = Arc::clone(&self.inner.runner);
        let runner_job = job.clone();
        let runner_cancel = cancel.clone();
        let mut task = tokio::spawn(async move { runner.run(&runner_job, runner_cancel).await });

        let outcome = tokio::select! {
            joined = &mut task => Outcome::Finished(joined),
            () = tokio::time::sleep(timeout) => Outcome::TimedOut,
            () = cancel.cancelled() => Outcome::Cancelled,
        };

        let result = match outcome {
            Outcome::Finished(Ok(result)) => result,
            Outcome::Finished(Err(e)) => {
                error!(job_id = %job.id, error = %e, "Job runner crashed");
                Err(JobError::DownloadFailed("internal error".to_string()))
            }
            Outcome::TimedOut => {
                warn!(job_id = %job.id, timeout_secs = timeout.as_secs(), "Job timed out");
                cancel.cancel();
                task.abort();
                let _ = task.await;
                Err(JobError::Timeout { after: timeout })
            }
            Outcome::Cancelled => {
                task.abort();
                let _ = task.await;
                Err(JobError::Cancelled)
            }
        };

        let next = match &result {
            Ok(_) => JobState::Succeeded,
            Err(JobError::Cancelled) => JobState::Cancelled,
            Err(_) => JobState::Failed,
        };
        if let Err(e) = job.transition(next) {
            warn!(job_id = %job.id, error = %e, "Unexpected state while finishing");
        }
        match &result {
            Ok(artifact) => info!(
                job_id = %job.id,
                batches = artifact.plan().batches.len(),
                "Job succeeded"
            ),
            Err(e) => info!(
                job_id = %job.id,
                state = ?job.state(),
                reason = %e,
                "Job ended without media"
            ),
        }

        {
            let mut state = self.lock();
            state.running.remove(&job.id);
            if self.inner.config.per_chat_exclusive {
                state.busy_chats.remove(&job.chat_id);
            }
        }
        drop(permit);

        if reply.send(JobReport { job, result }).is_err() {
            debug!("Job report dropped, nobody is waiting");
        }
        self.pump();
    }

    /// 1-based position of a queued job, `None` once it left the queue
    #[must_use]
    pub fn position(&self, id: JobId) -> Option<usize> {
        self.lock()
            .pending
            .iter()
            .position(|p| p.job.id == id)
            .map(|index| index + 1)
    }

    /// Cancel a queued or running job. Returns `false` if the job is unknown
    /// or already finished.
    pub fn cancel(&self, id: JobId) -> bool {
        let removed = {
            let mut state = self.lock();
            if let Some(running) = state.running.get(&id) {
                running.cancel.cancel();
                return true;
            }
            let index = state.pending.iter().position(|p| p.job.id == id);
            index.and_then(|index| state.pending.remove(index))
        };
        removed.map(PendingJob::finish_cancelled).is_some()
    }

    /// Cancel every queued and running job of `chat_id`. Returns how many
    /// jobs were affected.
    pub fn cancel_chat(&self, chat_id: i64) -> usize {
        let (removed, signalled) = {
            let mut state = self.lock();
            let (removed, kept): (VecDeque<_>, VecDeque<_>) = std::mem::take(&mut state.pending)
                .into_iter()
                .partition(|p| p.job.chat_id == chat_id);
            state.pending = kept;

            let mut signalled = 0;
            for running in state.running.values().filter(|r| r.chat_id == chat_id) {
                running.cancel.cancel();
                signalled += 1;
            }
            (removed, signalled)
        };

        let total = removed.len() + signalled;
        removed.into_iter().for_each(PendingJob::finish_cancelled);
        if total > 0 {
            info!(chat_id, cancelled = total, "Chat jobs cancelled");
        }
        total
    }

    /// Current queue counters
    #[must_use]
    pub fn snapshot(&self) -> QueueSnapshot {
        let state = self.lock();
        QueueSnapshot {
            queued: state.pending.len(),
            running: state.running.len(),
            capacity: self.inner.config.queue_capacity,
            workers: self.inner.config.workers,
        }
    }

    /// Cancel everything and refuse new jobs.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained = std::mem::take(&mut self.lock().pending);
        info!(queued = drained.len(), "Dispatcher shutting down");
        drained.into_iter().for_each(PendingJob::finish_cancelled);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{mock_runner_failing, GatedRunner, StuckRunner};

    fn config(workers: usize, queue_capacity: usize) -> DispatcherConfig {
        DispatcherConfig {
            workers,
            queue_capacity,
            per_chat_exclusive: true,
            job_timeout: Duration::from_secs(600),
        }
    }

    fn job(url: &str, chat_id: i64) -> Job {
        Job::new(url, Some("alice".to_string()), 1, chat_id)
    }

    #[tokio::test]
    async fn test_success_reaches_succeeded() -> Result<(), JobError> {
        let dispatcher = Dispatcher::new(config(2, 4), Arc::new(GatedRunner::open()));

        let Some(report) = dispatcher.submit(job("a", 1))?.wait().await else {
            panic!("no report");
        };
        assert_eq!(report.job.state(), JobState::Succeeded);
        assert!(report.result.is_ok());
        assert_eq!(dispatcher.snapshot().running, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_failure_reaches_failed() -> Result<(), JobError> {
        let dispatcher = Dispatcher::new(config(1, 1), Arc::new(mock_runner_failing("boom")));
        let report = dispatcher.submit(job("a", 1))?.wait().await;
        let Some(report) = report else {
            panic!("no report");
        };
        assert_eq!(report.job.state(), JobState::Failed);
        assert_eq!(report.result.err(), Some(JobError::DownloadFailed("boom".into())));
        Ok(())
    }

    #[tokio::test]
    async fn test_queue_capacity_and_positions() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(1, 2), runner.clone());

        let _first = dispatcher.submit(job("1", 1))?;
        let second = dispatcher.submit(job("2", 2))?;
        let third = dispatcher.submit(job("3", 3))?;
        assert_eq!(
            dispatcher.submit(job("4", 4)).err(),
            Some(JobError::QueueFull { capacity: 2 })
        );

        assert_eq!(dispatcher.position(second.id()), Some(1));
        assert_eq!(dispatcher.position(third.id()), Some(2));
        assert_eq!(
            dispatcher.snapshot(),
            QueueSnapshot {
                queued: 2,
                running: 1,
                capacity: 2,
                workers: 1
            }
        );
        dispatcher.shutdown();
        Ok(())
    }

    #[tokio::test]
    async fn test_same_chat_runs_one_at_a_time_in_order() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(2, 8), runner.clone());

        let a1 = dispatcher.submit(job("a1", 1))?;
        let a2 = dispatcher.submit(job("a2", 1))?;
        let b1 = dispatcher.submit(job("b1", 2))?;

        // a2 waits for a1 while b1 takes the second slot
        let snapshot = dispatcher.snapshot();
        assert_eq!((snapshot.running, snapshot.queued), (2, 1));
        assert_eq!(dispatcher.position(a2.id()), Some(1));

        runner.release(3);
        for handle in [a1, a2, b1] {
            assert!(handle.wait().await.is_some());
        }

        let started = runner.started();
        let pos = |url: &str| started.iter().position(|u| u == url);
        assert!(pos("a1") < pos("a2"));
        assert_eq!(runner.max_overlap(1), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_without_exclusivity_same_chat_runs_in_parallel() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let mut cfg = config(2, 8);
        cfg.per_chat_exclusive = false;
        let dispatcher = Dispatcher::new(cfg, runner.clone());

        let a1 = dispatcher.submit(job("a1", 1))?;
        let a2 = dispatcher.submit(job("a2", 1))?;
        assert_eq!(dispatcher.snapshot().running, 2);

        runner.release(2);
        assert!(a1.wait().await.is_some());
        assert!(a2.wait().await.is_some());
        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_queued_job_never_runs() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(1, 4), runner.clone());

        let first = dispatcher.submit(job("first", 1))?;
        let second = dispatcher.submit(job("second", 2))?;
        assert!(dispatcher.cancel(second.id()));

        let Some(report) = second.wait().await else {
            panic!("no report");
        };
        assert_eq!(report.job.state(), JobState::Cancelled);
        assert_eq!(report.result.err(), Some(JobError::Cancelled));

        runner.release(1);
        assert!(first.wait().await.is_some());
        assert_eq!(runner.started(), vec!["first".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_running_job() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(1, 4), runner.clone());

        let handle = dispatcher.submit(job("a", 1))?;
        let id = handle.id();
        assert!(dispatcher.cancel(id));

        let Some(report) = handle.wait().await else {
            panic!("no report");
        };
        assert_eq!(report.job.state(), JobState::Cancelled);
        assert!(!dispatcher.cancel(id));
        assert_eq!(dispatcher.snapshot().running, 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_cancel_chat_only_touches_that_chat() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(1, 4), runner.clone());

        let a1 = dispatcher.submit(job("a1", 1))?;
        let b1 = dispatcher.submit(job("b1", 2))?;
        let a2 = dispatcher.submit(job("a2", 1))?;

        assert_eq!(dispatcher.cancel_chat(1), 2);
        for handle in [a1, a2] {
            let report = handle.wait().await;
            assert_eq!(report.map(|r| r.job.state()), Some(JobState::Cancelled));
        }

        runner.release(1);
        let report = b1.wait().await;
        assert_eq!(report.map(|r| r.job.state()), Some(JobState::Succeeded));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_fails_job_within_limit() -> Result<(), JobError> {
        let mut cfg = config(1, 1);
        cfg.job_timeout = Duration::from_secs(30);
        let dispatcher = Dispatcher::new(cfg, Arc::new(StuckRunner));

        let started = tokio::time::Instant::now();
        let Some(report) = dispatcher.submit(job("slow", 1))?.wait().await else {
            panic!("no report");
        };
        assert_eq!(report.job.state(), JobState::Failed);
        assert_eq!(
            report.result.err(),
            Some(JobError::Timeout {
                after: Duration::from_secs(30)
            })
        );
        assert!(started.elapsed() < Duration::from_secs(31));
        Ok(())
    }

    #[tokio::test]
    async fn test_shutdown_cancels_and_rejects() -> Result<(), JobError> {
        let runner = Arc::new(GatedRunner::closed());
        let dispatcher = Dispatcher::new(config(1, 4), runner.clone());

        let running = dispatcher.submit(job("a", 1))?;
        let queued = dispatcher.submit(job("b", 2))?;
        dispatcher.shutdown();

        for handle in [running, queued] {
            let report = handle.wait().await;
            assert_eq!(report.map(|r| r.job.state()), Some(JobState::Cancelled));
        }
        assert_eq!(
            dispatcher.submit(job("c", 3)).err(),
            Some(JobError::Cancelled)
        );
        Ok(())
    }
}
