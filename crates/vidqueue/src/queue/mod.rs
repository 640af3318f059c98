//! Credit-gated job queue with bounded-concurrency dispatch.
//!
//! [`JobQueue`] owns the lifecycle of every job:
//!
//! ```text
//! pending --(dispatch + debit)--> processing --> completed | failed
//! pending --(cancel)--> removed
//! ```
//!
//! Jobs are dispatched strictly in submission order, at most
//! `max_concurrent` at a time. Processing errors (including a failed
//! dispatch-time debit or a panicking processor) are recorded on the job and
//! never stop the queue.

pub mod events;
pub mod store;

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::{Config, CreditPolicy};
use crate::credits::CreditLedger;
use crate::db::{Database, DatabaseError};
use crate::error::QueueError;
use crate::job::{required_credits, Job, JobResult, JobStatus, ProcessingOptions, VideoLimits};
use crate::processor::{FfmpegProcessor, ProcessedVideo, ProcessingRequest, VideoProcessor};
use crate::progress::{JobProgress, ProcessingStage, ProgressReporter, ProgressTracker};

pub use events::{JobEvent, JobEventBroadcaster, JobEventKind};
pub use store::{JobStore, QueueStatus, Removal, INTERRUPTED_BY_RESTART};

/// Tunables for a [`JobQueue`].
#[derive(Debug, Clone)]
pub struct QueueSettings {
    pub max_concurrent: usize,
    pub credits_per_minute: u64,
    pub credit_policy: CreditPolicy,
    pub limits: VideoLimits,
    pub event_capacity: usize,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for QueueSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_concurrent: config.queue.max_concurrent,
            credits_per_minute: config.queue.credits_per_minute,
            credit_policy: config.queue.credit_policy,
            limits: config.limits.clone(),
            event_capacity: config.progress.event_capacity,
        }
    }
}

struct QueueInner {
    settings: QueueSettings,
    store: Arc<JobStore>,
    ledger: Arc<dyn CreditLedger>,
    processor: Arc<dyn VideoProcessor>,
    tracker: ProgressTracker,
    events: JobEventBroadcaster,
    /// Cleared while a restored backlog waits for [`JobQueue::resume`].
    dispatching: AtomicBool,
}

/// Shared handle to the queue. Cloning is cheap.
///
/// Dispatch spawns onto the ambient tokio runtime, so the mutating
/// operations must be called from within one.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

impl JobQueue {
    /// Memory-only queue.
    pub fn new(
        settings: QueueSettings,
        ledger: Arc<dyn CreditLedger>,
        processor: Arc<dyn VideoProcessor>,
        tracker: ProgressTracker,
    ) -> Self {
        Self::with_store(settings, ledger, processor, tracker, JobStore::new())
    }

    /// Queue whose jobs are written through to `db`.
    ///
    /// Previously persisted jobs are restored. If any of them are still
    /// pending, dispatch is held until [`JobQueue::resume`] is called: jobs
    /// submitted in the meantime queue up behind the backlog.
    pub fn with_database(
        settings: QueueSettings,
        ledger: Arc<dyn CreditLedger>,
        processor: Arc<dyn VideoProcessor>,
        tracker: ProgressTracker,
        db: Database,
    ) -> Result<Self, DatabaseError> {
        let store = JobStore::with_database(db)?;
        let backlog = store.status().pending;
        let queue = Self::with_store(settings, ledger, processor, tracker, store);
        if backlog > 0 {
            log::info!("{} restored jobs wait for resume", backlog);
            queue.inner.dispatching.store(false, Ordering::SeqCst);
        }
        Ok(queue)
    }

    /// Builds a queue from a loaded [`Config`]: an [`FfmpegProcessor`] per
    /// `storage`, a tracker per `progress.channel_capacity`, and SQLite
    /// persistence when `storage.database_path` is set.
    ///
    /// [`FfmpegProcessor`]: crate::processor::FfmpegProcessor
    pub fn from_config(
        config: &Config,
        ledger: Arc<dyn CreditLedger>,
    ) -> Result<Self, DatabaseError> {
        let processor = Arc::new(FfmpegProcessor::new(
            &config.storage.ffmpeg_binary,
            &config.storage.output_directory,
        ));
        let tracker = ProgressTracker::new(config.progress.channel_capacity);
        let settings = QueueSettings::from(config);

        match &config.storage.database_path {
            Some(path) => {
                let db = Database::open(path)?;
                Self::with_database(settings, ledger, processor, tracker, db)
            }
            None => Ok(Self::new(settings, ledger, processor, tracker)),
        }
    }

    fn with_store(
        settings: QueueSettings,
        ledger: Arc<dyn CreditLedger>,
        processor: Arc<dyn VideoProcessor>,
        tracker: ProgressTracker,
        store: JobStore,
    ) -> Self {
        let events = JobEventBroadcaster::new(settings.event_capacity);
        Self {
            inner: Arc::new(QueueInner {
                settings,
                store: Arc::new(store),
                ledger,
                processor,
                tracker,
                events,
                dispatching: AtomicBool::new(true),
            }),
        }
    }

    pub fn settings(&self) -> &QueueSettings {
        &self.inner.settings
    }

    pub fn tracker(&self) -> &ProgressTracker {
        &self.inner.tracker
    }

    /// Validates and enqueues a job, returning its id without waiting for
    /// processing.
    ///
    /// Fails with [`QueueError::InsufficientCredits`] when the owner's
    /// balance does not cover the job; no job is created in that case.
    pub async fn submit(
        &self,
        owner_id: &str,
        input_path: impl Into<PathBuf>,
        options: ProcessingOptions,
    ) -> Result<String, QueueError> {
        let input_path = input_path.into();
        let settings = &self.inner.settings;
        settings.limits.validate(owner_id, &input_path, &options)?;

        let required = required_credits(options.duration_seconds, settings.credits_per_minute);
        let job = Job::new(owner_id, input_path, options);

        match settings.credit_policy {
            CreditPolicy::DebitOnDispatch => {
                let available = self.inner.ledger.balance(owner_id).await?;
                if available < required {
                    return Err(QueueError::InsufficientCredits {
                        required,
                        available,
                    });
                }
            }
            CreditPolicy::ReserveOnSubmit if required > 0 => {
                self.inner
                    .ledger
                    .debit(owner_id, required, &format!("reserve job {}", job.id))
                    .await?;
            }
            CreditPolicy::ReserveOnSubmit => {}
        }

        let job_id = job.id.clone();
        log::info!(
            "Job {} submitted by {} ({}s, {} credits)",
            job_id,
            owner_id,
            job.options.duration_seconds,
            required
        );
        self.inner.store.insert(job.clone());
        self.inner.events.send(JobEventKind::Added, job);

        self.dispatch();
        Ok(job_id)
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.inner.store.get(job_id)
    }

    /// Every job of `owner_id`, in submission order.
    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Job> {
        self.inner.store.list_by_owner(owner_id)
    }

    /// Removes a job that has not been dispatched yet.
    ///
    /// Returns false without effect for unknown or already dispatched jobs.
    pub async fn cancel(&self, job_id: &str) -> bool {
        self.try_cancel(job_id).await.is_ok()
    }

    /// Same as [`JobQueue::cancel`], reporting why a cancel was refused.
    pub async fn try_cancel(&self, job_id: &str) -> Result<(), QueueError> {
        let job = match self
            .inner
            .store
            .remove_if(job_id, |j| j.status == JobStatus::Pending)
        {
            Removal::Removed(job) => job,
            Removal::Rejected(job) => {
                return Err(QueueError::InvalidTransition {
                    job_id: job.id,
                    status: job.status,
                    action: "cancel",
                })
            }
            Removal::Missing => return Err(QueueError::NotFound(job_id.to_string())),
        };

        log::info!("Job {} cancelled", job.id);
        if self.inner.settings.credit_policy == CreditPolicy::ReserveOnSubmit {
            self.refund_reservation(&job).await;
        }
        self.inner.events.send(JobEventKind::Cancelled, job);
        Ok(())
    }

    async fn refund_reservation(&self, job: &Job) {
        let amount = required_credits(
            job.options.duration_seconds,
            self.inner.settings.credits_per_minute,
        );
        if amount == 0 {
            return;
        }
        let reason = format!("refund cancelled job {}", job.id);
        if let Err(e) = self.inner.ledger.refund(&job.owner_id, amount, &reason).await {
            log::error!("Failed to refund {} credits for job {}: {}", amount, job.id, e);
        }
    }

    /// Resubmits a failed job as a brand-new job with the same owner, input
    /// and options. Returns the new job id.
    pub async fn retry(&self, job_id: &str) -> Result<String, QueueError> {
        let job = self
            .get(job_id)
            .ok_or_else(|| QueueError::NotFound(job_id.to_string()))?;
        if job.status != JobStatus::Failed {
            return Err(QueueError::InvalidTransition {
                job_id: job.id,
                status: job.status,
                action: "retry",
            });
        }
        self.submit(&job.owner_id, job.input_path, job.options).await
    }

    /// Deletes a finished job. Its progress snapshot, if any, is left alone.
    pub fn remove(&self, job_id: &str) -> Result<Job, QueueError> {
        match self.inner.store.remove_if(job_id, |j| j.is_finished()) {
            Removal::Removed(job) => {
                self.inner.events.send(JobEventKind::Removed, job.clone());
                Ok(job)
            }
            Removal::Rejected(job) => Err(QueueError::InvalidTransition {
                job_id: job.id,
                status: job.status,
                action: "remove",
            }),
            Removal::Missing => Err(QueueError::NotFound(job_id.to_string())),
        }
    }

    pub fn queue_status(&self) -> QueueStatus {
        self.inner.store.status()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Releases dispatch held after a restart and fills free slots.
    /// Returns how many jobs were pending.
    pub fn resume(&self) -> usize {
        let pending = self.queue_status().pending;
        if pending > 0 {
            log::info!("Resuming {} pending jobs", pending);
        }
        self.inner.dispatching.store(true, Ordering::SeqCst);
        self.dispatch();
        pending
    }

    /// Fills free slots with the earliest pending jobs.
    fn dispatch(&self) {
        if !self.inner.dispatching.load(Ordering::SeqCst) {
            return;
        }
        while let Some(job) = self
            .inner
            .store
            .claim_next(self.inner.settings.max_concurrent)
        {
            self.inner.events.send(JobEventKind::Updated, job.clone());

            let span = tracing::info_span!("job", job_id = %job.id, owner_id = %job.owner_id);
            let queue = self.clone();
            tokio::spawn(async move { queue.run_job(job).await }.instrument(span));
        }
    }

    async fn run_job(self, job: Job) {
        let store = Arc::clone(&self.inner.store);
        let job_id = job.id.clone();
        let reporter = JobProgress::with_listener(&job.id, self.inner.tracker.clone(), move |p| {
            store.update(&job_id, |j| j.advance(p));
        });
        reporter.stage(ProcessingStage::Initializing);
        tracing::info!("processing started");

        match self.execute(&job, &reporter).await {
            Ok(video) => {
                let result = JobResult {
                    output_path: video.output_path,
                    duration_seconds: video.duration_seconds,
                    size_bytes: video.size_bytes,
                };
                reporter.completed();
                if let Some(done) = self.inner.store.finish(&job.id, |j| j.complete(result)) {
                    if let Some(result) = &done.result {
                        tracing::info!(output = %result.output_path.display(), "job completed");
                    }
                    self.inner.events.send(JobEventKind::Completed, done);
                }
            }
            Err(err) => {
                let message = failure_message(&err);
                reporter.failed(&message);
                if let Some(failed) = self.inner.store.finish(&job.id, |j| j.fail(&message)) {
                    tracing::warn!(error = %message, "job failed");
                    self.inner.events.send(JobEventKind::Failed, failed);
                }
            }
        }

        self.dispatch();
    }

    /// Debits the job (unless reserved at submission) and runs the processor.
    async fn execute(
        &self,
        job: &Job,
        reporter: &dyn ProgressReporter,
    ) -> Result<ProcessedVideo, QueueError> {
        let settings = &self.inner.settings;
        if settings.credit_policy == CreditPolicy::DebitOnDispatch {
            let required = required_credits(job.options.duration_seconds, settings.credits_per_minute);
            if required > 0 {
                let balance = self
                    .inner
                    .ledger
                    .debit(&job.owner_id, required, &format!("process job {}", job.id))
                    .await?;
                tracing::debug!(debited = required, balance, "credits debited");
            }
        }

        let request = ProcessingRequest::from(job);
        let processing = self.inner.processor.process(&request, reporter);
        match AssertUnwindSafe(processing).catch_unwind().await {
            Ok(Ok(video)) => Ok(video),
            Ok(Err(e)) => Err(QueueError::ProcessingFailure(e.to_string())),
            Err(panic) => Err(QueueError::ProcessingFailure(panic_message(panic))),
        }
    }
}

/// Text stored on a failed job.
fn failure_message(err: &QueueError) -> String {
    match err {
        QueueError::ProcessingFailure(cause) => cause.clone(),
        other => other.to_string(),
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    let detail = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("Processor panicked: {}", detail)
}
