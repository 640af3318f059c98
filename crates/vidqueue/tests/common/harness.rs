//! Queue wired to an in-memory ledger and the scripted processor.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use vidqueue::{
    CreditLedger, Database, InMemoryLedger, Job, JobQueue, JobStatus, ProgressTracker,
    QueueSettings,
};

use super::processor::ScriptedProcessor;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(5);

pub struct TestHarness {
    temp_dir: TempDir,
    pub queue: JobQueue,
    pub ledger: Arc<InMemoryLedger>,
    pub processor: Arc<ScriptedProcessor>,
    pub tracker: ProgressTracker,
}

impl TestHarness {
    pub fn new(max_concurrent: usize) -> Self {
        Self::with_settings(QueueSettings {
            max_concurrent,
            ..QueueSettings::default()
        })
    }

    pub fn with_settings(settings: QueueSettings) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let ledger = Arc::new(InMemoryLedger::new());
        let processor = Arc::new(ScriptedProcessor::new(temp_dir.path().join("output")));
        let tracker = ProgressTracker::new(100);
        let queue = JobQueue::new(
            settings,
            Arc::clone(&ledger) as Arc<dyn CreditLedger>,
            Arc::clone(&processor) as Arc<dyn vidqueue::VideoProcessor>,
            tracker.clone(),
        );

        Self {
            temp_dir,
            queue,
            ledger,
            processor,
            tracker,
        }
    }

    /// Path of an input file inside the harness directory. The file is not created.
    pub fn input(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join("input").join(name)
    }

    pub fn database_path(&self) -> PathBuf {
        self.temp_dir.path().join("db").join("vidqueue.db")
    }

    /// Builds a database-backed queue sharing this harness's directory.
    pub fn open_persistent(
        &self,
        settings: QueueSettings,
        processor: Arc<ScriptedProcessor>,
    ) -> JobQueue {
        let db = Database::open(&self.database_path()).expect("Failed to open database");
        JobQueue::with_database(
            settings,
            Arc::clone(&self.ledger) as Arc<dyn CreditLedger>,
            processor,
            ProgressTracker::new(100),
            db,
        )
        .expect("Failed to restore queue")
    }
}

/// Polls `probe` until it yields a value or the timeout expires.
pub async fn wait_for<T>(mut probe: impl FnMut() -> Option<T>) -> Option<T> {
    tokio::time::timeout(WAIT_TIMEOUT, async {
        loop {
            if let Some(value) = probe() {
                return value;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await
    .ok()
}

pub async fn wait_for_status(queue: &JobQueue, job_id: &str, status: JobStatus) -> Job {
    wait_for(|| queue.get(job_id).filter(|job| job.status == status))
        .await
        .unwrap_or_else(|| {
            panic!(
                "job {} did not reach {} (currently {:?})",
                job_id,
                status,
                queue.get(job_id).map(|j| j.status)
            )
        })
}

pub async fn wait_for_balance(ledger: &InMemoryLedger, owner_id: &str, expected: u64) {
    let reached = wait_for(|| {
        let balance = futures_util::FutureExt::now_or_never(ledger.balance(owner_id))
            .and_then(|r| r.ok())?;
        (balance == expected).then_some(())
    })
    .await;
    assert!(
        reached.is_some(),
        "balance of {} never reached {}",
        owner_id,
        expected
    );
}

/// Checks that result and error match the job's status.
pub fn assert_job_invariants(job: &Job) {
    match job.status {
        JobStatus::Completed => {
            assert!(job.result.is_some(), "completed job {} has no result", job.id);
            assert!(job.error.is_none(), "completed job {} has an error", job.id);
        }
        JobStatus::Failed => {
            assert!(job.error.is_some(), "failed job {} has no error", job.id);
            assert!(job.result.is_none(), "failed job {} has a result", job.id);
        }
        JobStatus::Pending | JobStatus::Processing => {
            assert!(job.result.is_none(), "active job {} has a result", job.id);
            assert!(job.error.is_none(), "active job {} has an error", job.id);
        }
    }
}
