//! Ordered job store with optional write-through to the database.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;

use crate::db::job_repo::{self, JobRow};
use crate::db::{Database, DatabaseError};
use crate::job::{Job, JobStatus};

/// Error recorded on jobs that were mid-render when the process stopped.
pub const INTERRUPTED_BY_RESTART: &str = "Processing interrupted by restart";

/// Counts over every job currently held by the queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
    pub current_jobs: usize,
    pub is_processing: bool,
}

/// Result of a conditional removal.
#[derive(Debug)]
pub enum Removal {
    Removed(Job),
    /// The job exists but the condition did not hold.
    Rejected(Job),
    Missing,
}

#[derive(Default)]
struct State {
    /// Submission order.
    jobs: Vec<Job>,
    current_jobs: usize,
}

/// Job records in submission order plus the dispatch slot counter.
///
/// Both live behind one mutex so that picking the next job and taking a slot
/// happen together.
pub struct JobStore {
    state: Mutex<State>,
    db: Option<Database>,
}

impl JobStore {
    /// Memory-only store.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            db: None,
        }
    }

    /// Store backed by `db`, restoring previously persisted jobs.
    ///
    /// Jobs that were processing when the process stopped cannot be resumed
    /// and are marked failed. Pending jobs keep their place in line.
    pub fn with_database(db: Database) -> Result<Self, DatabaseError> {
        let mut jobs = Vec::new();
        for row in job_repo::list_all(&db)? {
            let id = row.id.clone();
            match row.into_job() {
                Ok(job) => jobs.push(job),
                Err(e) => log::error!("Skipping unreadable job {}: {}", id, e),
            }
        }

        let store = Self {
            state: Mutex::new(State {
                jobs,
                current_jobs: 0,
            }),
            db: Some(db),
        };

        let mut state = store.lock();
        let mut interrupted = 0;
        for job in state.jobs.iter_mut() {
            if job.status == JobStatus::Processing && job.fail(INTERRUPTED_BY_RESTART) {
                store.persist(job);
                interrupted += 1;
            }
        }
        log::info!(
            "Restored {} jobs from database ({} interrupted)",
            state.jobs.len(),
            interrupted
        );
        drop(state);

        Ok(store)
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        match self.state.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                log::warn!("Job store lock was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn persist(&self, job: &Job) {
        let Some(db) = &self.db else {
            return;
        };
        let result = JobRow::from_job(job).and_then(|row| job_repo::upsert(db, &row));
        if let Err(e) = result {
            log::error!("Failed to persist job {}: {}", job.id, e);
        }
    }

    fn forget(&self, job_id: &str) {
        let Some(db) = &self.db else {
            return;
        };
        if let Err(e) = job_repo::delete(db, job_id) {
            log::error!("Failed to delete job {} from database: {}", job_id, e);
        }
    }

    /// Appends a job at the tail of the queue.
    pub fn insert(&self, job: Job) {
        let mut state = self.lock();
        self.persist(&job);
        state.jobs.push(job);
    }

    pub fn get(&self, job_id: &str) -> Option<Job> {
        self.lock().jobs.iter().find(|j| j.id == job_id).cloned()
    }

    pub fn list_by_owner(&self, owner_id: &str) -> Vec<Job> {
        self.lock()
            .jobs
            .iter()
            .filter(|j| j.owner_id == owner_id)
            .cloned()
            .collect()
    }

    /// Applies `change` to a job. The job is persisted only if `change`
    /// reports a modification. Returns the job afterwards.
    pub fn update(&self, job_id: &str, change: impl FnOnce(&mut Job) -> bool) -> Option<Job> {
        let mut state = self.lock();
        let job = state.jobs.iter_mut().find(|j| j.id == job_id)?;
        if change(job) {
            self.persist(job);
        }
        Some(job.clone())
    }

    /// Removes a job if `allowed` holds for it.
    pub fn remove_if(&self, job_id: &str, allowed: impl FnOnce(&Job) -> bool) -> Removal {
        let mut state = self.lock();
        let Some(index) = state.jobs.iter().position(|j| j.id == job_id) else {
            return Removal::Missing;
        };
        if !allowed(&state.jobs[index]) {
            return Removal::Rejected(state.jobs[index].clone());
        }
        let job = state.jobs.remove(index);
        self.forget(&job.id);
        Removal::Removed(job)
    }

    /// Takes a dispatch slot for the earliest pending job, if a slot is free.
    ///
    /// The returned job is already marked processing, so concurrent callers
    /// never claim the same job.
    pub fn claim_next(&self, max_concurrent: usize) -> Option<Job> {
        let mut state = self.lock();
        if state.current_jobs >= max_concurrent {
            return None;
        }
        let job = state
            .jobs
            .iter_mut()
            .find(|j| j.status == JobStatus::Pending)?;
        job.start();
        self.persist(job);
        let claimed = job.clone();
        state.current_jobs += 1;
        Some(claimed)
    }

    /// Applies the terminal transition of a claimed job and frees its slot.
    pub fn finish(&self, job_id: &str, change: impl FnOnce(&mut Job) -> bool) -> Option<Job> {
        let mut state = self.lock();
        state.current_jobs = state.current_jobs.saturating_sub(1);
        let job = state.jobs.iter_mut().find(|j| j.id == job_id)?;
        if change(job) {
            self.persist(job);
        }
        Some(job.clone())
    }

    pub fn status(&self) -> QueueStatus {
        let state = self.lock();
        let mut status = QueueStatus {
            total: state.jobs.len(),
            current_jobs: state.current_jobs,
            is_processing: state.current_jobs > 0,
            ..QueueStatus::default()
        };
        for job in &state.jobs {
            match job.status {
                JobStatus::Pending => status.pending += 1,
                JobStatus::Processing => status.processing += 1,
                JobStatus::Completed => status.completed += 1,
                JobStatus::Failed => status.failed += 1,
            }
        }
        status
    }
}

impl Default for JobStore {
    fn default() -> Self {
        Self::new()
    }
}
