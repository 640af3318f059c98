//! Job lifecycle broadcaster.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::Job;

/// What happened to a job.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum JobEventKind {
    Added,
    Updated,
    Cancelled,
    Completed,
    Failed,
    Removed,
}

/// Snapshot of a job taken right after a lifecycle change.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobEvent {
    pub kind: JobEventKind,
    pub job: Job,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    pub fn new(kind: JobEventKind, job: Job) -> Self {
        Self {
            kind,
            job,
            timestamp: Utc::now(),
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job.id
    }
}

/// Fan-out of [`JobEvent`]s to any number of receivers.
#[derive(Clone)]
pub struct JobEventBroadcaster {
    sender: Arc<broadcast::Sender<JobEvent>>,
}

impl JobEventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn send(&self, kind: JobEventKind, job: Job) {
        log::debug!("Job {} {:?}", job.id, kind);
        // No active receivers is fine
        let _ = self.sender.send(JobEvent::new(kind, job));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.sender.subscribe()
    }
}

impl Default for JobEventBroadcaster {
    fn default() -> Self {
        Self::new(100)
    }
}
