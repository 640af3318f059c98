//! Job records and their lifecycle state.

pub mod options;

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use options::{
    required_credits, OutputFormat, ProcessingOptions, Quality, QualityPreset, VideoLimits,
};

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "processing" => Some(JobStatus::Processing),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    /// Returns true once no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output of a successfully processed job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JobResult {
    /// Location of the rendered video.
    pub output_path: PathBuf,
    /// Duration of the rendered video in seconds.
    pub duration_seconds: u32,
    /// Size of the rendered file in bytes.
    pub size_bytes: u64,
}

/// One requested video-processing task.
///
/// `result` is only present for completed jobs and `error` only for failed
/// ones. Both are set exactly once, by the transition that enters the
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    pub owner_id: String,
    pub input_path: PathBuf,
    pub options: ProcessingOptions,
    pub status: JobStatus,
    /// Percentage in `0..=100`.
    pub progress: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JobResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a pending job with a fresh identifier.
    pub fn new(owner_id: &str, input_path: PathBuf, options: ProcessingOptions) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner_id: owner_id.to_string(),
            input_path,
            options,
            status: JobStatus::Pending,
            progress: 0.0,
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status.is_terminal()
    }

    /// Moves a pending job to processing. Returns false for any other status.
    pub(crate) fn start(&mut self) -> bool {
        if self.status != JobStatus::Pending {
            return false;
        }
        self.status = JobStatus::Processing;
        self.progress = 0.0;
        self.touch();
        true
    }

    /// Raises the progress percentage while processing. Lower values are ignored.
    pub(crate) fn advance(&mut self, percent: f64) -> bool {
        if self.status != JobStatus::Processing || !percent.is_finite() {
            return false;
        }
        let percent = percent.clamp(0.0, 100.0);
        if percent <= self.progress {
            return false;
        }
        self.progress = percent;
        self.touch();
        true
    }

    pub(crate) fn complete(&mut self, result: JobResult) -> bool {
        if self.status != JobStatus::Processing {
            return false;
        }
        self.status = JobStatus::Completed;
        self.progress = 100.0;
        self.result = Some(result);
        self.touch();
        true
    }

    /// Marks the job failed. Accepted from pending as well so that jobs
    /// interrupted before dispatch (e.g. by a restart) can be closed out.
    pub(crate) fn fail(&mut self, error: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Failed;
        self.error = Some(error.to_string());
        self.touch();
        true
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
