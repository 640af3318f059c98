//! Video-processing collaborator invoked by the queue at dispatch.

pub mod ffmpeg;

use std::path::PathBuf;

use async_trait::async_trait;

use crate::error::ProcessError;
use crate::job::{Job, ProcessingOptions};
use crate::progress::ProgressReporter;

pub use ffmpeg::FfmpegProcessor;

/// Everything a processor needs to render one job.
#[derive(Debug, Clone)]
pub struct ProcessingRequest {
    pub job_id: String,
    pub input_path: PathBuf,
    pub options: ProcessingOptions,
}

impl From<&Job> for ProcessingRequest {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            input_path: job.input_path.clone(),
            options: job.options.clone(),
        }
    }
}

/// A rendered output file.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedVideo {
    pub output_path: PathBuf,
    pub duration_seconds: u32,
    pub size_bytes: u64,
}

/// Renders a job's input according to its options.
///
/// Implementations report intermediate stages through `progress`. The queue
/// publishes the terminal `completed`/`failed` snapshots itself, so
/// processors only need to return.
#[async_trait]
pub trait VideoProcessor: Send + Sync {
    async fn process(
        &self,
        request: &ProcessingRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<ProcessedVideo, ProcessError>;
}
