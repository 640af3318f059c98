//! Progress tracking for in-flight jobs.
//!
//! The tracker is deliberately independent of the job queue: anything that
//! executes a processing step can report progress through a
//! [`ProgressReporter`] without knowing about queue internals.

pub mod reporter;
pub mod stage;
pub mod tracker;

pub use reporter::{JobProgress, NoopProgress, ProgressReporter};
pub use stage::{
    calculate_overall_progress, format_progress_message, ProcessingStage, FAILED_PROGRESS,
};
pub use tracker::{ProgressSubscription, ProgressTracker, ProgressUpdate, TrackerEvent};
