use std::sync::Mutex;

use super::stage::ProcessingStage;
use super::tracker::{ProgressTracker, ProgressUpdate};

/// Sink for progress reported by a processing step.
pub trait ProgressReporter: Send + Sync {
    fn report(&self, stage: ProcessingStage, progress: f64, message: &str);

    /// Reports reaching `stage` at its fixed weight.
    fn stage(&self, stage: ProcessingStage) {
        self.report(stage, stage.weight(), stage.message());
    }
}

/// No-op reporter for unit tests.
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn report(&self, _stage: ProcessingStage, _progress: f64, _message: &str) {}
}

type AdvanceListener = Box<dyn Fn(f64) + Send + Sync>;

/// Reports progress for one job into a [`ProgressTracker`].
///
/// Percentages never move backwards: a report below the highest value seen
/// so far is published at the high-water mark instead.
pub struct JobProgress {
    job_id: String,
    tracker: ProgressTracker,
    high_water: Mutex<f64>,
    on_advance: Option<AdvanceListener>,
}

impl JobProgress {
    pub fn new(job_id: &str, tracker: ProgressTracker) -> Self {
        Self {
            job_id: job_id.to_string(),
            tracker,
            high_water: Mutex::new(0.0),
            on_advance: None,
        }
    }

    /// Same as [`JobProgress::new`], also calling `listener` with each published percentage.
    pub fn with_listener(
        job_id: &str,
        tracker: ProgressTracker,
        listener: impl Fn(f64) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_advance: Some(Box::new(listener)),
            ..Self::new(job_id, tracker)
        }
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Publishes the completed snapshot.
    pub fn completed(&self) {
        self.tracker
            .update(ProgressUpdate::new(&self.job_id, ProcessingStage::Completed));
    }

    /// Publishes the failed snapshot with its cause.
    pub fn failed(&self, error: &str) {
        self.tracker
            .update(ProgressUpdate::failed(&self.job_id, error));
    }

    fn raise(&self, progress: f64) -> f64 {
        let mut high_water = match self.high_water.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        let progress = if progress.is_finite() {
            progress.clamp(0.0, 100.0)
        } else {
            *high_water
        };
        if progress > *high_water {
            *high_water = progress;
        }
        *high_water
    }
}

impl ProgressReporter for JobProgress {
    fn report(&self, stage: ProcessingStage, progress: f64, message: &str) {
        match stage {
            ProcessingStage::Failed => self.failed(message),
            ProcessingStage::Completed => self.completed(),
            _ => {
                let progress = self.raise(progress);
                self.tracker
                    .update(ProgressUpdate::at(&self.job_id, stage, progress, message));
                if let Some(listener) = &self.on_advance {
                    listener(progress);
                }
            }
        }
    }
}
