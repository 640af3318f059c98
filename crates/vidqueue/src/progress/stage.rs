//! Processing stages and their static progress tables.

use serde::{Deserialize, Serialize};

/// Percentage reported for the `failed` stage.
pub const FAILED_PROGRESS: f64 = -1.0;

/// Named phase of in-flight processing, in pipeline order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingStage {
    Initializing,
    Downloading,
    Analyzing,
    Processing,
    Enhancing,
    GeneratingCaptions,
    AddingMusic,
    Finalizing,
    Completed,
    Failed,
}

impl ProcessingStage {
    pub const ALL: [ProcessingStage; 10] = [
        ProcessingStage::Initializing,
        ProcessingStage::Downloading,
        ProcessingStage::Analyzing,
        ProcessingStage::Processing,
        ProcessingStage::Enhancing,
        ProcessingStage::GeneratingCaptions,
        ProcessingStage::AddingMusic,
        ProcessingStage::Finalizing,
        ProcessingStage::Completed,
        ProcessingStage::Failed,
    ];

    /// Fixed percentage associated with reaching this stage.
    pub fn weight(&self) -> f64 {
        match self {
            ProcessingStage::Initializing => 0.0,
            ProcessingStage::Downloading => 20.0,
            ProcessingStage::Analyzing => 30.0,
            ProcessingStage::Processing => 50.0,
            ProcessingStage::Enhancing => 70.0,
            ProcessingStage::GeneratingCaptions => 80.0,
            ProcessingStage::AddingMusic => 90.0,
            ProcessingStage::Finalizing => 95.0,
            ProcessingStage::Completed => 100.0,
            ProcessingStage::Failed => FAILED_PROGRESS,
        }
    }

    /// Default activity message shown while in this stage.
    pub fn message(&self) -> &'static str {
        match self {
            ProcessingStage::Initializing => "Initializing video processing...",
            ProcessingStage::Downloading => "Downloading video...",
            ProcessingStage::Analyzing => "Analyzing video content...",
            ProcessingStage::Processing => "Processing video segments...",
            ProcessingStage::Enhancing => "Enhancing video quality...",
            ProcessingStage::GeneratingCaptions => "Generating captions...",
            ProcessingStage::AddingMusic => "Adding background music...",
            ProcessingStage::Finalizing => "Finalizing video...",
            ProcessingStage::Completed => "Processing completed successfully",
            ProcessingStage::Failed => "Processing failed",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            ProcessingStage::Initializing => "Initializing",
            ProcessingStage::Downloading => "Downloading",
            ProcessingStage::Analyzing => "Analyzing",
            ProcessingStage::Processing => "Processing",
            ProcessingStage::Enhancing => "Enhancing",
            ProcessingStage::GeneratingCaptions => "Generating Captions",
            ProcessingStage::AddingMusic => "Adding Music",
            ProcessingStage::Finalizing => "Finalizing",
            ProcessingStage::Completed => "Completed",
            ProcessingStage::Failed => "Failed",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::Initializing => "Setting up video processing environment",
            ProcessingStage::Downloading => "Downloading video content",
            ProcessingStage::Analyzing => "Analyzing video content for best segments",
            ProcessingStage::Processing => "Creating short video clips",
            ProcessingStage::Enhancing => "Applying video enhancements",
            ProcessingStage::GeneratingCaptions => "Creating captions",
            ProcessingStage::AddingMusic => "Adding and mixing background music",
            ProcessingStage::Finalizing => "Finalizing video output",
            ProcessingStage::Completed => "Video processing completed successfully",
            ProcessingStage::Failed => "Video processing failed",
        }
    }

    /// Rough expected time spent in this stage, in seconds.
    pub fn estimated_seconds(&self) -> u32 {
        match self {
            ProcessingStage::Initializing => 5,
            ProcessingStage::Downloading => 30,
            ProcessingStage::Analyzing => 60,
            ProcessingStage::Processing => 120,
            ProcessingStage::Enhancing => 90,
            ProcessingStage::GeneratingCaptions => 45,
            ProcessingStage::AddingMusic => 30,
            ProcessingStage::Finalizing => 15,
            ProcessingStage::Completed | ProcessingStage::Failed => 0,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStage::Completed | ProcessingStage::Failed)
    }
}

impl std::fmt::Display for ProcessingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Blends the weights of the stages visited so far into one percentage.
///
/// A failed stage anywhere yields the failure sentinel, a completed stage
/// yields 100, otherwise the mean weight is capped at 99.
pub fn calculate_overall_progress(stages: &[ProcessingStage]) -> f64 {
    if stages.is_empty() {
        return 0.0;
    }
    if stages.contains(&ProcessingStage::Failed) {
        return FAILED_PROGRESS;
    }
    if stages.contains(&ProcessingStage::Completed) {
        return 100.0;
    }

    let total: f64 = stages.iter().map(|s| s.weight()).sum();
    (total / stages.len() as f64).round().min(99.0)
}

/// Human-readable line for a progress snapshot.
pub fn format_progress_message(stage: ProcessingStage, progress: f64, error: Option<&str>) -> String {
    if let Some(error) = error {
        return format!("Error: {}", error);
    }

    match stage {
        ProcessingStage::Completed => stage.message().to_string(),
        ProcessingStage::Failed => "Processing failed due to an unknown error".to_string(),
        _ => format!("{} ({}%)", stage.message(), progress.round()),
    }
}
