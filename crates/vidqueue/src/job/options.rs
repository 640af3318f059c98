//! Processing options snapshot and request validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Container format of the rendered output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Mp4,
    Mov,
    Webm,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Mp4 => "mp4",
            OutputFormat::Mov => "mov",
            OutputFormat::Webm => "webm",
        }
    }
}

/// Quality tier of the rendered output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
}

/// Encoder settings for a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityPreset {
    pub video_bitrate: &'static str,
    pub audio_bitrate: &'static str,
    pub preset: &'static str,
}

impl Quality {
    pub fn preset(&self) -> QualityPreset {
        match self {
            Quality::Low => QualityPreset {
                video_bitrate: "800k",
                audio_bitrate: "96k",
                preset: "fast",
            },
            Quality::Medium => QualityPreset {
                video_bitrate: "1500k",
                audio_bitrate: "128k",
                preset: "medium",
            },
            Quality::High => QualityPreset {
                video_bitrate: "2500k",
                audio_bitrate: "192k",
                preset: "slow",
            },
        }
    }
}

/// Processing parameters captured at submission time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingOptions {
    /// Offset into the source in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<u32>,
    /// Target duration in seconds. Drives the credit cost.
    pub duration_seconds: u32,
    #[serde(default)]
    pub enhance: bool,
    #[serde(default)]
    pub captions: bool,
    /// Audio file mixed under the original soundtrack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_music: Option<PathBuf>,
    #[serde(default)]
    pub output_format: OutputFormat,
    #[serde(default)]
    pub quality: Quality,
}

impl ProcessingOptions {
    /// Plain options with defaults for everything but the duration.
    pub fn with_duration(duration_seconds: u32) -> Self {
        Self {
            start_time: None,
            duration_seconds,
            enhance: false,
            captions: false,
            background_music: None,
            output_format: OutputFormat::default(),
            quality: Quality::default(),
        }
    }
}

/// Bounds applied to incoming requests.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoLimits {
    #[serde(default = "default_min_duration")]
    pub min_duration_seconds: u32,
    #[serde(default = "default_max_duration")]
    pub max_duration_seconds: u32,
    #[serde(default = "default_input_formats")]
    pub supported_input_formats: Vec<String>,
}

fn default_min_duration() -> u32 {
    10
}

fn default_max_duration() -> u32 {
    3600
}

fn default_input_formats() -> Vec<String> {
    ["mp4", "mov", "avi", "webm"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

impl Default for VideoLimits {
    fn default() -> Self {
        Self {
            min_duration_seconds: default_min_duration(),
            max_duration_seconds: default_max_duration(),
            supported_input_formats: default_input_formats(),
        }
    }
}

impl VideoLimits {
    /// Checks a submission before any job record exists.
    pub fn validate(
        &self,
        owner_id: &str,
        input_path: &Path,
        options: &ProcessingOptions,
    ) -> Result<(), QueueError> {
        if owner_id.trim().is_empty() {
            return Err(QueueError::validation("owner id must not be empty"));
        }

        if input_path.as_os_str().is_empty() {
            return Err(QueueError::validation("input path must not be empty"));
        }

        let extension = input_path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();
        if !self
            .supported_input_formats
            .iter()
            .any(|f| f.eq_ignore_ascii_case(&extension))
        {
            return Err(QueueError::validation(format!(
                "Invalid video format. Supported formats are: {}",
                self.supported_input_formats.join(", ")
            )));
        }

        if options.duration_seconds < self.min_duration_seconds {
            return Err(QueueError::validation(format!(
                "Video duration is too short. Minimum duration is {} seconds",
                self.min_duration_seconds
            )));
        }
        if options.duration_seconds > self.max_duration_seconds {
            return Err(QueueError::validation(format!(
                "Video duration exceeds the maximum limit of {} seconds",
                self.max_duration_seconds
            )));
        }

        if let Some(music) = &options.background_music {
            if music.as_os_str().is_empty() {
                return Err(QueueError::validation(
                    "background music path must not be empty",
                ));
            }
        }

        Ok(())
    }
}

/// Credits charged for processing `duration_seconds` of video.
///
/// Every started minute is billed in full.
pub fn required_credits(duration_seconds: u32, credits_per_minute: u64) -> u64 {
    u64::from(duration_seconds.div_ceil(60)) * credits_per_minute
}
