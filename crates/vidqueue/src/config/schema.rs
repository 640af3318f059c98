use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::job::VideoLimits;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub limits: VideoLimits,
    #[serde(default)]
    pub progress: ProgressConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: default_version(),
            queue: QueueConfig::default(),
            limits: VideoLimits::default(),
            progress: ProgressConfig::default(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// When credits leave the owner's account.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditPolicy {
    /// Check the balance at submission, debit when the job is dispatched.
    #[default]
    DebitOnDispatch,
    /// Debit at submission, refund if the job is cancelled before dispatch.
    ReserveOnSubmit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default = "default_credits_per_minute")]
    pub credits_per_minute: u64,
    #[serde(default)]
    pub credit_policy: CreditPolicy,
}

fn default_max_concurrent() -> usize {
    2
}

fn default_credits_per_minute() -> u64 {
    2
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            credits_per_minute: default_credits_per_minute(),
            credit_policy: CreditPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Buffered progress events per tracker subscription.
    #[serde(default = "default_capacity")]
    pub channel_capacity: usize,
    /// Buffered lifecycle events per queue event receiver.
    #[serde(default = "default_capacity")]
    pub event_capacity: usize,
}

fn default_capacity() -> usize {
    100
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            channel_capacity: default_capacity(),
            event_capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// SQLite file for job history and balances. Memory only when absent.
    #[serde(default)]
    pub database_path: Option<PathBuf>,
    #[serde(default = "default_output_directory")]
    pub output_directory: PathBuf,
    #[serde(default = "default_ffmpeg_binary")]
    pub ffmpeg_binary: PathBuf,
}

fn default_output_directory() -> PathBuf {
    std::env::temp_dir().join("vidqueue")
}

fn default_ffmpeg_binary() -> PathBuf {
    PathBuf::from("ffmpeg")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: None,
            output_directory: default_output_directory(),
            ffmpeg_binary: default_ffmpeg_binary(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive, overridden by `RUST_LOG`.
    #[serde(default = "default_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.queue.credits_per_minute, 2);
        assert_eq!(config.queue.credit_policy, CreditPolicy::DebitOnDispatch);
        assert_eq!(config.limits.min_duration_seconds, 10);
        assert_eq!(config.limits.max_duration_seconds, 3600);
        assert_eq!(config.progress.channel_capacity, 100);
        assert!(config.storage.database_path.is_none());
        assert!(config.storage.output_directory.ends_with("vidqueue"));
        assert_eq!(config.logging.format, LogFormat::Text);
    }

    #[test]
    fn test_partial_sections_are_defaulted() {
        let config: Config = serde_json::from_str(
            r#"{ "queue": { "credit_policy": "reserve_on_submit" } }"#,
        )
        .unwrap();
        assert_eq!(config.queue.credit_policy, CreditPolicy::ReserveOnSubmit);
        assert_eq!(config.queue.max_concurrent, 2);
        assert_eq!(config.logging.level, "info");
    }
}
