use std::path::PathBuf;
use thiserror::Error;

use crate::job::JobStatus;

#[derive(Error, Debug)]
pub enum VidqueueError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("Processing error: {0}")]
    Process(#[from] ProcessError),

    #[error("Credit ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] crate::delivery::DeliveryError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Unsupported config file extension: {0}")]
    UnsupportedExtension(String),

    #[error("Failed to initialise logging: {0}")]
    Logging(String),
}

/// Errors surfaced by the job queue's public operations.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Insufficient credits. Required: {required}, Available: {available}")]
    InsufficientCredits { required: u64, available: u64 },

    #[error("Invalid job request: {message}")]
    Validation { message: String },

    #[error("Processing failed: {0}")]
    ProcessingFailure(String),

    #[error("Job not found: {0}")]
    NotFound(String),

    #[error("Cannot {action} job {job_id} while it is {status}")]
    InvalidTransition {
        job_id: String,
        status: JobStatus,
        action: &'static str,
    },

    #[error("Credit ledger unavailable: {0}")]
    Ledger(LedgerError),
}

impl QueueError {
    pub fn validation(message: impl Into<String>) -> Self {
        QueueError::Validation {
            message: message.into(),
        }
    }
}

impl From<LedgerError> for QueueError {
    fn from(err: LedgerError) -> Self {
        match err {
            LedgerError::Insufficient {
                required,
                available,
            } => QueueError::InsufficientCredits {
                required,
                available,
            },
            other => QueueError::Ledger(other),
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Insufficient credits. Required: {required}, Available: {available}")]
    Insufficient { required: u64, available: u64 },

    #[error("Invalid credit amount: {0}")]
    InvalidAmount(u64),

    #[error("Ledger backend failed: {0}")]
    Backend(String),
}

impl From<crate::db::DatabaseError> for LedgerError {
    fn from(err: crate::db::DatabaseError) -> Self {
        LedgerError::Backend(err.to_string())
    }
}

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Input file not found: {0}")]
    InputMissing(PathBuf),

    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run ffmpeg: {0}. Make sure ffmpeg is installed.")]
    Spawn(#[source] std::io::Error),

    #[error("ffmpeg exited with {status}: {stderr}")]
    Ffmpeg { status: String, stderr: String },

    #[error("Failed to inspect output '{path}': {source}")]
    Output {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, VidqueueError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_credits_message() {
        let err = QueueError::InsufficientCredits {
            required: 10,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            "Insufficient credits. Required: 10, Available: 1"
        );
    }

    #[test]
    fn test_ledger_insufficient_maps_to_queue_error() {
        let err: QueueError = LedgerError::Insufficient {
            required: 6,
            available: 4,
        }
        .into();
        assert!(matches!(
            err,
            QueueError::InsufficientCredits {
                required: 6,
                available: 4
            }
        ));

        let err: QueueError = LedgerError::Backend("down".to_string()).into();
        assert!(matches!(err, QueueError::Ledger(_)));
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = QueueError::InvalidTransition {
            job_id: "job-1".to_string(),
            status: JobStatus::Processing,
            action: "cancel",
        };
        assert_eq!(err.to_string(), "Cannot cancel job job-1 while it is processing");
    }
}
