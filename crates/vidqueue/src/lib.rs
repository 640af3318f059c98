pub mod config;
pub mod credits;
pub mod db;
pub mod delivery;
pub mod error;
pub mod job;
pub mod processor;
pub mod progress;
pub mod queue;
pub mod telemetry;

pub use config::{load_config, Config, CreditPolicy};
pub use credits::{CreditLedger, InMemoryLedger, SqliteLedger};
pub use db::Database;
pub use delivery::{ClientMessage, DeliveryConnection, DeliveryError, JobView, ServerMessage};
pub use error::{ConfigError, LedgerError, ProcessError, QueueError, Result, VidqueueError};
pub use job::{Job, JobResult, JobStatus, OutputFormat, ProcessingOptions, Quality};
pub use processor::{FfmpegProcessor, ProcessedVideo, ProcessingRequest, VideoProcessor};
pub use progress::{ProcessingStage, ProgressTracker, ProgressUpdate};
pub use queue::{JobEvent, JobEventKind, JobQueue, QueueSettings, QueueStatus};
pub use telemetry::init_logging;
