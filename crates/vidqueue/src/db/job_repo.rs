//! Job repository — CRUD operations for the `jobs` table.

use std::path::PathBuf;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Row};

use super::{Database, DatabaseError};
use crate::job::{Job, JobResult, JobStatus, ProcessingOptions};

/// A raw job row from the database.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: String,
    pub owner_id: String,
    pub input_path: String,
    pub options: String,
    pub status: String,
    pub progress: f64,
    pub output_path: Option<String>,
    pub output_duration: Option<i64>,
    pub output_size: Option<i64>,
    pub error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            owner_id: row.get("owner_id")?,
            input_path: row.get("input_path")?,
            options: row.get("options")?,
            status: row.get("status")?,
            progress: row.get("progress")?,
            output_path: row.get("output_path")?,
            output_duration: row.get("output_duration")?,
            output_size: row.get("output_size")?,
            error: row.get("error")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    /// Builds a row from a job record.
    pub fn from_job(job: &Job) -> Result<Self, DatabaseError> {
        let options = serde_json::to_string(&job.options).map_err(|e| DatabaseError::CorruptRow {
            id: job.id.clone(),
            reason: format!("options not serializable: {}", e),
        })?;

        Ok(Self {
            id: job.id.clone(),
            owner_id: job.owner_id.clone(),
            input_path: job.input_path.to_string_lossy().to_string(),
            options,
            status: job.status.as_str().to_string(),
            progress: job.progress,
            output_path: job
                .result
                .as_ref()
                .map(|r| r.output_path.to_string_lossy().to_string()),
            output_duration: job.result.as_ref().map(|r| i64::from(r.duration_seconds)),
            output_size: job
                .result
                .as_ref()
                .map(|r| i64::try_from(r.size_bytes).unwrap_or(i64::MAX)),
            error: job.error.clone(),
            created_at: format_timestamp(job.created_at),
            updated_at: format_timestamp(job.updated_at),
        })
    }

    /// Decodes the row back into a job record.
    pub fn into_job(self) -> Result<Job, DatabaseError> {
        let corrupt = |reason: String| DatabaseError::CorruptRow {
            id: self.id.clone(),
            reason,
        };

        let status = JobStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let options: ProcessingOptions = serde_json::from_str(&self.options)
            .map_err(|e| corrupt(format!("invalid options: {}", e)))?;
        let created_at = parse_timestamp(&self.created_at).map_err(&corrupt)?;
        let updated_at = parse_timestamp(&self.updated_at).map_err(&corrupt)?;

        let result = match (status, &self.output_path) {
            (JobStatus::Completed, Some(path)) => Some(JobResult {
                output_path: PathBuf::from(path),
                duration_seconds: self
                    .output_duration
                    .and_then(|d| u32::try_from(d).ok())
                    .unwrap_or(options.duration_seconds),
                size_bytes: self
                    .output_size
                    .and_then(|s| u64::try_from(s).ok())
                    .unwrap_or(0),
            }),
            (JobStatus::Completed, None) => {
                return Err(corrupt("completed job without output path".to_string()))
            }
            _ => None,
        };
        let error = if status == JobStatus::Failed {
            Some(self.error.clone().unwrap_or_default())
        } else {
            None
        };

        Ok(Job {
            id: self.id.clone(),
            owner_id: self.owner_id.clone(),
            input_path: PathBuf::from(&self.input_path),
            options,
            status,
            progress: self.progress,
            result,
            error,
            created_at,
            updated_at,
        })
    }
}

/// Fixed-width RFC 3339 so that text ordering matches time ordering.
fn format_timestamp(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp '{}': {}", s, e))
}

/// Inserts a job row, replacing any row with the same id.
pub fn upsert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, owner_id, input_path, options, status, progress,
             output_path, output_duration, output_size, error, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
             ON CONFLICT(id) DO UPDATE SET
               status=excluded.status, progress=excluded.progress,
               output_path=excluded.output_path, output_duration=excluded.output_duration,
               output_size=excluded.output_size, error=excluded.error,
               updated_at=excluded.updated_at",
            params![
                job.id,
                job.owner_id,
                job.input_path,
                job.options,
                job.status,
                job.progress,
                job.output_path,
                job.output_duration,
                job.output_size,
                job.error,
                job.created_at,
                job.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Deletes a job row. Returns true if a row was removed.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM jobs WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Returns all jobs in the order they were first written.
///
/// `created_at` is taken before admission finishes, so it can disagree with
/// queue order under concurrent submits. The rowid cannot.
pub fn list_all(db: &Database) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM jobs ORDER BY rowid ASC")?;
        let rows = stmt
            .query_map([], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Returns the jobs of one owner in submission order.
pub fn list_by_owner(db: &Database, owner_id: &str) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM jobs WHERE owner_id = ?1 ORDER BY rowid ASC",
        )?;
        let rows = stmt
            .query_map(params![owner_id], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
