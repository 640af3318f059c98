//! SQLite persistence for job history and credit balances.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;

pub mod credit_repo;
pub mod error;
pub mod job_repo;
pub mod migrations;

pub use error::DatabaseError;

/// How long a write waits for another connection to release the file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared handle to one SQLite connection. Clones share the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens or creates the file at `path` in WAL mode, creating parent
    /// directories, and migrates it to the current schema.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| DatabaseError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }

        let conn = Connection::open(path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        if !mode.eq_ignore_ascii_case("wal") {
            log::warn!("{} stays in {} journal mode", path.display(), mode);
        }

        let db = Self::migrated(conn)?;
        log::info!("Database opened at {}", path.display());
        Ok(db)
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Self::migrated(Connection::open_in_memory()?)
    }

    fn migrated(conn: Connection) -> Result<Self, DatabaseError> {
        migrations::run_all(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// `~/.vidqueue/data/vidqueue.db`, when a home directory is known.
pub fn default_database_path() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".vidqueue").join("data").join("vidqueue.db"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{Job, ProcessingOptions};
    use job_repo::JobRow;

    #[test]
    fn test_file_database_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vidqueue.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        db.with_conn(|conn| {
            let mode: String = conn.query_row("PRAGMA journal_mode", [], |r| r.get(0))?;
            assert_eq!(mode.to_lowercase(), "wal");
            let timeout: i64 = conn.query_row("PRAGMA busy_timeout", [], |r| r.get(0))?;
            assert_eq!(timeout, BUSY_TIMEOUT.as_millis() as i64);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_two_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("vidqueue.db");
        let writer = Database::open(&path).unwrap();
        let reader = Database::open(&path).unwrap();

        let job = Job::new(
            "owner",
            PathBuf::from("/videos/in.mp4"),
            ProcessingOptions::with_duration(60),
        );
        job_repo::upsert(&writer, &JobRow::from_job(&job).unwrap()).unwrap();

        let found = job_repo::find_by_id(&reader, &job.id).unwrap();
        assert_eq!(found.map(|row| row.id), Some(job.id));
    }

    #[test]
    fn test_default_database_path() {
        if let Some(path) = default_database_path() {
            assert!(path.ends_with(".vidqueue/data/vidqueue.db"));
        }
    }
}
