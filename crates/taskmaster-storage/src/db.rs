//! Database connection management.
//!
//! Wraps a single rusqlite Connection in a Mutex. Every repository goes
//! through [`Database::with_conn`], so a closure passed to it runs with
//! exclusive access to the connection.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::Connection;
use tracing::info;

use taskmaster_core::error::TaskMasterError;

use crate::migrations;

/// Thread-safe SQLite database wrapper.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) a database at the given path and run migrations.
    pub fn new(path: &Path) -> Result<Self, TaskMasterError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)
            .map_err(|e| TaskMasterError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| TaskMasterError::Storage(format!("Failed to set pragmas: {}", e)))?;

        info!("Database opened at {}", path.display());
        Self::from_connection(conn)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, TaskMasterError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| TaskMasterError::Storage(format!("Failed to open in-memory db: {}", e)))?;
        Self::from_connection(conn)
    }

    fn from_connection(conn: Connection) -> Result<Self, TaskMasterError> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Execute a closure with the underlying connection.
    ///
    /// The mutex is held for the duration of the closure, which is what
    /// makes read-modify-write sequences in the repositories atomic.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, TaskMasterError>
    where
        F: FnOnce(&Connection) -> Result<T, TaskMasterError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| TaskMasterError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

/// Map a rusqlite error into the shared storage error.
pub(crate) fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> TaskMasterError + '_ {
    move |e| TaskMasterError::Storage(format!("{}: {}", context, e))
}

/// Timestamps are stored as unix milliseconds.
pub(crate) fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

pub(crate) fn from_millis(ms: i64) -> DateTime<Utc> {
    Utc.timestamp_millis_opt(ms).single().unwrap_or_default()
}
