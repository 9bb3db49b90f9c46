//! Append-only audit trail persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::AccountId;

use crate::db::{from_millis, storage_err, to_millis, Database};

/// A row from the audit_log table.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditRow {
    /// Assigned by the database on append.
    pub seq: Option<i64>,
    pub timestamp: DateTime<Utc>,
    pub account_id: AccountId,
    pub intent_kind: Option<String>,
    pub decision: String,
    pub outcome: String,
    pub error: Option<String>,
    pub token: Option<String>,
}

/// Repository for the audit trail. Rows are never updated or deleted.
pub struct AuditRepository {
    db: Arc<Database>,
}

impl AuditRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Append a row and return its sequence number.
    pub fn append(&self, row: &AuditRow) -> Result<i64, TaskMasterError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO audit_log
                    (timestamp, account_id, intent_kind, decision, outcome, error, token)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    to_millis(row.timestamp),
                    row.account_id.as_str(),
                    row.intent_kind,
                    row.decision,
                    row.outcome,
                    row.error,
                    row.token,
                ],
            )
            .map_err(storage_err("Failed to append audit entry"))?;
            Ok(conn.last_insert_rowid())
        })
    }

    /// Most recent rows, newest first, optionally for one account.
    pub fn recent(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditRow>, TaskMasterError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT seq, timestamp, account_id, intent_kind, decision, outcome, error, token
                     FROM audit_log
                     WHERE ?1 IS NULL OR account_id = ?1
                     ORDER BY seq DESC
                     LIMIT ?2",
                )
                .map_err(storage_err("Failed to prepare audit query"))?;

            let rows = stmt
                .query_map(
                    rusqlite::params![account.map(|a| a.as_str()), limit as i64],
                    row_to_audit,
                )
                .map_err(storage_err("Failed to query audit log"))?;

            let mut out = Vec::new();
            for row in rows {
                out.push(row.map_err(storage_err("Failed to read audit row"))?);
            }
            Ok(out)
        })
    }

    pub fn count(&self) -> Result<u64, TaskMasterError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM audit_log", [], |row| row.get(0))
                .map_err(storage_err("Failed to count audit rows"))?;
            Ok(count as u64)
        })
    }
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuditRow> {
    let timestamp: i64 = row.get(1)?;
    let account_id: String = row.get(2)?;
    Ok(AuditRow {
        seq: Some(row.get(0)?),
        timestamp: from_millis(timestamp),
        account_id: AccountId::new(account_id),
        intent_kind: row.get(3)?,
        decision: row.get(4)?,
        outcome: row.get(5)?,
        error: row.get(6)?,
        token: row.get(7)?,
    })
}
