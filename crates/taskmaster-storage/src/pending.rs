//! Pending action persistence.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, SafetyMode};

use crate::db::{from_millis, storage_err, to_millis, Database};

/// A row from the pending_actions table.
///
/// The intent is stored as opaque JSON and the status as its lowercase
/// name; the action crate owns both types.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingRow {
    pub token: String,
    pub account_id: AccountId,
    pub intent_json: String,
    pub mode: SafetyMode,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

const SELECT_COLUMNS: &str = "SELECT token, account_id, intent_json, mode, status, created_at, expires_at, resolved_at
     FROM pending_actions";

/// Repository for deferred actions awaiting approval.
pub struct PendingRepository {
    db: Arc<Database>,
}

impl PendingRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn insert(&self, row: &PendingRow) -> Result<(), TaskMasterError> {
        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO pending_actions
                    (token, account_id, intent_json, mode, status, created_at, expires_at, resolved_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    row.token,
                    row.account_id.as_str(),
                    row.intent_json,
                    row.mode.to_string(),
                    row.status,
                    to_millis(row.created_at),
                    to_millis(row.expires_at),
                    row.resolved_at.map(to_millis),
                ],
            )
            .map_err(storage_err("Failed to save pending action"))?;
            Ok(())
        })
    }

    pub fn get(&self, token: &str) -> Result<Option<PendingRow>, TaskMasterError> {
        self.db.with_conn(|conn| {
            let result = conn
                .query_row(
                    &format!("{} WHERE token = ?1", SELECT_COLUMNS),
                    rusqlite::params![token],
                    row_to_pending,
                )
                .optional()
                .map_err(storage_err("Failed to load pending action"))?;

            match result {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
    }

    /// Move a token from `from` to `to` only if it is currently in `from`.
    ///
    /// Returns `true` when this call performed the transition. Concurrent
    /// callers racing on the same token see exactly one `true`.
    pub fn compare_and_set(
        &self,
        token: &str,
        from: &str,
        to: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, TaskMasterError> {
        self.db.with_conn(|conn| {
            let changed = conn
                .execute(
                    "UPDATE pending_actions SET status = ?3, resolved_at = ?4
                     WHERE token = ?1 AND status = ?2",
                    rusqlite::params![token, from, to, to_millis(at)],
                )
                .map_err(storage_err("Failed to update pending action"))?;
            Ok(changed == 1)
        })
    }

    /// Pending actions for an account, newest first. `status` filters when set.
    pub fn list_by_account(
        &self,
        account: &AccountId,
        status: Option<&str>,
    ) -> Result<Vec<PendingRow>, TaskMasterError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE account_id = ?1 AND (?2 IS NULL OR status = ?2)
                 ORDER BY created_at DESC, token",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(storage_err("Failed to prepare pending query"))?;
            let rows = stmt
                .query_map(rusqlite::params![account.as_str(), status], row_to_pending)
                .map_err(storage_err("Failed to query pending actions"))?;
            collect(rows)
        })
    }

    /// Still-pending actions whose expiry is at or before `now`.
    pub fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingRow>, TaskMasterError> {
        self.db.with_conn(|conn| {
            let sql = format!(
                "{} WHERE status = 'pending' AND expires_at <= ?1 ORDER BY expires_at",
                SELECT_COLUMNS
            );
            let mut stmt = conn
                .prepare(&sql)
                .map_err(storage_err("Failed to prepare expiry query"))?;
            let rows = stmt
                .query_map(rusqlite::params![to_millis(now)], row_to_pending)
                .map_err(storage_err("Failed to query expired actions"))?;
            collect(rows)
        })
    }
}

fn collect<I>(rows: I) -> Result<Vec<PendingRow>, TaskMasterError>
where
    I: Iterator<Item = rusqlite::Result<Result<PendingRow, TaskMasterError>>>,
{
    let mut out = Vec::new();
    for row in rows {
        out.push(row.map_err(storage_err("Failed to read pending row"))??);
    }
    Ok(out)
}

fn row_to_pending(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<PendingRow, TaskMasterError>> {
    let token: String = row.get(0)?;
    let account_id: String = row.get(1)?;
    let intent_json: String = row.get(2)?;
    let mode: String = row.get(3)?;
    let status: String = row.get(4)?;
    let created_at: i64 = row.get(5)?;
    let expires_at: i64 = row.get(6)?;
    let resolved_at: Option<i64> = row.get(7)?;

    Ok(mode.parse::<SafetyMode>().map(|mode| PendingRow {
        token,
        account_id: AccountId::new(account_id),
        intent_json,
        mode,
        status,
        created_at: from_millis(created_at),
        expires_at: from_millis(expires_at),
        resolved_at: resolved_at.map(from_millis),
    }))
}
