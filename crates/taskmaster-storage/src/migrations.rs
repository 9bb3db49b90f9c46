//! Database schema migrations.
//!
//! Version 1 creates the usage_counters, pending_actions, and audit_log
//! tables alongside the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use taskmaster_core::error::TaskMasterError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), TaskMasterError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| TaskMasterError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| {
            TaskMasterError::Storage(format!("Failed to query migration version: {}", e))
        })?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: Initial schema.
fn apply_v1(conn: &Connection) -> Result<(), TaskMasterError> {
    conn.execute_batch(
        "
        -- One counter per (account, category). limit_value NULL = unlimited.
        CREATE TABLE IF NOT EXISTS usage_counters (
            account_id      TEXT NOT NULL,
            category        TEXT NOT NULL
                            CHECK (category IN ('email_summary', 'schedule_proposal', 'action')),
            used            INTEGER NOT NULL DEFAULT 0 CHECK (used >= 0),
            limit_value     INTEGER,
            period_start    INTEGER NOT NULL,
            PRIMARY KEY (account_id, category)
        );

        CREATE TABLE IF NOT EXISTS pending_actions (
            token           TEXT PRIMARY KEY NOT NULL,
            account_id      TEXT NOT NULL,
            intent_json     TEXT NOT NULL,
            mode            TEXT NOT NULL
                            CHECK (mode IN ('draft', 'confirmation', 'auto')),
            status          TEXT NOT NULL DEFAULT 'pending'
                            CHECK (status IN ('pending', 'approved', 'rejected', 'expired')),
            created_at      INTEGER NOT NULL,
            expires_at      INTEGER NOT NULL,
            resolved_at     INTEGER
        );

        CREATE INDEX IF NOT EXISTS idx_pending_account
            ON pending_actions (account_id, created_at DESC);

        CREATE INDEX IF NOT EXISTS idx_pending_expiry
            ON pending_actions (expires_at)
            WHERE status = 'pending';

        -- Append-only. seq gives a total order per store.
        CREATE TABLE IF NOT EXISTS audit_log (
            seq             INTEGER PRIMARY KEY AUTOINCREMENT,
            timestamp       INTEGER NOT NULL,
            account_id      TEXT NOT NULL,
            intent_kind     TEXT,
            decision        TEXT NOT NULL,
            outcome         TEXT NOT NULL,
            error           TEXT,
            token           TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_audit_account
            ON audit_log (account_id, seq DESC);

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| TaskMasterError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}
