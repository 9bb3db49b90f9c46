//! Usage counter persistence.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, UsageCounter};

use crate::db::{from_millis, storage_err, to_millis, Database};

/// Repository for per-account, per-category usage counters.
pub struct UsageRepository {
    db: Arc<Database>,
}

impl UsageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Read, transform, and write back one counter as a single unit.
    ///
    /// `op` receives the stored counter (or `None` if the account has never
    /// used this category) and returns the counter to persist. No other
    /// caller can observe or modify the row between the read and the write.
    pub fn update(
        &self,
        account: &AccountId,
        category: ActionCategory,
        op: &mut dyn FnMut(Option<UsageCounter>) -> UsageCounter,
    ) -> Result<UsageCounter, TaskMasterError> {
        self.db.with_conn(|conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(storage_err("Failed to begin usage transaction"))?;

            let current = load(&tx, account, category)?;
            let next = op(current);

            tx.execute(
                "INSERT INTO usage_counters (account_id, category, used, limit_value, period_start)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (account_id, category) DO UPDATE SET
                     used = excluded.used,
                     limit_value = excluded.limit_value,
                     period_start = excluded.period_start",
                rusqlite::params![
                    account.as_str(),
                    category.to_string(),
                    next.used,
                    next.limit,
                    to_millis(next.period_start),
                ],
            )
            .map_err(storage_err("Failed to save usage counter"))?;

            tx.commit()
                .map_err(storage_err("Failed to commit usage transaction"))?;
            Ok(next)
        })
    }

    /// Fetch one counter without modifying it.
    pub fn get(
        &self,
        account: &AccountId,
        category: ActionCategory,
    ) -> Result<Option<UsageCounter>, TaskMasterError> {
        self.db.with_conn(|conn| load(conn, account, category))
    }
}

fn load(
    conn: &Connection,
    account: &AccountId,
    category: ActionCategory,
) -> Result<Option<UsageCounter>, TaskMasterError> {
    let result = conn
        .query_row(
            "SELECT account_id, category, used, limit_value, period_start
             FROM usage_counters WHERE account_id = ?1 AND category = ?2",
            rusqlite::params![account.as_str(), category.to_string()],
            row_to_counter,
        )
        .optional()
        .map_err(storage_err("Failed to load usage counter"))?;

    match result {
        Some(counter) => Ok(Some(counter?)),
        None => Ok(None),
    }
}

fn row_to_counter(
    row: &rusqlite::Row<'_>,
) -> rusqlite::Result<Result<UsageCounter, TaskMasterError>> {
    let account_id: String = row.get(0)?;
    let category: String = row.get(1)?;
    let used: u32 = row.get(2)?;
    let limit: Option<u32> = row.get(3)?;
    let period_start: i64 = row.get(4)?;

    Ok(category.parse::<ActionCategory>().map(|category| UsageCounter {
        account_id: AccountId::new(account_id),
        category,
        used,
        limit,
        period_start: from_millis(period_start),
    }))
}
