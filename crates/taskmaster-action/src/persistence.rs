//! SQLite-backed stores.
//!
//! Adapters from the engine's store traits onto the repositories in
//! `taskmaster-storage`. Intents are stored as JSON; enums as their
//! snake_case names.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, UsageCounter};
use taskmaster_storage::{
    AuditRepository, AuditRow, Database, PendingRepository, PendingRow, UsageRepository,
};

use crate::audit::AuditSink;
use crate::coordinator::Stores;
use crate::pending::PendingStore;
use crate::quota::UsageStore;
use crate::types::{AuditEntry, IntentKind, PendingAction, PendingStatus};

impl Stores {
    /// All three stores on one database.
    pub fn sqlite(db: Arc<Database>) -> Self {
        Self {
            usage: Arc::new(SqliteUsageStore::new(Arc::clone(&db))),
            pending: Arc::new(SqlitePendingStore::new(Arc::clone(&db))),
            audit: Arc::new(SqliteAuditSink::new(db)),
        }
    }
}

pub struct SqliteUsageStore {
    repo: UsageRepository,
}

impl SqliteUsageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: UsageRepository::new(db),
        }
    }
}

impl UsageStore for SqliteUsageStore {
    fn update(
        &self,
        account: &AccountId,
        category: ActionCategory,
        op: &mut dyn FnMut(Option<UsageCounter>) -> UsageCounter,
    ) -> Result<UsageCounter, TaskMasterError> {
        self.repo.update(account, category, op)
    }
}

pub struct SqlitePendingStore {
    repo: PendingRepository,
}

impl SqlitePendingStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: PendingRepository::new(db),
        }
    }
}

fn pending_to_row(action: &PendingAction) -> Result<PendingRow, TaskMasterError> {
    Ok(PendingRow {
        token: action.token.clone(),
        account_id: action.account_id.clone(),
        intent_json: serde_json::to_string(&action.intent)?,
        mode: action.mode,
        status: action.status.to_string(),
        created_at: action.created_at,
        expires_at: action.expires_at,
        resolved_at: None,
    })
}

fn row_to_pending(row: PendingRow) -> Result<PendingAction, TaskMasterError> {
    Ok(PendingAction {
        intent: serde_json::from_str(&row.intent_json)?,
        status: row.status.parse()?,
        token: row.token,
        account_id: row.account_id,
        mode: row.mode,
        created_at: row.created_at,
        expires_at: row.expires_at,
    })
}

fn rows_to_pending(rows: Vec<PendingRow>) -> Result<Vec<PendingAction>, TaskMasterError> {
    rows.into_iter().map(row_to_pending).collect()
}

impl PendingStore for SqlitePendingStore {
    fn insert(&self, action: &PendingAction) -> Result<(), TaskMasterError> {
        self.repo.insert(&pending_to_row(action)?)
    }

    fn get(&self, token: &str) -> Result<Option<PendingAction>, TaskMasterError> {
        self.repo.get(token)?.map(row_to_pending).transpose()
    }

    fn compare_and_set(
        &self,
        token: &str,
        from: PendingStatus,
        to: PendingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TaskMasterError> {
        self.repo
            .compare_and_set(token, &from.to_string(), &to.to_string(), at)
    }

    fn list_by_account(
        &self,
        account: &AccountId,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingAction>, TaskMasterError> {
        let status = status.map(|s| s.to_string());
        rows_to_pending(self.repo.list_by_account(account, status.as_deref())?)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingAction>, TaskMasterError> {
        rows_to_pending(self.repo.list_expired(now)?)
    }
}

pub struct SqliteAuditSink {
    repo: AuditRepository,
}

impl SqliteAuditSink {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            repo: AuditRepository::new(db),
        }
    }
}

fn row_to_entry(row: AuditRow) -> Result<AuditEntry, TaskMasterError> {
    Ok(AuditEntry {
        seq: row.seq.map(|s| s as u64),
        timestamp: row.timestamp,
        account_id: row.account_id,
        intent_kind: row
            .intent_kind
            .as_deref()
            .map(str::parse::<IntentKind>)
            .transpose()?,
        decision: row.decision.parse()?,
        outcome: row.outcome.parse()?,
        error: row.error,
        token: row.token,
    })
}

impl AuditSink for SqliteAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<u64, TaskMasterError> {
        let row = AuditRow {
            seq: None,
            timestamp: entry.timestamp,
            account_id: entry.account_id.clone(),
            intent_kind: entry.intent_kind.map(|k| k.to_string()),
            decision: entry.decision.to_string(),
            outcome: entry.outcome.to_string(),
            error: entry.error.clone(),
            token: entry.token.clone(),
        };
        Ok(self.repo.append(&row)? as u64)
    }

    fn recent(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, TaskMasterError> {
        self.repo
            .recent(account, limit)?
            .into_iter()
            .map(row_to_entry)
            .collect()
    }
}
