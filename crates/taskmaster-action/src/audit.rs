//! Audit logger.
//!
//! Recording never fails the caller. A sink error is logged and counted,
//! and the request carries on as if the entry had been written.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, error};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::AccountId;

use crate::types::AuditEntry;

/// Durable destination for audit entries. Append-only.
pub trait AuditSink: Send + Sync {
    /// Append an entry and return its sequence number.
    fn append(&self, entry: &AuditEntry) -> Result<u64, TaskMasterError>;

    /// Newest entries first, optionally filtered by account.
    fn recent(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, TaskMasterError>;
}

pub struct AuditLogger {
    sink: Arc<dyn AuditSink>,
    dropped: AtomicU64,
}

impl AuditLogger {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append an entry. Returns its sequence number, or `None` if the sink
    /// failed and the entry was dropped.
    pub fn record(&self, entry: AuditEntry) -> Option<u64> {
        match self.sink.append(&entry) {
            Ok(seq) => {
                debug!(
                    seq,
                    account = %entry.account_id,
                    decision = %entry.decision,
                    outcome = %entry.outcome,
                    "Audit entry recorded"
                );
                Some(seq)
            }
            Err(e) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                error!(
                    error = %e,
                    account = %entry.account_id,
                    decision = %entry.decision,
                    outcome = %entry.outcome,
                    dropped,
                    "Failed to record audit entry"
                );
                None
            }
        }
    }

    pub fn recent(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, TaskMasterError> {
        self.sink.recent(account, limit)
    }

    /// Entries lost to sink failures since startup.
    pub fn dropped_records(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// In-memory sink.
#[derive(Default)]
pub struct InMemoryAuditSink {
    entries: Mutex<Vec<AuditEntry>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl AuditSink for InMemoryAuditSink {
    fn append(&self, entry: &AuditEntry) -> Result<u64, TaskMasterError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| TaskMasterError::Storage(format!("Lock poisoned: {}", e)))?;
        let seq = entries.len() as u64 + 1;
        let mut stored = entry.clone();
        stored.seq = Some(seq);
        entries.push(stored);
        Ok(seq)
    }

    fn recent(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, TaskMasterError> {
        let entries = self
            .entries
            .lock()
            .map_err(|e| TaskMasterError::Storage(format!("Lock poisoned: {}", e)))?;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| account.map_or(true, |a| &e.account_id == a))
            .take(limit)
            .cloned()
            .collect())
    }
}
