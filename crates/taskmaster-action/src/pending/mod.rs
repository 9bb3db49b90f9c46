//! Pending action storage.
//!
//! The store is one of the two shared mutable resources in the engine.
//! Status changes go through [`PendingStore::compare_and_set`] so that two
//! concurrent resolutions of one token cannot both succeed.

pub mod state_machine;

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::AccountId;

use crate::types::{PendingAction, PendingStatus};

pub trait PendingStore: Send + Sync {
    /// Insert a new action. Fails if the token already exists.
    fn insert(&self, action: &PendingAction) -> Result<(), TaskMasterError>;

    fn get(&self, token: &str) -> Result<Option<PendingAction>, TaskMasterError>;

    /// Set status to `to` only if it is currently `from`. Returns whether
    /// this call made the change.
    fn compare_and_set(
        &self,
        token: &str,
        from: PendingStatus,
        to: PendingStatus,
        at: DateTime<Utc>,
    ) -> Result<bool, TaskMasterError>;

    /// Actions for one account, newest first.
    fn list_by_account(
        &self,
        account: &AccountId,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingAction>, TaskMasterError>;

    /// Still-pending actions whose expiry is at or before `now`.
    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingAction>, TaskMasterError>;
}

/// In-memory pending store.
#[derive(Default)]
pub struct InMemoryPendingStore {
    actions: Mutex<HashMap<String, PendingAction>>,
}

impl InMemoryPendingStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(
        &self,
    ) -> Result<std::sync::MutexGuard<'_, HashMap<String, PendingAction>>, TaskMasterError> {
        self.actions
            .lock()
            .map_err(|e| TaskMasterError::Storage(format!("Lock poisoned: {}", e)))
    }
}

impl PendingStore for InMemoryPendingStore {
    fn insert(&self, action: &PendingAction) -> Result<(), TaskMasterError> {
        let mut actions = self.lock()?;
        if actions.contains_key(&action.token) {
            return Err(TaskMasterError::Storage(format!(
                "Duplicate pending token: {}",
                action.token
            )));
        }
        actions.insert(action.token.clone(), action.clone());
        Ok(())
    }

    fn get(&self, token: &str) -> Result<Option<PendingAction>, TaskMasterError> {
        Ok(self.lock()?.get(token).cloned())
    }

    fn compare_and_set(
        &self,
        token: &str,
        from: PendingStatus,
        to: PendingStatus,
        _at: DateTime<Utc>,
    ) -> Result<bool, TaskMasterError> {
        let mut actions = self.lock()?;
        match actions.get_mut(token) {
            Some(action) if action.status == from => {
                action.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn list_by_account(
        &self,
        account: &AccountId,
        status: Option<PendingStatus>,
    ) -> Result<Vec<PendingAction>, TaskMasterError> {
        let actions = self.lock()?;
        let mut result: Vec<PendingAction> = actions
            .values()
            .filter(|a| &a.account_id == account)
            .filter(|a| status.map_or(true, |s| a.status == s))
            .cloned()
            .collect();
        result.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.token.cmp(&b.token))
        });
        Ok(result)
    }

    fn list_expired(&self, now: DateTime<Utc>) -> Result<Vec<PendingAction>, TaskMasterError> {
        let actions = self.lock()?;
        let mut result: Vec<PendingAction> = actions
            .values()
            .filter(|a| a.status == PendingStatus::Pending && a.is_expired_at(now))
            .cloned()
            .collect();
        result.sort_by_key(|a| a.expires_at);
        Ok(result)
    }
}
