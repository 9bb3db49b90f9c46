//! Per-account settings: safety mode, plan tier, automation rules.

use std::collections::HashMap;
use std::sync::RwLock;

use taskmaster_core::config::TaskMasterConfig;
use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, PlanTier, SafetyMode};

use crate::gate::AutomationRule;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AccountSettings {
    pub mode: SafetyMode,
    pub plan: PlanTier,
    /// Only consulted in `auto` mode.
    pub rules: Vec<AutomationRule>,
}

impl AccountSettings {
    /// Defaults for accounts with no explicit record.
    pub fn from_config(config: &TaskMasterConfig) -> Result<Self, TaskMasterError> {
        let rules = config
            .safety
            .automation_rules
            .iter()
            .map(AutomationRule::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            mode: config.safety.default_mode,
            plan: config.quota.default_plan,
            rules,
        })
    }
}

/// Source of per-account settings. Passed in explicitly; there is no
/// process-wide current account.
pub trait AccountDirectory: Send + Sync {
    fn settings(&self, account: &AccountId) -> Result<AccountSettings, TaskMasterError>;
}

/// Settings held in memory, with a fallback for unknown accounts.
pub struct InMemoryAccountDirectory {
    defaults: AccountSettings,
    accounts: RwLock<HashMap<AccountId, AccountSettings>>,
}

impl InMemoryAccountDirectory {
    pub fn new(defaults: AccountSettings) -> Self {
        Self {
            defaults,
            accounts: RwLock::new(HashMap::new()),
        }
    }

    pub fn set(&self, account: AccountId, settings: AccountSettings) {
        let mut accounts = match self.accounts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        accounts.insert(account, settings);
    }

    /// Change only the safety mode, keeping the rest of the record.
    pub fn set_mode(&self, account: &AccountId, mode: SafetyMode) {
        let mut accounts = match self.accounts.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        accounts
            .entry(account.clone())
            .or_insert_with(|| self.defaults.clone())
            .mode = mode;
    }
}

impl AccountDirectory for InMemoryAccountDirectory {
    fn settings(&self, account: &AccountId) -> Result<AccountSettings, TaskMasterError> {
        let accounts = self
            .accounts
            .read()
            .map_err(|e| TaskMasterError::Storage(format!("Account lock poisoned: {}", e)))?;
        Ok(accounts
            .get(account)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone()))
    }
}
