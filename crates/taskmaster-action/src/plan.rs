//! Subscription plan limits.
//!
//! The billing side is the source of truth for limits; the engine only asks
//! through [`LimitsProvider`]. [`PlanLimitsProvider`] answers from the
//! built-in plan table using each account's tier.

use std::sync::Arc;

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, PlanTier};

use crate::account::AccountDirectory;

/// Monthly allowances for one plan tier. `None` means unlimited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanLimits {
    pub email_summaries: Option<u32>,
    pub schedule_proposals: Option<u32>,
    pub actions: Option<u32>,
    pub auto_actions: bool,
}

impl PlanLimits {
    pub fn for_plan(plan: PlanTier) -> Self {
        match plan {
            PlanTier::Free => Self {
                email_summaries: Some(50),
                schedule_proposals: Some(10),
                actions: None,
                auto_actions: false,
            },
            PlanTier::Personal => Self {
                email_summaries: Some(500),
                schedule_proposals: Some(100),
                actions: None,
                auto_actions: true,
            },
            PlanTier::Pro => Self {
                email_summaries: Some(2000),
                schedule_proposals: Some(500),
                actions: None,
                auto_actions: true,
            },
            PlanTier::Team => Self {
                email_summaries: Some(5000),
                schedule_proposals: Some(1000),
                actions: None,
                auto_actions: true,
            },
            PlanTier::Enterprise => Self {
                email_summaries: None,
                schedule_proposals: None,
                actions: None,
                auto_actions: true,
            },
        }
    }

    pub fn limit(&self, category: ActionCategory) -> Option<u32> {
        match category {
            ActionCategory::EmailSummary => self.email_summaries,
            ActionCategory::ScheduleProposal => self.schedule_proposals,
            ActionCategory::Action => self.actions,
        }
    }
}

/// Billing collaborator seam.
pub trait LimitsProvider: Send + Sync {
    /// Current limit for the category; `None` is unlimited.
    fn limit(&self, account: &AccountId, category: ActionCategory)
        -> Result<Option<u32>, TaskMasterError>;

    /// Whether the account's plan permits `auto` mode execution.
    fn allows_auto_actions(&self, account: &AccountId) -> Result<bool, TaskMasterError>;
}

/// Limits from the built-in plan table.
pub struct PlanLimitsProvider {
    accounts: Arc<dyn AccountDirectory>,
}

impl PlanLimitsProvider {
    pub fn new(accounts: Arc<dyn AccountDirectory>) -> Self {
        Self { accounts }
    }

    fn limits_for(&self, account: &AccountId) -> Result<PlanLimits, TaskMasterError> {
        let settings = self.accounts.settings(account)?;
        Ok(PlanLimits::for_plan(settings.plan))
    }
}

impl LimitsProvider for PlanLimitsProvider {
    fn limit(
        &self,
        account: &AccountId,
        category: ActionCategory,
    ) -> Result<Option<u32>, TaskMasterError> {
        Ok(self.limits_for(account)?.limit(category))
    }

    fn allows_auto_actions(&self, account: &AccountId) -> Result<bool, TaskMasterError> {
        Ok(self.limits_for(account)?.auto_actions)
    }
}
