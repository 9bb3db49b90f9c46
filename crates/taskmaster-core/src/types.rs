use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TaskMasterError;

// =============================================================================
// Newtype Wrappers
// =============================================================================

/// Unix timestamp in seconds (UTC).
///
/// Compared by value. Two Timestamps with the same inner value are equal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now() -> Self {
        Self(Utc::now().timestamp())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt.timestamp())
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.0, 0).unwrap_or_default()
    }

    /// Timestamp shifted forward by `secs` seconds.
    pub fn plus_secs(&self, secs: i64) -> Self {
        Self(self.0.saturating_add(secs))
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_datetime().to_rfc3339())
    }
}

/// Opaque account identifier (usually the account owner's email address).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccountId(pub String);

impl AccountId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AccountId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Enums
// =============================================================================

/// Per-account execution policy for state-changing actions.
///
/// `Draft` and `Confirmation` both defer to a human; they differ only in what
/// the action collaborator does once the deferred action is approved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SafetyMode {
    /// Approved actions produce an unsent artifact (draft mail, tentative slot).
    Draft,
    /// Approved actions perform the real side effect.
    #[default]
    Confirmation,
    /// Actions matching an automation rule run without approval.
    Auto,
}

impl fmt::Display for SafetyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SafetyMode::Draft => write!(f, "draft"),
            SafetyMode::Confirmation => write!(f, "confirmation"),
            SafetyMode::Auto => write!(f, "auto"),
        }
    }
}

impl std::str::FromStr for SafetyMode {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(SafetyMode::Draft),
            "confirmation" => Ok(SafetyMode::Confirmation),
            "auto" => Ok(SafetyMode::Auto),
            _ => Err(TaskMasterError::InvalidValue {
                field: "safety_mode".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Metered usage category. Each has an independent monthly counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionCategory {
    EmailSummary,
    ScheduleProposal,
    Action,
}

impl ActionCategory {
    pub const ALL: [ActionCategory; 3] = [
        ActionCategory::EmailSummary,
        ActionCategory::ScheduleProposal,
        ActionCategory::Action,
    ];
}

impl fmt::Display for ActionCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCategory::EmailSummary => write!(f, "email_summary"),
            ActionCategory::ScheduleProposal => write!(f, "schedule_proposal"),
            ActionCategory::Action => write!(f, "action"),
        }
    }
}

impl std::str::FromStr for ActionCategory {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email_summary" => Ok(ActionCategory::EmailSummary),
            "schedule_proposal" => Ok(ActionCategory::ScheduleProposal),
            "action" => Ok(ActionCategory::Action),
            _ => Err(TaskMasterError::InvalidValue {
                field: "action_category".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// Subscription plan tier, supplied by the billing collaborator.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Personal,
    Pro,
    Team,
    Enterprise,
}

impl fmt::Display for PlanTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanTier::Free => write!(f, "free"),
            PlanTier::Personal => write!(f, "personal"),
            PlanTier::Pro => write!(f, "pro"),
            PlanTier::Team => write!(f, "team"),
            PlanTier::Enterprise => write!(f, "enterprise"),
        }
    }
}

impl std::str::FromStr for PlanTier {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(PlanTier::Free),
            "personal" => Ok(PlanTier::Personal),
            "pro" => Ok(PlanTier::Pro),
            "team" => Ok(PlanTier::Team),
            "enterprise" => Ok(PlanTier::Enterprise),
            _ => Err(TaskMasterError::InvalidValue {
                field: "plan".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Usage
// =============================================================================

/// Usage of one category by one account within the current period.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounter {
    pub account_id: AccountId,
    pub category: ActionCategory,
    pub used: u32,
    /// `None` means unlimited.
    pub limit: Option<u32>,
    pub period_start: DateTime<Utc>,
}

impl UsageCounter {
    pub fn new(
        account_id: AccountId,
        category: ActionCategory,
        limit: Option<u32>,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id,
            category,
            used: 0,
            limit,
            period_start,
        }
    }

    /// Units left before the limit is reached, `None` when unlimited.
    pub fn remaining(&self) -> Option<u32> {
        self.limit.map(|limit| limit.saturating_sub(self.used))
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.limit, Some(limit) if self.used >= limit)
    }
}

// =============================================================================
// Tests
// =============================================================================
