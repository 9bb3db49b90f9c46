//! Domain types for the coordination engine.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, PlanTier, SafetyMode, UsageCounter};

// =============================================================================
// Intent
// =============================================================================

/// Parameters of a meeting to put on the calendar.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeetingRequest {
    pub title: String,
    /// Attendee identifiers in the order they were given.
    pub attendees: Vec<String>,
    pub duration_minutes: u32,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
}

/// Parameters of a free-time lookup.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreeTimeQuery {
    pub attendees: Vec<String>,
    pub duration_minutes: u32,
    pub earliest: Option<DateTime<Utc>>,
    pub latest: Option<DateTime<Utc>>,
    pub max_results: usize,
}

/// A parsed user command. Immutable once produced.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Intent {
    SummarizeInbox {
        max_results: u32,
    },
    DraftReply {
        message_id: String,
        instructions: Option<String>,
    },
    ScheduleMeeting(MeetingRequest),
    ShowFreeTime(FreeTimeQuery),
    ShowStatus,
}

impl Intent {
    pub fn kind(&self) -> IntentKind {
        match self {
            Intent::SummarizeInbox { .. } => IntentKind::SummarizeInbox,
            Intent::DraftReply { .. } => IntentKind::DraftReply,
            Intent::ScheduleMeeting(_) => IntentKind::ScheduleMeeting,
            Intent::ShowFreeTime(_) => IntentKind::ShowFreeTime,
            Intent::ShowStatus => IntentKind::ShowStatus,
        }
    }

    /// The usage category this intent is metered against, if any.
    pub fn category(&self) -> Option<ActionCategory> {
        match self {
            Intent::SummarizeInbox { .. } => Some(ActionCategory::EmailSummary),
            Intent::ScheduleMeeting(_) | Intent::ShowFreeTime(_) => {
                Some(ActionCategory::ScheduleProposal)
            }
            Intent::DraftReply { .. } => Some(ActionCategory::Action),
            Intent::ShowStatus => None,
        }
    }

    /// Read-only intents bypass the safety gate.
    pub fn is_read_only(&self) -> bool {
        matches!(
            self,
            Intent::SummarizeInbox { .. } | Intent::ShowFreeTime(_) | Intent::ShowStatus
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    SummarizeInbox,
    DraftReply,
    ScheduleMeeting,
    ShowFreeTime,
    ShowStatus,
}

impl fmt::Display for IntentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntentKind::SummarizeInbox => write!(f, "summarize_inbox"),
            IntentKind::DraftReply => write!(f, "draft_reply"),
            IntentKind::ScheduleMeeting => write!(f, "schedule_meeting"),
            IntentKind::ShowFreeTime => write!(f, "show_free_time"),
            IntentKind::ShowStatus => write!(f, "show_status"),
        }
    }
}

impl std::str::FromStr for IntentKind {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "summarize_inbox" => Ok(IntentKind::SummarizeInbox),
            "draft_reply" => Ok(IntentKind::DraftReply),
            "schedule_meeting" => Ok(IntentKind::ScheduleMeeting),
            "show_free_time" => Ok(IntentKind::ShowFreeTime),
            "show_status" => Ok(IntentKind::ShowStatus),
            _ => Err(TaskMasterError::InvalidValue {
                field: "intent".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

// =============================================================================
// Scheduling
// =============================================================================

/// Half-open busy range `[start, end)` reported by a calendar.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusyInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl BusyInterval {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// True when the two ranges share a positive duration.
    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        start < self.end && self.start < end
    }
}

/// Range over which candidate slots are generated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl SearchWindow {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Availability {
    AllFree,
    Partial,
}

/// A candidate meeting slot of exactly the requested duration.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub availability: Availability,
    pub unavailable_count: usize,
}

impl TimeSlot {
    pub fn is_all_free(&self) -> bool {
        self.availability == Availability::AllFree
    }
}

/// Ranked candidate slots. Fully free slots come first, in time order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub slots: Vec<TimeSlot>,
}

impl Proposal {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn first_free(&self) -> Option<&TimeSlot> {
        self.slots.iter().find(|s| s.is_all_free())
    }
}

// =============================================================================
// Pending actions
// =============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
}

impl PendingStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, PendingStatus::Pending)
    }
}

impl fmt::Display for PendingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PendingStatus::Pending => write!(f, "pending"),
            PendingStatus::Approved => write!(f, "approved"),
            PendingStatus::Rejected => write!(f, "rejected"),
            PendingStatus::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "approved" => Ok(PendingStatus::Approved),
            "rejected" => Ok(PendingStatus::Rejected),
            "expired" => Ok(PendingStatus::Expired),
            _ => Err(TaskMasterError::InvalidValue {
                field: "pending_status".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// A deferred intent awaiting approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingAction {
    /// Single-use approval token.
    pub token: String,
    pub account_id: AccountId,
    pub intent: Intent,
    /// Mode at deferral time; decides draft vs live dispatch on approval.
    pub mode: SafetyMode,
    pub status: PendingStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingAction {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

// =============================================================================
// Audit
// =============================================================================

/// What the coordinator decided to do with a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Executed,
    AwaitingApproval,
    Rejected,
    Approved,
    Expired,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Decision::Executed => write!(f, "executed"),
            Decision::AwaitingApproval => write!(f, "awaiting_approval"),
            Decision::Rejected => write!(f, "rejected"),
            Decision::Approved => write!(f, "approved"),
            Decision::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for Decision {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "executed" => Ok(Decision::Executed),
            "awaiting_approval" => Ok(Decision::AwaitingApproval),
            "rejected" => Ok(Decision::Rejected),
            "approved" => Ok(Decision::Approved),
            "expired" => Ok(Decision::Expired),
            _ => Err(TaskMasterError::InvalidValue {
                field: "decision".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// How the request ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Pending,
    Failed,
    Cancelled,
    Declined,
    Expired,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Succeeded => write!(f, "succeeded"),
            Outcome::Pending => write!(f, "pending"),
            Outcome::Failed => write!(f, "failed"),
            Outcome::Cancelled => write!(f, "cancelled"),
            Outcome::Declined => write!(f, "declined"),
            Outcome::Expired => write!(f, "expired"),
        }
    }
}

impl std::str::FromStr for Outcome {
    type Err = TaskMasterError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "succeeded" => Ok(Outcome::Succeeded),
            "pending" => Ok(Outcome::Pending),
            "failed" => Ok(Outcome::Failed),
            "cancelled" => Ok(Outcome::Cancelled),
            "declined" => Ok(Outcome::Declined),
            "expired" => Ok(Outcome::Expired),
            _ => Err(TaskMasterError::InvalidValue {
                field: "outcome".to_string(),
                value: s.to_string(),
            }),
        }
    }
}

/// One immutable audit record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Assigned by the sink on append.
    pub seq: Option<u64>,
    pub timestamp: DateTime<Utc>,
    pub account_id: AccountId,
    /// `None` when the command never parsed.
    pub intent_kind: Option<IntentKind>,
    pub decision: Decision,
    pub outcome: Outcome,
    pub error: Option<String>,
    pub token: Option<String>,
}

impl AuditEntry {
    pub fn new(
        timestamp: DateTime<Utc>,
        account_id: AccountId,
        intent_kind: Option<IntentKind>,
        decision: Decision,
        outcome: Outcome,
    ) -> Self {
        Self {
            seq: None,
            timestamp,
            account_id,
            intent_kind,
            decision,
            outcome,
            error: None,
            token: None,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }
}

// =============================================================================
// Execution results
// =============================================================================

/// How the action collaborator should carry out an intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchMode {
    /// Idempotent read; safe to retry.
    ReadOnly,
    /// Produce an unsent artifact.
    Draft,
    /// Perform the real side effect.
    Live,
}

impl fmt::Display for DispatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchMode::ReadOnly => write!(f, "read_only"),
            DispatchMode::Draft => write!(f, "draft"),
            DispatchMode::Live => write!(f, "live"),
        }
    }
}

/// Result of an action collaborator call.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionResult {
    pub message: String,
    pub output: Option<serde_json::Value>,
}

/// Snapshot returned for `status`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub account_id: AccountId,
    pub mode: SafetyMode,
    pub plan: PlanTier,
    pub usage: Vec<UsageCounter>,
    pub pending: Vec<PendingAction>,
    /// Audit entries lost to sink failures since startup.
    #[serde(default)]
    pub dropped_audit_records: u64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionResult {
    Collaborator(ActionResult),
    MeetingScheduled { event_id: String, slot: TimeSlot },
    MeetingDrafted { slot: TimeSlot },
    FreeTime(Proposal),
    Status(StatusReport),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    QuotaExceeded { category: ActionCategory, remaining: u32 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::QuotaExceeded { category, .. } => {
                write!(f, "quota exceeded for {}", category)
            }
        }
    }
}

/// What `submit` hands back to the caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SubmitOutcome {
    Executed {
        result: ExecutionResult,
    },
    AwaitingApproval {
        token: String,
        expires_at: DateTime<Utc>,
    },
    Rejected {
        reason: RejectReason,
    },
}
