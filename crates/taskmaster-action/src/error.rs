//! Error types for the coordination engine.

use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::ActionCategory;

use crate::types::PendingStatus;

/// Errors from the command interpreter. Always user-correctable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Empty command")]
    Empty,
    #[error("Unknown command: {verb}")]
    UnknownCommand { verb: String },
    #[error("Missing parameter: {name}")]
    MissingParameter { name: String },
    #[error("Invalid value for {name}: {value}")]
    InvalidParameter { name: String, value: String },
}

impl ParseError {
    pub(crate) fn missing(name: &str) -> Self {
        ParseError::MissingParameter {
            name: name.to_string(),
        }
    }

    pub(crate) fn invalid(name: &str, value: &str) -> Self {
        ParseError::InvalidParameter {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

/// Errors from the safety gate's approval flow.
#[derive(Debug, thiserror::Error)]
pub enum GateError {
    #[error("Approval token not found: {0}")]
    TokenNotFound(String),
    #[error("Approval token expired: {0}")]
    TokenExpired(String),
    #[error("Approval token {token} already {status}")]
    AlreadyResolved { token: String, status: PendingStatus },
    #[error("Invalid pending transition: {0} -> {1}")]
    InvalidTransition(PendingStatus, PendingStatus),
    #[error("Storage error: {0}")]
    Store(#[from] TaskMasterError),
}

/// Caller input errors from the scheduling engine.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchedulingError {
    #[error("At least one attendee is required")]
    NoAttendees,
    #[error("Meeting duration must be positive, got {0} minutes")]
    InvalidDuration(u32),
    #[error("Search window end must be after its start")]
    InvalidWindow,
}

/// Errors from external calendar and action collaborators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    #[error("Collaborator call {operation} timed out after {after_ms} ms")]
    Timeout { operation: String, after_ms: u64 },
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
    #[error("Collaborator call failed: {0}")]
    Failed(String),
}

/// Errors from the quota tracker's backing store or limits source.
#[derive(Debug, thiserror::Error)]
pub enum QuotaError {
    #[error("Usage store error: {0}")]
    Store(#[from] TaskMasterError),
}

/// Everything a coordinator operation can fail with.
#[derive(Debug, thiserror::Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("Quota exceeded for {category}")]
    QuotaExceeded { category: ActionCategory },
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Scheduling(#[from] SchedulingError),
    #[error(transparent)]
    Collaborator(#[from] CollaboratorError),
    #[error(transparent)]
    Quota(#[from] QuotaError),
    #[error("No slot is free for every participant in the search window")]
    NoAvailableSlot,
    #[error("Request cancelled")]
    Cancelled,
    #[error("Storage error: {0}")]
    Storage(#[from] TaskMasterError),
}
