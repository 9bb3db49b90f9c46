//! Pending action state machine.
//!
//! Pending -> Approved | Rejected | Expired. All three targets are terminal.

use crate::error::GateError;
use crate::types::PendingStatus;

/// Validate that a status transition is allowed.
pub fn validate_transition(from: PendingStatus, to: PendingStatus) -> Result<(), GateError> {
    let valid = matches!(
        (from, to),
        (PendingStatus::Pending, PendingStatus::Approved)
            | (PendingStatus::Pending, PendingStatus::Rejected)
            | (PendingStatus::Pending, PendingStatus::Expired)
    );

    if valid {
        Ok(())
    } else {
        Err(GateError::InvalidTransition(from, to))
    }
}
