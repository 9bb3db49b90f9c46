//! Action coordination and scheduling engine for TaskMaster.
//!
//! Turns command text into typed intents, gates state-changing intents
//! behind each account's safety mode, negotiates meeting slots across
//! participants' calendars, and enforces per-plan usage quotas. Every
//! submission leaves an audit entry.

pub mod account;
pub mod audit;
pub mod cancel;
pub mod collaborator;
pub mod coordinator;
pub mod error;
pub mod gate;
pub mod intent;
pub mod pending;
pub mod persistence;
pub mod plan;
pub mod quota;
pub mod scheduling;
pub mod sweeper;
pub mod types;

pub use account::{AccountDirectory, AccountSettings, InMemoryAccountDirectory};
pub use audit::{AuditLogger, AuditSink, InMemoryAuditSink};
pub use cancel::CancelToken;
pub use collaborator::{
    ActionCollaborator, CalendarCollaborator, CalendarDirectory, CalendarResolver, RetryPolicy,
};
pub use coordinator::{Collaborators, Coordinator, Stores};
pub use error::{
    CollaboratorError, CoordinatorError, GateError, ParseError, QuotaError, SchedulingError,
};
pub use gate::{AutomationRule, GateDecision, SafetyGate};
pub use intent::CommandInterpreter;
pub use pending::{InMemoryPendingStore, PendingStore};
pub use plan::{LimitsProvider, PlanLimits, PlanLimitsProvider};
pub use quota::{InMemoryUsageStore, QuotaDecision, QuotaTracker, Reservation, UsageStore};
pub use scheduling::{Participant, SchedulingEngine};
pub use sweeper::PendingSweeper;
pub use types::*;
