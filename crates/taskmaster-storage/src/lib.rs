//! TaskMaster Storage crate - SQLite persistence for usage counters,
//! pending actions, and the audit trail.
//!
//! Provides a WAL-mode SQLite database with versioned migrations and one
//! repository per table. Repositories speak in row types; mapping to the
//! engine's domain types happens in the action crate.

pub mod audit;
pub mod db;
pub mod migrations;
pub mod pending;
pub mod usage;

pub use audit::{AuditRepository, AuditRow};
pub use db::Database;
pub use pending::{PendingRepository, PendingRow};
pub use usage::UsageRepository;
