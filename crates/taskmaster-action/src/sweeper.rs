//! Background expiry of stale pending actions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::gate::SafetyGate;

/// Periodically expires pending actions whose TTL has passed.
pub struct PendingSweeper {
    gate: Arc<SafetyGate>,
    interval: Duration,
    shutdown: Arc<Notify>,
}

impl PendingSweeper {
    pub fn new(gate: Arc<SafetyGate>, interval: Duration) -> Self {
        Self {
            gate,
            interval,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// One pass. Returns how many actions were expired.
    pub fn sweep(&self) -> usize {
        match self.gate.expire_due() {
            Ok(0) => {
                debug!("No pending actions due for expiry");
                0
            }
            Ok(expired) => {
                info!(expired, "Expired stale pending actions");
                expired
            }
            Err(e) => {
                warn!(error = %e, "Pending sweep failed");
                0
            }
        }
    }

    /// Sweep on every interval until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) {
        loop {
            self.sweep();
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                _ = self.shutdown.notified() => {
                    debug!("Pending sweeper stopped");
                    return;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditLogger, InMemoryAuditSink};
    use crate::pending::InMemoryPendingStore;
    use crate::types::{Intent, Outcome, PendingStatus};
    use chrono::{TimeZone, Utc};
    use taskmaster_core::clock::ManualClock;
    use taskmaster_core::types::{AccountId, SafetyMode};

    fn setup() -> (Arc<SafetyGate>, Arc<ManualClock>, Arc<InMemoryAuditSink>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 12, 9, 0, 0).unwrap(),
        ));
        let sink = Arc::new(InMemoryAuditSink::new());
        let gate = Arc::new(SafetyGate::new(
            Arc::new(InMemoryPendingStore::new()),
            Arc::new(AuditLogger::new(sink.clone())),
            clock.clone(),
            chrono::Duration::hours(1),
        ));
        (gate, clock, sink)
    }

    fn draft() -> Intent {
        Intent::DraftReply {
            message_id: "m1".to_string(),
            instructions: None,
        }
    }

    #[tokio::test]
    async fn test_shutdown_before_run_returns() {
        let (gate, _, _) = setup();
        let sweeper = PendingSweeper::new(gate, Duration::from_secs(3600));
        sweeper.shutdown();
        tokio::time::timeout(Duration::from_secs(2), sweeper.run())
            .await
            .expect("Sweeper should shut down within timeout");
    }

    #[test]
    fn test_sweep_expires_only_overdue() {
        let (gate, clock, sink) = setup();
        let account = AccountId::from("a@example.com");
        let old = gate.defer(&account, draft(), SafetyMode::Confirmation).unwrap();
        clock.advance(chrono::Duration::minutes(30));
        let fresh = gate.defer(&account, draft(), SafetyMode::Confirmation).unwrap();
        clock.advance(chrono::Duration::minutes(31));

        let sweeper = PendingSweeper::new(Arc::clone(&gate), Duration::from_secs(60));
        assert_eq!(sweeper.sweep(), 1);
        assert_eq!(sweeper.sweep(), 0);

        let listed = gate.list_for_account(&account, false).unwrap();
        let status = |token: &str| listed.iter().find(|a| a.token == token).unwrap().status;
        assert_eq!(status(&old.token), PendingStatus::Expired);
        assert_eq!(status(&fresh.token), PendingStatus::Pending);

        let expired_entries = sink
            .entries()
            .iter()
            .filter(|e| e.outcome == Outcome::Expired)
            .count();
        assert_eq!(expired_entries, 1);
    }

    #[tokio::test]
    async fn test_run_sweeps_then_stops() {
        let (gate, clock, _) = setup();
        let account = AccountId::from("a@example.com");
        let pending = gate.defer(&account, draft(), SafetyMode::Draft).unwrap();
        clock.advance(chrono::Duration::hours(2));

        let sweeper = Arc::new(PendingSweeper::new(
            Arc::clone(&gate),
            Duration::from_millis(10),
        ));
        let runner = Arc::clone(&sweeper);
        let handle = tokio::spawn(async move { runner.run().await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        sweeper.shutdown();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("Sweeper should stop")
            .unwrap();

        let listed = gate.list_for_account(&account, false).unwrap();
        assert_eq!(listed[0].token, pending.token);
        assert_eq!(listed[0].status, PendingStatus::Expired);
    }
}
