use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use taskmaster_action::{
    AccountSettings, ActionCollaborator, ActionResult, AutomationRule, BusyInterval,
    CalendarCollaborator, CalendarDirectory, CancelToken, CollaboratorError, Collaborators,
    Coordinator, CoordinatorError, Decision, DispatchMode, ExecutionResult, GateError,
    InMemoryAccountDirectory, InMemoryAuditSink, InMemoryPendingStore, InMemoryUsageStore,
    Intent, IntentKind, LimitsProvider, Outcome, ParseError, PendingStatus, RejectReason,
    Stores, SubmitOutcome,
};
use taskmaster_core::clock::ManualClock;
use taskmaster_core::config::TaskMasterConfig;
use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, PlanTier, SafetyMode};
use taskmaster_storage::Database;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeCalendar {
    busy: Mutex<HashMap<String, Vec<BusyInterval>>>,
    fail_create: AtomicBool,
    create_attempts: AtomicU32,
    created: Mutex<Vec<(String, DateTime<Utc>)>>,
}

impl FakeCalendar {
    fn set_busy(&self, attendee: &str, intervals: Vec<BusyInterval>) {
        self.busy
            .lock()
            .unwrap()
            .insert(attendee.to_string(), intervals);
    }

    fn created(&self) -> Vec<(String, DateTime<Utc>)> {
        self.created.lock().unwrap().clone()
    }
}

#[async_trait]
impl CalendarCollaborator for FakeCalendar {
    async fn busy_intervals(
        &self,
        attendee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CollaboratorError> {
        let busy = self.busy.lock().unwrap();
        Ok(busy
            .get(attendee)
            .map(|intervals| {
                intervals
                    .iter()
                    .filter(|b| b.overlaps(start, end))
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        _end: DateTime<Utc>,
        _attendees: &[String],
    ) -> Result<String, CollaboratorError> {
        self.create_attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(CollaboratorError::Failed("calendar write rejected".to_string()));
        }
        let mut created = self.created.lock().unwrap();
        created.push((title.to_string(), start));
        Ok(format!("evt-{}", created.len()))
    }
}

#[derive(Default)]
struct RecordingActions {
    calls: AtomicU32,
    modes: Mutex<Vec<DispatchMode>>,
    hang: AtomicBool,
}

impl RecordingActions {
    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn modes(&self) -> Vec<DispatchMode> {
        self.modes.lock().unwrap().clone()
    }
}

#[async_trait]
impl ActionCollaborator for RecordingActions {
    async fn execute(
        &self,
        _account: &AccountId,
        intent: &Intent,
        mode: DispatchMode,
    ) -> Result<ActionResult, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.modes.lock().unwrap().push(mode);
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        Ok(ActionResult {
            message: format!("{} done", intent.kind()),
            output: None,
        })
    }
}

type LookupHook = Box<dyn FnOnce() + Send>;

struct TestLimits {
    limit: Mutex<Option<u32>>,
    auto: AtomicBool,
    /// Runs once, inside the next limit lookup.
    on_lookup: Mutex<Option<LookupHook>>,
}

impl TestLimits {
    fn new() -> Self {
        Self {
            limit: Mutex::new(None),
            auto: AtomicBool::new(true),
            on_lookup: Mutex::new(None),
        }
    }

    fn set_limit(&self, limit: Option<u32>) {
        *self.limit.lock().unwrap() = limit;
    }

    fn during_next_lookup(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_lookup.lock().unwrap() = Some(Box::new(hook));
    }
}

impl LimitsProvider for TestLimits {
    fn limit(
        &self,
        _account: &AccountId,
        _category: ActionCategory,
    ) -> Result<Option<u32>, TaskMasterError> {
        let hook = self.on_lookup.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(*self.limit.lock().unwrap())
    }

    fn allows_auto_actions(&self, _account: &AccountId) -> Result<bool, TaskMasterError> {
        Ok(self.auto.load(Ordering::SeqCst))
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    coord: Arc<Coordinator>,
    accounts: Arc<InMemoryAccountDirectory>,
    limits: Arc<TestLimits>,
    clock: Arc<ManualClock>,
    calendar: Arc<FakeCalendar>,
    actions: Arc<RecordingActions>,
    audit: Arc<InMemoryAuditSink>,
}

fn monday(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 12, h, m, 0).unwrap()
}

fn account() -> AccountId {
    AccountId::from("a@example.com")
}

fn harness() -> Harness {
    let audit = Arc::new(InMemoryAuditSink::new());
    let stores = Stores {
        usage: Arc::new(InMemoryUsageStore::new()),
        pending: Arc::new(InMemoryPendingStore::new()),
        audit: audit.clone(),
    };
    harness_with(stores, audit)
}

fn harness_with_timeout(timeout_ms: u64) -> Harness {
    let audit = Arc::new(InMemoryAuditSink::new());
    let stores = Stores {
        usage: Arc::new(InMemoryUsageStore::new()),
        pending: Arc::new(InMemoryPendingStore::new()),
        audit: audit.clone(),
    };
    let mut config = test_config();
    config.collaborators.timeout_ms = timeout_ms;
    assemble(stores, audit, &config)
}

fn test_config() -> TaskMasterConfig {
    let mut config = TaskMasterConfig::default();
    config.collaborators.retry_backoff_ms = 1;
    config
}

/// `audit` is the sink `last_audit` reads from.
fn harness_with(stores: Stores, audit: Arc<InMemoryAuditSink>) -> Harness {
    assemble(stores, audit, &test_config())
}

fn assemble(stores: Stores, audit: Arc<InMemoryAuditSink>, config: &TaskMasterConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(monday(8, 0)));
    let accounts = Arc::new(InMemoryAccountDirectory::new(AccountSettings::default()));
    let limits = Arc::new(TestLimits::new());
    let calendar = Arc::new(FakeCalendar::default());
    let actions = Arc::new(RecordingActions::default());

    let coord = Coordinator::new(
        config,
        stores,
        Collaborators {
            accounts: accounts.clone(),
            limits: limits.clone(),
            calendars: Arc::new(CalendarDirectory::shared(calendar.clone())),
            actions: actions.clone(),
            clock: clock.clone(),
        },
    );

    Harness {
        coord: Arc::new(coord),
        accounts,
        limits,
        clock,
        calendar,
        actions,
        audit,
    }
}

impl Harness {
    fn set_settings(&self, mode: SafetyMode, rules: Vec<AutomationRule>) {
        self.accounts.set(
            account(),
            AccountSettings {
                mode,
                plan: PlanTier::Personal,
                rules,
            },
        );
    }

    async fn submit(&self, text: &str) -> Result<SubmitOutcome, CoordinatorError> {
        self.coord.submit_text(&account(), text).await
    }

    fn used(&self, category: ActionCategory) -> u32 {
        self.coord
            .get_usage(&account())
            .unwrap()
            .into_iter()
            .find(|c| c.category == category)
            .map(|c| c.used)
            .unwrap_or(0)
    }

    fn last_audit(&self) -> taskmaster_action::AuditEntry {
        self.audit.entries().last().cloned().expect("audit entry")
    }
}

fn meeting_rule() -> AutomationRule {
    AutomationRule {
        intent: IntentKind::ScheduleMeeting,
        attendee_domains: vec!["example.com".to_string()],
        max_duration_minutes: Some(60),
    }
}

fn token_of(outcome: SubmitOutcome) -> String {
    match outcome {
        SubmitOutcome::AwaitingApproval { token, .. } => token,
        other => panic!("expected awaiting approval, got {other:?}"),
    }
}

const SCHEDULE: &str =
    "schedule Design review with b@example.com 30min from 2026-10-12T09:00 until 2026-10-12T12:00";
const DRAFT: &str = "draft reply to m-42 saying sounds good";

// =============================================================================
// Safety gate properties
// =============================================================================

#[tokio::test]
async fn test_auto_mode_without_matching_rule_awaits_approval() {
    let h = harness();
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);

    let outcome = h.submit(DRAFT).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::AwaitingApproval { .. }));

    // Rule exists but the attendee's domain is outside it.
    let outcome = h
        .submit("schedule Sync with c@elsewhere.org from 2026-10-12T09:00 until 2026-10-12T12:00")
        .await
        .unwrap();
    assert!(matches!(outcome, SubmitOutcome::AwaitingApproval { .. }));
    assert_eq!(h.actions.calls(), 0);
    assert!(h.calendar.created().is_empty());
}

#[tokio::test]
async fn test_draft_and_confirmation_always_defer_state_changes() {
    let h = harness();
    for mode in [SafetyMode::Draft, SafetyMode::Confirmation] {
        h.set_settings(mode, vec![meeting_rule()]);
        for text in [DRAFT, SCHEDULE] {
            let outcome = h.submit(text).await.unwrap();
            assert!(
                matches!(outcome, SubmitOutcome::AwaitingApproval { .. }),
                "{mode} / {text}"
            );
        }
    }
    assert_eq!(h.actions.calls(), 0);
    assert_eq!(h.coord.list_pending(&account()).unwrap().len(), 4);
}

#[tokio::test]
async fn test_read_only_intents_execute_in_every_mode() {
    let h = harness();
    for mode in [SafetyMode::Draft, SafetyMode::Confirmation, SafetyMode::Auto] {
        h.set_settings(mode, Vec::new());
        for text in [
            "inbox",
            "status",
            "free 30min from 2026-10-12T09:00 until 2026-10-12T12:00",
        ] {
            let outcome = h.submit(text).await.unwrap();
            assert!(
                matches!(outcome, SubmitOutcome::Executed { .. }),
                "{mode} / {text}"
            );
        }
    }
    assert_eq!(h.actions.modes(), vec![DispatchMode::ReadOnly; 3]);
}

#[tokio::test]
async fn test_plan_without_auto_actions_defers() {
    let h = harness();
    h.limits.auto.store(false, Ordering::SeqCst);
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);

    let outcome = h.submit(SCHEDULE).await.unwrap();
    assert!(matches!(outcome, SubmitOutcome::AwaitingApproval { .. }));
}

// =============================================================================
// Approval lifecycle
// =============================================================================

#[tokio::test]
async fn test_approve_once_then_already_resolved() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    let token = token_of(h.submit(DRAFT).await.unwrap());

    let result = h.coord.approve(&token).await.unwrap();
    assert!(matches!(result, ExecutionResult::Collaborator(_)));
    assert_eq!(h.actions.modes(), vec![DispatchMode::Live]);

    let entry = h.last_audit();
    assert_eq!(entry.decision, Decision::Approved);
    assert_eq!(entry.outcome, Outcome::Succeeded);
    assert_eq!(entry.token.as_deref(), Some(token.as_str()));

    assert!(matches!(
        h.coord.approve(&token).await.unwrap_err(),
        CoordinatorError::Gate(GateError::AlreadyResolved { .. })
    ));
    assert!(matches!(
        h.coord.reject(&token).unwrap_err(),
        CoordinatorError::Gate(GateError::AlreadyResolved { .. })
    ));
    assert_eq!(h.actions.calls(), 1);

    let refusal = h.last_audit();
    assert_eq!(refusal.decision, Decision::Rejected);
    assert_eq!(refusal.outcome, Outcome::Failed);
    assert_eq!(refusal.token.as_deref(), Some(token.as_str()));
}

#[tokio::test]
async fn test_unknown_token() {
    let h = harness();
    assert!(matches!(
        h.coord.approve("no-such-token").await.unwrap_err(),
        CoordinatorError::Gate(GateError::TokenNotFound(_))
    ));
    assert!(h.audit.entries().is_empty());
}

#[tokio::test]
async fn test_reject_declines_without_running() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    let token = token_of(h.submit(DRAFT).await.unwrap());

    let rejected = h.coord.reject(&token).unwrap();
    assert_eq!(rejected.status, PendingStatus::Rejected);
    assert_eq!(h.last_audit().outcome, Outcome::Declined);

    assert!(h.coord.approve(&token).await.is_err());
    assert_eq!(h.actions.calls(), 0);
    assert!(h.coord.list_pending(&account()).unwrap().is_empty());
}

#[tokio::test]
async fn test_draft_mode_approval_produces_unsent_artifacts() {
    let h = harness();
    h.set_settings(SafetyMode::Draft, Vec::new());

    let reply = token_of(h.submit(DRAFT).await.unwrap());
    h.coord.approve(&reply).await.unwrap();
    assert_eq!(h.actions.modes(), vec![DispatchMode::Draft]);

    let meeting = token_of(h.submit(SCHEDULE).await.unwrap());
    let result = h.coord.approve(&meeting).await.unwrap();
    let ExecutionResult::MeetingDrafted { slot } = result else {
        panic!("expected drafted meeting, got {result:?}");
    };
    assert_eq!(slot.start, monday(9, 0));
    assert!(h.calendar.created().is_empty());
}

#[tokio::test]
async fn test_expired_token_is_rejected_and_audited() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    let token = token_of(h.submit(DRAFT).await.unwrap());

    h.clock.advance(chrono::Duration::hours(25));
    assert!(matches!(
        h.coord.approve(&token).await.unwrap_err(),
        CoordinatorError::Gate(GateError::TokenExpired(_))
    ));
    let entry = h.last_audit();
    assert_eq!(entry.decision, Decision::Expired);
    assert_eq!(entry.outcome, Outcome::Expired);
    assert_eq!(h.actions.calls(), 0);
}

#[tokio::test]
async fn test_expire_pending_sweeps_overdue_tokens() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    h.submit(DRAFT).await.unwrap();
    h.submit(DRAFT).await.unwrap();

    assert_eq!(h.coord.expire_pending().unwrap(), 0);
    h.clock.advance(chrono::Duration::hours(24));
    assert_eq!(h.coord.expire_pending().unwrap(), 2);
    assert!(h.coord.list_pending(&account()).unwrap().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_have_one_winner() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    let token = token_of(h.submit(DRAFT).await.unwrap());

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let coord = Arc::clone(&h.coord);
            let token = token.clone();
            tokio::spawn(async move { coord.approve(&token).await.is_ok() })
        })
        .collect();

    let mut winners = 0;
    for handle in handles {
        if handle.await.unwrap() {
            winners += 1;
        }
    }
    assert_eq!(winners, 1);
    assert_eq!(h.actions.calls(), 1);
    // Losers gave their reservations back.
    assert_eq!(h.used(ActionCategory::Action), 1);
}

#[tokio::test]
async fn test_approval_overtaken_by_rejection_reports_resolution() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());
    let token = token_of(h.submit(DRAFT).await.unwrap());

    // The reject lands between the approval's token check and its quota
    // check, and the quota is already spent.
    h.limits.set_limit(Some(0));
    let gate = h.coord.gate();
    let rejected = token.clone();
    h.limits.during_next_lookup(move || {
        gate.reject(&rejected).unwrap();
    });

    let err = h.coord.approve(&token).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Gate(GateError::AlreadyResolved {
            status: PendingStatus::Rejected,
            ..
        })
    ));
    assert_eq!(h.actions.calls(), 0);

    let refusal = h.last_audit();
    assert_eq!(refusal.outcome, Outcome::Failed);
    assert!(refusal.error.unwrap().contains("already"));
}

// =============================================================================
// Scheduling
// =============================================================================

#[tokio::test]
async fn test_auto_rule_schedules_first_free_slot() {
    let h = harness();
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);
    h.calendar.set_busy(
        "a@example.com",
        vec![BusyInterval::new(monday(10, 0), monday(11, 0))],
    );

    let outcome = h.submit(SCHEDULE).await.unwrap();
    let SubmitOutcome::Executed {
        result: ExecutionResult::MeetingScheduled { event_id, slot },
    } = outcome
    else {
        panic!("expected scheduled meeting, got {outcome:?}");
    };
    assert_eq!(event_id, "evt-1");
    assert_eq!(slot.start, monday(9, 0));
    assert_eq!(
        h.calendar.created(),
        vec![("Design review".to_string(), monday(9, 0))]
    );
    assert_eq!(h.used(ActionCategory::ScheduleProposal), 1);
}

#[tokio::test]
async fn test_free_time_never_overlaps_busy() {
    let h = harness();
    let busy = BusyInterval::new(monday(10, 0), monday(11, 0));
    h.calendar.set_busy("b@example.com", vec![busy]);

    let outcome = h
        .submit("free 30min with b@example.com from 2026-10-12T09:00 until 2026-10-12T12:00 max 6")
        .await
        .unwrap();
    let SubmitOutcome::Executed {
        result: ExecutionResult::FreeTime(proposal),
    } = outcome
    else {
        panic!("expected free time");
    };
    assert_eq!(proposal.slots.len(), 6);
    assert_eq!(proposal.slots[0].start, monday(9, 0));
    for slot in proposal.slots.iter().filter(|s| s.is_all_free()) {
        assert!(!busy.overlaps(slot.start, slot.end));
    }
}

#[tokio::test]
async fn test_propose_slots_direct() {
    let h = harness();
    h.calendar.set_busy(
        "x@example.com",
        vec![BusyInterval::new(monday(9, 0), monday(10, 0))],
    );
    let proposal = h
        .coord
        .propose_slots(
            &["x@example.com".to_string()],
            60,
            taskmaster_action::SearchWindow::new(monday(9, 0), monday(12, 0)),
            1,
        )
        .await
        .unwrap();
    assert_eq!(proposal.slots.len(), 1);
    assert_eq!(proposal.slots[0].start, monday(10, 0));

    assert!(matches!(
        h.coord
            .propose_slots(
                &[],
                30,
                taskmaster_action::SearchWindow::new(monday(9, 0), monday(12, 0)),
                1
            )
            .await
            .unwrap_err(),
        CoordinatorError::Scheduling(_)
    ));
}

#[tokio::test]
async fn test_no_free_slot_fails_and_releases_quota() {
    let h = harness();
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);
    h.calendar.set_busy(
        "b@example.com",
        vec![BusyInterval::new(monday(0, 0), monday(23, 0))],
    );

    let err = h.submit(SCHEDULE).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::NoAvailableSlot));
    assert_eq!(h.used(ActionCategory::ScheduleProposal), 0);
    assert_eq!(h.last_audit().outcome, Outcome::Failed);
}

#[tokio::test]
async fn test_create_event_failure_releases_quota() {
    let h = harness();
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);
    h.calendar.fail_create.store(true, Ordering::SeqCst);
    let before = h.used(ActionCategory::ScheduleProposal);

    let err = h.submit(SCHEDULE).await.unwrap_err();
    assert!(matches!(err, CoordinatorError::Collaborator(_)));
    assert_eq!(h.used(ActionCategory::ScheduleProposal), before);

    let entry = h.last_audit();
    assert_eq!(entry.decision, Decision::Executed);
    assert_eq!(entry.outcome, Outcome::Failed);
    assert!(entry.error.unwrap().contains("calendar write rejected"));
}

#[tokio::test]
async fn test_failed_create_event_is_not_retried() {
    let h = harness();
    h.set_settings(SafetyMode::Auto, vec![meeting_rule()]);
    h.calendar.fail_create.store(true, Ordering::SeqCst);

    assert!(h.submit(SCHEDULE).await.is_err());
    assert_eq!(h.calendar.create_attempts.load(Ordering::SeqCst), 1);
    assert!(h.calendar.created().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_state_changing_timeout_is_not_retried() {
    let h = harness_with_timeout(100);
    h.set_settings(
        SafetyMode::Auto,
        vec![AutomationRule::new(IntentKind::DraftReply)],
    );
    h.limits.set_limit(Some(3));
    h.actions.hang.store(true, Ordering::SeqCst);

    let err = h.submit(DRAFT).await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Collaborator(CollaboratorError::Timeout { ref operation, after_ms: 100 })
            if operation == "draft_reply"
    ));
    assert_eq!(h.actions.calls(), 1);
    assert_eq!(h.used(ActionCategory::Action), 0);

    let entry = h.last_audit();
    assert_eq!(entry.decision, Decision::Executed);
    assert_eq!(entry.outcome, Outcome::Failed);
}

// =============================================================================
// Quota
// =============================================================================

#[tokio::test]
async fn test_quota_exhausted_rejects_without_dispatch() {
    let h = harness();
    h.limits.set_limit(Some(5));

    for _ in 0..5 {
        let outcome = h.submit("inbox").await.unwrap();
        assert!(matches!(outcome, SubmitOutcome::Executed { .. }));
    }
    let outcome = h.submit("inbox").await.unwrap();
    assert_eq!(
        outcome,
        SubmitOutcome::Rejected {
            reason: RejectReason::QuotaExceeded {
                category: ActionCategory::EmailSummary,
                remaining: 0,
            }
        }
    );
    assert_eq!(h.actions.calls(), 5);
    assert_eq!(h.last_audit().decision, Decision::Rejected);

    // Next month starts from zero again.
    h.clock
        .set(Utc.with_ymd_and_hms(2026, 11, 1, 9, 0, 0).unwrap());
    assert!(matches!(
        h.submit("inbox").await.unwrap(),
        SubmitOutcome::Executed { .. }
    ));
    assert_eq!(h.used(ActionCategory::EmailSummary), 1);
}

#[tokio::test]
async fn test_deferred_action_reserves_quota_on_approval() {
    let h = harness();
    h.limits.set_limit(Some(1));
    h.set_settings(SafetyMode::Confirmation, Vec::new());

    let first = token_of(h.submit(DRAFT).await.unwrap());
    let second = token_of(h.submit(DRAFT).await.unwrap());
    assert_eq!(h.used(ActionCategory::Action), 0);

    h.coord.approve(&first).await.unwrap();
    assert!(matches!(
        h.coord.approve(&second).await.unwrap_err(),
        CoordinatorError::QuotaExceeded {
            category: ActionCategory::Action
        }
    ));
    // Still pending, can be approved once quota frees up.
    assert_eq!(h.coord.list_pending(&account()).unwrap().len(), 1);
}

// =============================================================================
// Audit
// =============================================================================

#[tokio::test]
async fn test_unparseable_command_is_audited() {
    let h = harness();
    let err = h.submit("xyz123").await.unwrap_err();
    assert!(matches!(
        err,
        CoordinatorError::Parse(ParseError::UnknownCommand { .. })
    ));

    let entry = h.last_audit();
    assert_eq!(entry.outcome, Outcome::Failed);
    assert_eq!(entry.intent_kind, None);
    assert!(entry.error.unwrap().contains("xyz123"));
}

#[tokio::test]
async fn test_every_pass_leaves_one_entry() {
    let h = harness();
    h.set_settings(SafetyMode::Confirmation, Vec::new());

    h.submit("status").await.unwrap();
    let token = token_of(h.submit(DRAFT).await.unwrap());
    let _ = h.submit("bogus").await;
    h.coord.approve(&token).await.unwrap();

    assert_eq!(h.audit.entries().len(), 4);
    let recent = h.coord.recent_audit(Some(&account()), 2).unwrap();
    assert_eq!(recent[0].decision, Decision::Approved);
    assert_eq!(recent[1].intent_kind, None);
}

// =============================================================================
// Cancellation
// =============================================================================

#[tokio::test]
async fn test_cancel_in_flight_releases_and_audits() {
    let h = harness();
    h.actions.hang.store(true, Ordering::SeqCst);
    let cancel = CancelToken::new();

    let coord = Arc::clone(&h.coord);
    let waiter = cancel.clone();
    let handle = tokio::spawn(async move {
        coord
            .submit_cancellable(&account(), Intent::SummarizeInbox { max_results: 5 }, &waiter)
            .await
    });

    tokio::time::sleep(Duration::from_millis(20)).await;
    cancel.cancel();
    let result = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancel should unblock the request")
        .unwrap();

    assert!(matches!(result, Err(CoordinatorError::Cancelled)));
    assert_eq!(h.last_audit().outcome, Outcome::Cancelled);
    assert_eq!(h.used(ActionCategory::EmailSummary), 0);
}

#[tokio::test]
async fn test_cancel_before_start_skips_dispatch() {
    let h = harness();
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = h
        .coord
        .submit_cancellable(&account(), Intent::SummarizeInbox { max_results: 5 }, &cancel)
        .await;
    assert!(matches!(result, Err(CoordinatorError::Cancelled)));
    assert_eq!(h.actions.calls(), 0);
    assert_eq!(h.last_audit().outcome, Outcome::Cancelled);
}

// =============================================================================
// SQLite-backed stores
// =============================================================================

#[tokio::test]
async fn test_pending_survives_restart_on_sqlite() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("taskmaster.db");

    let token = {
        let db = Arc::new(Database::new(&path).unwrap());
        let h = harness_with(Stores::sqlite(db), Arc::new(InMemoryAuditSink::new()));
        h.set_settings(SafetyMode::Confirmation, Vec::new());
        token_of(h.submit(DRAFT).await.unwrap())
    };

    let db = Arc::new(Database::new(&path).unwrap());
    let h = harness_with(Stores::sqlite(db), Arc::new(InMemoryAuditSink::new()));
    h.set_settings(SafetyMode::Confirmation, Vec::new());

    assert_eq!(h.coord.list_pending(&account()).unwrap().len(), 1);
    h.coord.approve(&token).await.unwrap();
    assert_eq!(h.used(ActionCategory::Action), 1);

    let recent = h.coord.recent_audit(Some(&account()), 10).unwrap();
    assert_eq!(recent[0].decision, Decision::Approved);
    assert_eq!(recent[1].decision, Decision::AwaitingApproval);
}
