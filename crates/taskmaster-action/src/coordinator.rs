//! Coordinator.
//!
//! Runs one command end to end: interpret, meter, gate, dispatch, audit.
//! Every pass through `submit`, `approve` and `reject` leaves exactly one
//! audit entry describing how it ended. The one exception is a token that
//! was never issued, which has no account to record against.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use taskmaster_core::clock::Clock;
use taskmaster_core::config::TaskMasterConfig;
use taskmaster_core::types::{AccountId, SafetyMode, UsageCounter};

use crate::account::AccountDirectory;
use crate::audit::{AuditLogger, AuditSink, InMemoryAuditSink};
use crate::cancel::CancelToken;
use crate::collaborator::{
    call_with_timeout, with_retry, ActionCollaborator, CalendarResolver, RetryPolicy,
};
use crate::error::{CollaboratorError, CoordinatorError, ParseError};
use crate::gate::{GateDecision, SafetyGate};
use crate::intent::CommandInterpreter;
use crate::pending::{InMemoryPendingStore, PendingStore};
use crate::plan::LimitsProvider;
use crate::quota::{InMemoryUsageStore, QuotaDecision, QuotaTracker, Reservation, UsageStore};
use crate::scheduling::{Participant, SchedulingEngine};
use crate::types::{
    AuditEntry, Decision, DispatchMode, ExecutionResult, Intent, IntentKind, MeetingRequest,
    Outcome, PendingAction, Proposal, RejectReason, SearchWindow, StatusReport, SubmitOutcome,
};

/// The three shared stores the engine writes to.
pub struct Stores {
    pub usage: Arc<dyn UsageStore>,
    pub pending: Arc<dyn PendingStore>,
    pub audit: Arc<dyn AuditSink>,
}

impl Stores {
    pub fn in_memory() -> Self {
        Self {
            usage: Arc::new(InMemoryUsageStore::new()),
            pending: Arc::new(InMemoryPendingStore::new()),
            audit: Arc::new(InMemoryAuditSink::new()),
        }
    }
}

/// External systems the engine consults or drives.
pub struct Collaborators {
    pub accounts: Arc<dyn AccountDirectory>,
    pub limits: Arc<dyn LimitsProvider>,
    pub calendars: Arc<dyn CalendarResolver>,
    pub actions: Arc<dyn ActionCollaborator>,
    pub clock: Arc<dyn Clock>,
}

pub struct Coordinator {
    interpreter: CommandInterpreter,
    gate: Arc<SafetyGate>,
    quota: QuotaTracker,
    scheduler: SchedulingEngine,
    audit: Arc<AuditLogger>,
    accounts: Arc<dyn AccountDirectory>,
    limits: Arc<dyn LimitsProvider>,
    calendars: Arc<dyn CalendarResolver>,
    actions: Arc<dyn ActionCollaborator>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    search_days: u32,
}

impl Coordinator {
    pub fn new(config: &TaskMasterConfig, stores: Stores, collaborators: Collaborators) -> Self {
        let audit = Arc::new(AuditLogger::new(stores.audit));
        let gate = Arc::new(SafetyGate::new(
            stores.pending,
            Arc::clone(&audit),
            Arc::clone(&collaborators.clock),
            Duration::hours(i64::from(config.safety.pending_ttl_hours)),
        ));
        let quota = QuotaTracker::new(
            stores.usage,
            Arc::clone(&collaborators.limits),
            Arc::clone(&collaborators.clock),
            config.quota.period,
        );
        let retry = RetryPolicy::from_config(&config.collaborators);

        Self {
            interpreter: CommandInterpreter::new(config.scheduling.max_proposals),
            gate,
            quota,
            scheduler: SchedulingEngine::new(config.scheduling.clone(), retry),
            audit,
            accounts: collaborators.accounts,
            limits: collaborators.limits,
            calendars: collaborators.calendars,
            actions: collaborators.actions,
            clock: collaborators.clock,
            retry,
            search_days: config.scheduling.search_days,
        }
    }

    pub fn gate(&self) -> Arc<SafetyGate> {
        Arc::clone(&self.gate)
    }

    // =========================================================================
    // Exposed operations
    // =========================================================================

    pub fn interpret(&self, text: &str) -> Result<Intent, ParseError> {
        self.interpreter.interpret(text)
    }

    /// Interpret `text` and submit the result. A parse failure is audited
    /// and returned as [`CoordinatorError::Parse`].
    pub async fn submit_text(
        &self,
        account: &AccountId,
        text: &str,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        match self.interpreter.interpret(text.trim()) {
            Ok(intent) => self.submit(account, intent).await,
            Err(e) => {
                debug!(account = %account, error = %e, "Command rejected");
                self.audit.record(
                    self.entry(account, None, Decision::Rejected, Outcome::Failed)
                        .with_error(e.to_string()),
                );
                Err(e.into())
            }
        }
    }

    pub async fn submit(
        &self,
        account: &AccountId,
        intent: Intent,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        self.submit_cancellable(account, intent, &CancelToken::new())
            .await
    }

    /// Submit an intent. `cancel` is honoured up to the point the terminal
    /// audit entry is written.
    pub async fn submit_cancellable(
        &self,
        account: &AccountId,
        intent: Intent,
        cancel: &CancelToken,
    ) -> Result<SubmitOutcome, CoordinatorError> {
        let kind = intent.kind();
        let fail = |e: CoordinatorError| self.fail(account, kind, Decision::Rejected, None, e);

        if cancel.is_cancelled() {
            return Err(fail(CoordinatorError::Cancelled));
        }

        let settings = self.accounts.settings(account).map_err(|e| fail(e.into()))?;
        let allows_auto = self
            .limits
            .allows_auto_actions(account)
            .map_err(|e| fail(e.into()))?;

        let reservation = match self.reserve(account, &intent).map_err(fail)? {
            Ok(reservation) => reservation,
            Err(reason) => {
                info!(account = %account, intent = %kind, reason = %reason, "Command rejected");
                self.audit.record(
                    self.entry(account, Some(kind), Decision::Rejected, Outcome::Failed)
                        .with_error(reason.to_string()),
                );
                return Ok(SubmitOutcome::Rejected { reason });
            }
        };

        if cancel.is_cancelled() {
            self.release(reservation.as_ref());
            return Err(fail(CoordinatorError::Cancelled));
        }

        match self
            .gate
            .evaluate(settings.mode, allows_auto, &settings.rules, &intent)
        {
            GateDecision::Defer => {
                // Quota is taken again when the action is approved.
                self.release(reservation.as_ref());
                let pending = self
                    .gate
                    .defer(account, intent, settings.mode)
                    .map_err(|e| fail(e.into()))?;
                self.audit.record(
                    self.entry(account, Some(kind), Decision::AwaitingApproval, Outcome::Pending)
                        .with_token(pending.token.clone()),
                );
                Ok(SubmitOutcome::AwaitingApproval {
                    token: pending.token,
                    expires_at: pending.expires_at,
                })
            }
            GateDecision::Execute => {
                let result = self
                    .execute(
                        account,
                        &intent,
                        settings.mode,
                        reservation,
                        Decision::Executed,
                        None,
                        cancel,
                    )
                    .await?;
                Ok(SubmitOutcome::Executed { result })
            }
        }
    }

    /// Approve a pending action and run it with the mode it was deferred under.
    pub async fn approve(&self, token: &str) -> Result<ExecutionResult, CoordinatorError> {
        let action = self.gate.open(token)?;
        let account = action.account_id.clone();
        let kind = action.intent.kind();

        let reservation = match self.reserve(&account, &action.intent) {
            Ok(Ok(reservation)) => reservation,
            Ok(Err(RejectReason::QuotaExceeded { category, .. })) => {
                // A concurrent resolution may have spent the last unit.
                self.gate.open(token)?;
                let err = CoordinatorError::QuotaExceeded { category };
                return Err(self.fail(&account, kind, Decision::Rejected, Some(token), err));
            }
            Err(e) => return Err(self.fail(&account, kind, Decision::Rejected, Some(token), e)),
        };

        let approved = match self.gate.approve(token) {
            Ok(approved) => approved,
            Err(e) => {
                self.release(reservation.as_ref());
                return Err(e.into());
            }
        };

        self.execute(
            &account,
            &approved.intent,
            approved.mode,
            reservation,
            Decision::Approved,
            Some(token),
            &CancelToken::new(),
        )
        .await
    }

    /// Reject a pending action without running it.
    pub fn reject(&self, token: &str) -> Result<PendingAction, CoordinatorError> {
        let action = self.gate.reject(token)?;
        self.audit.record(
            self.entry(
                &action.account_id,
                Some(action.intent.kind()),
                Decision::Rejected,
                Outcome::Declined,
            )
            .with_token(token),
        );
        Ok(action)
    }

    /// Rank meeting slots for `attendees` without metering or auditing.
    pub async fn propose_slots(
        &self,
        attendees: &[String],
        duration_minutes: u32,
        window: SearchWindow,
        max: usize,
    ) -> Result<Proposal, CoordinatorError> {
        let participants: Vec<Participant> = attendees
            .iter()
            .map(|a| Participant::new(a.as_str(), self.calendars.resolve(a)))
            .collect();
        Ok(self
            .scheduler
            .propose(&participants, duration_minutes, window, max)
            .await?)
    }

    pub fn get_usage(&self, account: &AccountId) -> Result<Vec<UsageCounter>, CoordinatorError> {
        Ok(self.quota.get_usage(account)?)
    }

    /// Outstanding approvals for an account, newest first.
    pub fn list_pending(&self, account: &AccountId) -> Result<Vec<PendingAction>, CoordinatorError> {
        Ok(self.gate.list_for_account(account, true)?)
    }

    pub fn recent_audit(
        &self,
        account: Option<&AccountId>,
        limit: usize,
    ) -> Result<Vec<AuditEntry>, CoordinatorError> {
        Ok(self.audit.recent(account, limit)?)
    }

    /// Expire overdue pending actions now. Returns how many were expired.
    pub fn expire_pending(&self) -> Result<usize, CoordinatorError> {
        Ok(self.gate.expire_due()?)
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Take one unit of quota for the intent's category. The inner `Err` is a
    /// quota denial, the outer one a store failure.
    fn reserve(
        &self,
        account: &AccountId,
        intent: &Intent,
    ) -> Result<Result<Option<Reservation>, RejectReason>, CoordinatorError> {
        let Some(category) = intent.category() else {
            return Ok(Ok(None));
        };
        match self.quota.check_and_reserve(account, category)? {
            QuotaDecision::Allowed { reservation, .. } => Ok(Ok(Some(reservation))),
            QuotaDecision::Denied { remaining } => Ok(Err(RejectReason::QuotaExceeded {
                category,
                remaining,
            })),
        }
    }

    fn release(&self, reservation: Option<&Reservation>) {
        if let Some(reservation) = reservation {
            if let Err(e) = self.quota.release(reservation) {
                warn!(
                    account = %reservation.account_id,
                    category = %reservation.category,
                    error = %e,
                    "Failed to release quota reservation"
                );
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        account: &AccountId,
        intent: &Intent,
        mode: SafetyMode,
        reservation: Option<Reservation>,
        decision: Decision,
        token: Option<&str>,
        cancel: &CancelToken,
    ) -> Result<ExecutionResult, CoordinatorError> {
        let kind = intent.kind();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoordinatorError::Cancelled),
            result = self.dispatch(account, intent, mode) => result,
        };

        match result {
            Ok(result) => {
                if let Some(reservation) = &reservation {
                    self.quota.commit(reservation);
                }
                let mut entry = self.entry(account, Some(kind), decision, Outcome::Succeeded);
                if let Some(token) = token {
                    entry = entry.with_token(token);
                }
                self.audit.record(entry);
                info!(account = %account, intent = %kind, decision = %decision, "Command executed");
                Ok(result)
            }
            Err(e) => {
                self.release(reservation.as_ref());
                Err(self.fail(account, kind, decision, token, e))
            }
        }
    }

    async fn dispatch(
        &self,
        account: &AccountId,
        intent: &Intent,
        mode: SafetyMode,
    ) -> Result<ExecutionResult, CoordinatorError> {
        match intent {
            Intent::SummarizeInbox { .. } => {
                let result = with_retry("summarize_inbox", &self.retry, || {
                    self.actions.execute(account, intent, DispatchMode::ReadOnly)
                })
                .await?;
                Ok(ExecutionResult::Collaborator(result))
            }
            Intent::DraftReply { .. } => {
                let dispatch = match mode {
                    SafetyMode::Draft => DispatchMode::Draft,
                    SafetyMode::Confirmation | SafetyMode::Auto => DispatchMode::Live,
                };
                let result = call_with_timeout(
                    "draft_reply",
                    self.retry.timeout,
                    self.actions.execute(account, intent, dispatch),
                )
                .await?;
                Ok(ExecutionResult::Collaborator(result))
            }
            Intent::ScheduleMeeting(request) => self.schedule_meeting(account, request, mode).await,
            Intent::ShowFreeTime(query) => {
                let participants = self.participants(account, &query.attendees);
                let window = self.search_window(query.earliest, query.latest);
                let proposal = self
                    .scheduler
                    .propose(&participants, query.duration_minutes, window, query.max_results)
                    .await?;
                Ok(ExecutionResult::FreeTime(proposal))
            }
            Intent::ShowStatus => Ok(ExecutionResult::Status(self.status(account)?)),
        }
    }

    async fn schedule_meeting(
        &self,
        account: &AccountId,
        request: &MeetingRequest,
        mode: SafetyMode,
    ) -> Result<ExecutionResult, CoordinatorError> {
        let participants = self.participants(account, &request.attendees);
        let window = self.search_window(request.earliest, request.latest);
        let proposal = self
            .scheduler
            .propose(&participants, request.duration_minutes, window, 1)
            .await?;
        let slot = proposal
            .first_free()
            .cloned()
            .ok_or(CoordinatorError::NoAvailableSlot)?;

        if mode == SafetyMode::Draft {
            return Ok(ExecutionResult::MeetingDrafted { slot });
        }

        let calendar = self.calendars.resolve(account.as_str()).ok_or_else(|| {
            CollaboratorError::Unavailable(format!("No calendar for organizer {}", account))
        })?;
        let event_id = call_with_timeout(
            "create_event",
            self.retry.timeout,
            calendar.create_event(&request.title, slot.start, slot.end, &request.attendees),
        )
        .await?;
        info!(account = %account, event_id = %event_id, start = %slot.start, "Meeting scheduled");
        Ok(ExecutionResult::MeetingScheduled { event_id, slot })
    }

    fn status(&self, account: &AccountId) -> Result<StatusReport, CoordinatorError> {
        let settings = self.accounts.settings(account)?;
        Ok(StatusReport {
            account_id: account.clone(),
            mode: settings.mode,
            plan: settings.plan,
            usage: self.quota.get_usage(account)?,
            pending: self.gate.list_for_account(account, true)?,
            dropped_audit_records: self.audit.dropped_records(),
        })
    }

    /// The organizer followed by each distinct attendee.
    fn participants(&self, account: &AccountId, attendees: &[String]) -> Vec<Participant> {
        let mut seen: Vec<String> = vec![account.as_str().to_ascii_lowercase()];
        let mut participants = vec![Participant::new(
            account.as_str(),
            self.calendars.resolve(account.as_str()),
        )];
        for attendee in attendees {
            let key = attendee.to_ascii_lowercase();
            if seen.contains(&key) {
                continue;
            }
            seen.push(key);
            participants.push(Participant::new(
                attendee.as_str(),
                self.calendars.resolve(attendee),
            ));
        }
        participants
    }

    /// Requested bounds, never starting in the past and never reaching past
    /// the configured search horizon, which is also the default end.
    fn search_window(
        &self,
        earliest: Option<DateTime<Utc>>,
        latest: Option<DateTime<Utc>>,
    ) -> SearchWindow {
        let now = self.clock.now();
        let start = earliest.map_or(now, |e| e.max(now));
        let horizon = start + Duration::days(i64::from(self.search_days.max(1)));
        let end = latest.map_or(horizon, |l| l.min(horizon));
        SearchWindow::new(start, end)
    }

    // =========================================================================
    // Audit helpers
    // =========================================================================

    fn entry(
        &self,
        account: &AccountId,
        kind: Option<IntentKind>,
        decision: Decision,
        outcome: Outcome,
    ) -> AuditEntry {
        AuditEntry::new(self.clock.now(), account.clone(), kind, decision, outcome)
    }

    /// Audit a failed pass and hand the error back.
    fn fail(
        &self,
        account: &AccountId,
        kind: IntentKind,
        decision: Decision,
        token: Option<&str>,
        error: CoordinatorError,
    ) -> CoordinatorError {
        let outcome = match error {
            CoordinatorError::Cancelled => Outcome::Cancelled,
            _ => Outcome::Failed,
        };
        warn!(account = %account, intent = %kind, outcome = %outcome, error = %error, "Command failed");
        let mut entry = self
            .entry(account, Some(kind), decision, outcome)
            .with_error(error.to_string());
        if let Some(token) = token {
            entry = entry.with_token(token);
        }
        self.audit.record(entry);
        error
    }
}
