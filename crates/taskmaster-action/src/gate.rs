//! Safety gate.
//!
//! Decides whether an intent runs now or waits for a human, and owns the
//! lifecycle of the resulting [`PendingAction`]s. Read-only intents always
//! run. State-changing intents run immediately only in `auto` mode, on a
//! plan that allows it, when an automation rule matches; everything else is
//! deferred behind a single-use token.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use taskmaster_core::clock::Clock;
use taskmaster_core::config::AutomationRuleConfig;
use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, SafetyMode};

use crate::audit::AuditLogger;
use crate::error::GateError;
use crate::intent::patterns::email_domain;
use crate::pending::state_machine::validate_transition;
use crate::pending::PendingStore;
use crate::types::{AuditEntry, Decision, Intent, IntentKind, Outcome, PendingAction, PendingStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Execute,
    Defer,
}

/// Pre-authorisation for intents of a given shape in `auto` mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AutomationRule {
    pub intent: IntentKind,
    /// Lowercased; every attendee must be in one of these (empty = any).
    pub attendee_domains: Vec<String>,
    pub max_duration_minutes: Option<u32>,
}

impl AutomationRule {
    pub fn new(intent: IntentKind) -> Self {
        Self {
            intent,
            attendee_domains: Vec::new(),
            max_duration_minutes: None,
        }
    }

    pub fn from_config(config: &AutomationRuleConfig) -> Result<Self, TaskMasterError> {
        Ok(Self {
            intent: config.intent.parse()?,
            attendee_domains: config
                .attendee_domains
                .iter()
                .map(|d| d.trim_start_matches('@').to_ascii_lowercase())
                .collect(),
            max_duration_minutes: config.max_duration_minutes,
        })
    }

    pub fn matches(&self, intent: &Intent) -> bool {
        if intent.kind() != self.intent {
            return false;
        }
        match intent {
            Intent::ScheduleMeeting(req) => {
                let duration_ok = self
                    .max_duration_minutes
                    .map_or(true, |max| req.duration_minutes <= max);
                let domains_ok = self.attendee_domains.is_empty()
                    || req.attendees.iter().all(|a| {
                        email_domain(a).is_some_and(|d| self.attendee_domains.contains(&d))
                    });
                duration_ok && domains_ok
            }
            _ => true,
        }
    }
}

pub struct SafetyGate {
    store: Arc<dyn PendingStore>,
    audit: Arc<AuditLogger>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

impl SafetyGate {
    pub fn new(
        store: Arc<dyn PendingStore>,
        audit: Arc<AuditLogger>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            ttl,
        }
    }

    /// Decide what to do with an intent for an account in `mode`.
    ///
    /// `allows_auto` is false when the account's plan does not include
    /// automatic actions; `auto` then behaves like `confirmation`.
    pub fn evaluate(
        &self,
        mode: SafetyMode,
        allows_auto: bool,
        rules: &[AutomationRule],
        intent: &Intent,
    ) -> GateDecision {
        if intent.is_read_only() {
            return GateDecision::Execute;
        }
        match mode {
            SafetyMode::Auto if !allows_auto => {
                debug!(intent = %intent.kind(), "Plan does not allow auto actions, deferring");
                GateDecision::Defer
            }
            SafetyMode::Auto if rules.iter().any(|r| r.matches(intent)) => GateDecision::Execute,
            _ => GateDecision::Defer,
        }
    }

    /// Store the intent as a pending action and return it.
    pub fn defer(
        &self,
        account: &AccountId,
        intent: Intent,
        mode: SafetyMode,
    ) -> Result<PendingAction, GateError> {
        let now = self.clock.now();
        let action = PendingAction {
            token: Uuid::new_v4().to_string(),
            account_id: account.clone(),
            intent,
            mode,
            status: PendingStatus::Pending,
            created_at: now,
            expires_at: now + self.ttl,
        };
        self.store.insert(&action)?;
        info!(
            account = %account,
            token = %action.token,
            intent = %action.intent.kind(),
            "Action deferred for approval"
        );
        Ok(action)
    }

    /// Look up a token that is still open for resolution.
    ///
    /// A pending action past its expiry is expired here and reported as
    /// [`GateError::TokenExpired`]. Every refusal for a known token is
    /// audited; unknown tokens have no account to audit against.
    pub fn open(&self, token: &str) -> Result<PendingAction, GateError> {
        let Some(action) = self.store.get(token)? else {
            debug!(token = %token, "Unknown approval token");
            return Err(GateError::TokenNotFound(token.to_string()));
        };

        match action.status {
            PendingStatus::Pending => {}
            PendingStatus::Expired => {
                return Err(self.refuse(&action, GateError::TokenExpired(token.to_string())))
            }
            status => {
                let err = GateError::AlreadyResolved {
                    token: token.to_string(),
                    status,
                };
                return Err(self.refuse(&action, err));
            }
        }

        if action.is_expired_at(self.clock.now()) {
            // Losing this CAS means a resolution landed first.
            if !self.expire(&action)? {
                return Err(self.lost_race(&action)?);
            }
            return Err(GateError::TokenExpired(token.to_string()));
        }
        Ok(action)
    }

    pub fn approve(&self, token: &str) -> Result<PendingAction, GateError> {
        self.resolve(token, PendingStatus::Approved)
    }

    pub fn reject(&self, token: &str) -> Result<PendingAction, GateError> {
        self.resolve(token, PendingStatus::Rejected)
    }

    fn resolve(&self, token: &str, to: PendingStatus) -> Result<PendingAction, GateError> {
        let mut action = self.open(token)?;
        validate_transition(action.status, to)?;

        if !self
            .store
            .compare_and_set(token, PendingStatus::Pending, to, self.clock.now())?
        {
            return Err(self.lost_race(&action)?);
        }

        action.status = to;
        info!(
            account = %action.account_id,
            token = %token,
            status = %to,
            "Pending action resolved"
        );
        Ok(action)
    }

    /// Report whatever the winner of a CAS race left behind.
    fn lost_race(&self, action: &PendingAction) -> Result<GateError, GateError> {
        let token = action.token.clone();
        let status = self
            .store
            .get(&token)?
            .map(|a| a.status)
            .unwrap_or(PendingStatus::Pending);
        let err = match status {
            PendingStatus::Expired => GateError::TokenExpired(token),
            status => GateError::AlreadyResolved { token, status },
        };
        Ok(self.refuse(action, err))
    }

    /// Audit a refused approval or rejection and hand the error back.
    fn refuse(&self, action: &PendingAction, error: GateError) -> GateError {
        debug!(
            account = %action.account_id,
            token = %action.token,
            error = %error,
            "Resolution refused"
        );
        self.audit.record(
            AuditEntry::new(
                self.clock.now(),
                action.account_id.clone(),
                Some(action.intent.kind()),
                Decision::Rejected,
                Outcome::Failed,
            )
            .with_error(error.to_string())
            .with_token(action.token.clone()),
        );
        error
    }

    /// Expire one action. Returns `false` if someone else resolved it first.
    fn expire(&self, action: &PendingAction) -> Result<bool, GateError> {
        let now = self.clock.now();
        if !self.store.compare_and_set(
            &action.token,
            PendingStatus::Pending,
            PendingStatus::Expired,
            now,
        )? {
            return Ok(false);
        }
        info!(account = %action.account_id, token = %action.token, "Pending action expired");
        self.audit.record(
            AuditEntry::new(
                now,
                action.account_id.clone(),
                Some(action.intent.kind()),
                Decision::Expired,
                Outcome::Expired,
            )
            .with_token(action.token.clone()),
        );
        Ok(true)
    }

    /// Expire every overdue pending action. Returns how many were expired.
    pub fn expire_due(&self) -> Result<usize, GateError> {
        let due = self.store.list_expired(self.clock.now())?;
        let mut expired = 0;
        for action in &due {
            match self.expire(action) {
                Ok(true) => expired += 1,
                Ok(false) => {}
                Err(e) => warn!(token = %action.token, error = %e, "Failed to expire action"),
            }
        }
        Ok(expired)
    }

    /// Actions for one account, newest first. `only_pending` hides resolved ones.
    pub fn list_for_account(
        &self,
        account: &AccountId,
        only_pending: bool,
    ) -> Result<Vec<PendingAction>, GateError> {
        let status = only_pending.then_some(PendingStatus::Pending);
        let mut actions = self.store.list_by_account(account, status)?;
        if only_pending {
            let now = self.clock.now();
            actions.retain(|a| !a.is_expired_at(now));
        }
        Ok(actions)
    }
}
