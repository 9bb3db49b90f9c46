//! External collaborator seams: calendars and the mail/automation backend.
//!
//! Every call runs under a timeout. Only idempotent reads are retried;
//! state-changing calls get exactly one attempt.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::warn;

use taskmaster_core::config::CollaboratorConfig;
use taskmaster_core::types::AccountId;

use crate::error::CollaboratorError;
use crate::intent::patterns::email_domain;
use crate::types::{ActionResult, BusyInterval, DispatchMode, Intent};

/// A calendar that can report busy time and create events.
#[async_trait]
pub trait CalendarCollaborator: Send + Sync {
    /// Busy intervals for `attendee` overlapping `[start, end)`.
    async fn busy_intervals(
        &self,
        attendee: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<BusyInterval>, CollaboratorError>;

    /// Create an event and return its identifier.
    async fn create_event(
        &self,
        title: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        attendees: &[String],
    ) -> Result<String, CollaboratorError>;
}

/// Mail and automation backend for non-scheduling intents.
#[async_trait]
pub trait ActionCollaborator: Send + Sync {
    async fn execute(
        &self,
        account: &AccountId,
        intent: &Intent,
        mode: DispatchMode,
    ) -> Result<ActionResult, CollaboratorError>;
}

/// Maps an attendee identifier to the calendar that knows about them.
pub trait CalendarResolver: Send + Sync {
    fn resolve(&self, attendee: &str) -> Option<Arc<dyn CalendarCollaborator>>;
}

/// Resolves attendees by exact identifier, then by email domain, then by an
/// optional fallback calendar.
#[derive(Default)]
pub struct CalendarDirectory {
    by_attendee: HashMap<String, Arc<dyn CalendarCollaborator>>,
    by_domain: HashMap<String, Arc<dyn CalendarCollaborator>>,
    fallback: Option<Arc<dyn CalendarCollaborator>>,
}

impl CalendarDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory that sends every attendee to one calendar.
    pub fn shared(calendar: Arc<dyn CalendarCollaborator>) -> Self {
        Self {
            fallback: Some(calendar),
            ..Self::default()
        }
    }

    pub fn with_attendee(
        mut self,
        attendee: &str,
        calendar: Arc<dyn CalendarCollaborator>,
    ) -> Self {
        self.by_attendee
            .insert(attendee.to_ascii_lowercase(), calendar);
        self
    }

    pub fn with_domain(mut self, domain: &str, calendar: Arc<dyn CalendarCollaborator>) -> Self {
        self.by_domain.insert(domain.to_ascii_lowercase(), calendar);
        self
    }
}

impl CalendarResolver for CalendarDirectory {
    fn resolve(&self, attendee: &str) -> Option<Arc<dyn CalendarCollaborator>> {
        if let Some(calendar) = self.by_attendee.get(&attendee.to_ascii_lowercase()) {
            return Some(Arc::clone(calendar));
        }
        if let Some(calendar) = email_domain(attendee).and_then(|d| self.by_domain.get(&d)) {
            return Some(Arc::clone(calendar));
        }
        self.fallback.clone()
    }
}

/// Timeout and retry budget for collaborator calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub timeout: Duration,
    /// Extra attempts after the first, for reads only.
    pub retries: u32,
    /// Delay before the first retry; doubles each time.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CollaboratorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CollaboratorConfig) -> Self {
        Self {
            timeout: Duration::from_millis(config.timeout_ms),
            retries: config.read_retries,
            backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Run one collaborator call under a timeout.
pub async fn call_with_timeout<T, F>(
    operation: &str,
    timeout: Duration,
    call: F,
) -> Result<T, CollaboratorError>
where
    F: Future<Output = Result<T, CollaboratorError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(CollaboratorError::Timeout {
            operation: operation.to_string(),
            after_ms: timeout.as_millis() as u64,
        }),
    }
}

/// Run an idempotent read with timeout, bounded retries and exponential
/// backoff. Never use this for calls with side effects.
pub async fn with_retry<T, F, Fut>(
    operation: &str,
    policy: &RetryPolicy,
    mut call: F,
) -> Result<T, CollaboratorError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CollaboratorError>>,
{
    let mut delay = policy.backoff;
    let mut attempt = 0;
    loop {
        match call_with_timeout(operation, policy.timeout, call()).await {
            Ok(value) => return Ok(value),
            Err(e) if attempt < policy.retries => {
                attempt += 1;
                warn!(
                    operation,
                    attempt,
                    error = %e,
                    "Collaborator read failed, retrying"
                );
                tokio::time::sleep(delay).await;
                delay = delay.saturating_mul(2);
            }
            Err(e) => return Err(e),
        }
    }
}
