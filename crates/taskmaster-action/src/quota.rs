//! Quota tracker.
//!
//! Counts metered actions per account and category against the plan limit.
//! A check and its increment happen inside one [`UsageStore::update`] call,
//! so concurrent submissions can never push a counter past its limit.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Duration, Utc};
use tracing::{debug, info, warn};

use taskmaster_core::clock::Clock;
use taskmaster_core::config::QuotaPeriod;
use taskmaster_core::error::TaskMasterError;
use taskmaster_core::types::{AccountId, ActionCategory, UsageCounter};

use crate::error::QuotaError;
use crate::plan::LimitsProvider;

/// Shared counter storage.
pub trait UsageStore: Send + Sync {
    /// Atomically read, transform and write back one counter.
    fn update(
        &self,
        account: &AccountId,
        category: ActionCategory,
        op: &mut dyn FnMut(Option<UsageCounter>) -> UsageCounter,
    ) -> Result<UsageCounter, TaskMasterError>;
}

/// In-memory usage store.
#[derive(Default)]
pub struct InMemoryUsageStore {
    counters: Mutex<HashMap<(AccountId, ActionCategory), UsageCounter>>,
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl UsageStore for InMemoryUsageStore {
    fn update(
        &self,
        account: &AccountId,
        category: ActionCategory,
        op: &mut dyn FnMut(Option<UsageCounter>) -> UsageCounter,
    ) -> Result<UsageCounter, TaskMasterError> {
        let mut counters = self
            .counters
            .lock()
            .map_err(|e| TaskMasterError::Storage(format!("Lock poisoned: {}", e)))?;
        let key = (account.clone(), category);
        let next = op(counters.get(&key).cloned());
        counters.insert(key, next.clone());
        Ok(next)
    }
}

/// Proof of a reserved unit, needed to release it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub account_id: AccountId,
    pub category: ActionCategory,
    pub period_start: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QuotaDecision {
    /// One unit was reserved. `remaining` is after the reservation.
    Allowed {
        remaining: Option<u32>,
        reservation: Reservation,
    },
    /// Nothing was reserved.
    Denied { remaining: u32 },
}

pub struct QuotaTracker {
    store: Arc<dyn UsageStore>,
    limits: Arc<dyn LimitsProvider>,
    clock: Arc<dyn Clock>,
    period: QuotaPeriod,
}

impl QuotaTracker {
    pub fn new(
        store: Arc<dyn UsageStore>,
        limits: Arc<dyn LimitsProvider>,
        clock: Arc<dyn Clock>,
        period: QuotaPeriod,
    ) -> Self {
        Self {
            store,
            limits,
            clock,
            period,
        }
    }

    /// Reserve one unit if the account is under its limit.
    pub fn check_and_reserve(
        &self,
        account: &AccountId,
        category: ActionCategory,
    ) -> Result<QuotaDecision, QuotaError> {
        let limit = self.limits.limit(account, category)?;
        let now = self.clock.now();
        let mut reserved = false;

        let counter = self.store.update(account, category, &mut |current| {
            let mut counter = self.rolled(current, account, category, limit, now);
            reserved = !counter.is_exhausted();
            if reserved {
                counter.used += 1;
            }
            counter
        })?;

        if reserved {
            debug!(
                account = %account,
                category = %category,
                used = counter.used,
                "Quota reserved"
            );
            Ok(QuotaDecision::Allowed {
                remaining: counter.remaining(),
                reservation: Reservation {
                    account_id: account.clone(),
                    category,
                    period_start: counter.period_start,
                },
            })
        } else {
            info!(
                account = %account,
                category = %category,
                used = counter.used,
                limit = ?counter.limit,
                "Quota exhausted"
            );
            Ok(QuotaDecision::Denied {
                remaining: counter.remaining().unwrap_or(0),
            })
        }
    }

    /// Keep a reservation after the action succeeded.
    pub fn commit(&self, reservation: &Reservation) {
        debug!(
            account = %reservation.account_id,
            category = %reservation.category,
            "Quota reservation committed"
        );
    }

    /// Give back a reserved unit. A reservation from a period that has since
    /// rolled over is dropped, since the new period never counted it.
    pub fn release(&self, reservation: &Reservation) -> Result<(), QuotaError> {
        let now = self.clock.now();
        let limit = self
            .limits
            .limit(&reservation.account_id, reservation.category)?;

        self.store.update(
            &reservation.account_id,
            reservation.category,
            &mut |current| {
                let mut counter = self.rolled(
                    current,
                    &reservation.account_id,
                    reservation.category,
                    limit,
                    now,
                );
                if counter.period_start == reservation.period_start {
                    counter.used = counter.used.saturating_sub(1);
                } else {
                    warn!(
                        account = %reservation.account_id,
                        category = %reservation.category,
                        "Dropping release for a previous quota period"
                    );
                }
                counter
            },
        )?;
        debug!(
            account = %reservation.account_id,
            category = %reservation.category,
            "Quota reservation released"
        );
        Ok(())
    }

    /// Current counters for every metered category, rolled to the current
    /// period and carrying the current limits.
    ///
    /// After a plan downgrade the stored count can exceed the new limit. The
    /// stored value is kept so outstanding reservations still release
    /// correctly, but the reported `used` never exceeds `limit`.
    pub fn get_usage(&self, account: &AccountId) -> Result<Vec<UsageCounter>, QuotaError> {
        let now = self.clock.now();
        let mut usage = Vec::with_capacity(ActionCategory::ALL.len());
        for category in ActionCategory::ALL {
            let limit = self.limits.limit(account, category)?;
            let mut counter = self.store.update(account, category, &mut |current| {
                self.rolled(current, account, category, limit, now)
            })?;
            if let Some(limit) = counter.limit {
                counter.used = counter.used.min(limit);
            }
            usage.push(counter);
        }
        Ok(usage)
    }

    /// Bring a stored counter up to `now`: refresh the limit and reset the
    /// count if its period has ended.
    fn rolled(
        &self,
        current: Option<UsageCounter>,
        account: &AccountId,
        category: ActionCategory,
        limit: Option<u32>,
        now: DateTime<Utc>,
    ) -> UsageCounter {
        match current {
            Some(mut counter) => {
                let start = period_start(self.period, Some(counter.period_start), now);
                if start != counter.period_start {
                    counter.used = 0;
                    counter.period_start = start;
                }
                counter.limit = limit;
                counter
            }
            None => UsageCounter::new(
                account.clone(),
                category,
                limit,
                period_start(self.period, None, now),
            ),
        }
    }
}

/// Start of the period containing `now`.
fn period_start(
    period: QuotaPeriod,
    previous: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> DateTime<Utc> {
    match period {
        QuotaPeriod::CalendarMonth => {
            let first = now.date_naive().with_day(1).unwrap_or(now.date_naive());
            first.and_hms_opt(0, 0, 0).map_or(now, |dt| dt.and_utc())
        }
        QuotaPeriod::Rolling30Days => match previous {
            Some(start) if start <= now => {
                let elapsed = (now - start).num_days() / 30;
                start + Duration::days(elapsed * 30)
            }
            _ => now,
        },
    }
}
