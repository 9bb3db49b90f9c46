//! Scheduling engine.
//!
//! Finds meeting slots that work for every participant. Busy time is read
//! from each participant's calendar once per request, concurrently, and
//! never cached across requests. A participant whose calendar cannot be
//! reached counts as unavailable for every slot, so an `all_free` slot is
//! only ever proposed when every participant positively reported free time.

pub mod candidates;
pub mod ranking;

use std::sync::Arc;

use chrono::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use taskmaster_core::config::SchedulingConfig;

use crate::collaborator::{with_retry, CalendarCollaborator, RetryPolicy};
use crate::error::SchedulingError;
use crate::types::{Availability, BusyInterval, Proposal, SearchWindow, TimeSlot};

pub use candidates::{candidate_slots, CandidateSlots};
pub use ranking::rank_slots;

/// One person whose availability constrains the meeting.
#[derive(Clone)]
pub struct Participant {
    pub id: String,
    /// `None` when no calendar could be resolved for this participant.
    pub calendar: Option<Arc<dyn CalendarCollaborator>>,
}

impl Participant {
    pub fn new(id: impl Into<String>, calendar: Option<Arc<dyn CalendarCollaborator>>) -> Self {
        Self {
            id: id.into(),
            calendar,
        }
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("id", &self.id)
            .field("has_calendar", &self.calendar.is_some())
            .finish()
    }
}

pub struct SchedulingEngine {
    config: SchedulingConfig,
    retry: RetryPolicy,
}

impl SchedulingEngine {
    pub fn new(config: SchedulingConfig, retry: RetryPolicy) -> Self {
        Self { config, retry }
    }

    /// Rank up to `max` candidate slots of `duration_minutes` in `window`.
    ///
    /// An empty proposal is a normal result, not an error. A window longer
    /// than `search_days` is cut to that horizon.
    pub async fn propose(
        &self,
        participants: &[Participant],
        duration_minutes: u32,
        window: SearchWindow,
        max: usize,
    ) -> Result<Proposal, SchedulingError> {
        if participants.is_empty() {
            return Err(SchedulingError::NoAttendees);
        }
        if duration_minutes == 0 {
            return Err(SchedulingError::InvalidDuration(duration_minutes));
        }
        if window.end <= window.start {
            return Err(SchedulingError::InvalidWindow);
        }
        if max == 0 {
            return Ok(Proposal::default());
        }

        let window = self.bounded(window);
        let mut candidates = candidate_slots(&self.config, window, duration_minutes).peekable();
        if candidates.peek().is_none() {
            debug!("No candidate slots inside working hours");
            return Ok(Proposal::default());
        }

        let busy = self.fetch_busy(participants, window).await;

        let slots = candidates.map(|(start, end)| {
            let unavailable_count = busy
                .iter()
                .filter(|intervals| match intervals {
                    Some(intervals) => intervals.iter().any(|b| b.overlaps(start, end)),
                    None => true,
                })
                .count();
            TimeSlot {
                start,
                end,
                availability: if unavailable_count == 0 {
                    Availability::AllFree
                } else {
                    Availability::Partial
                },
                unavailable_count,
            }
        });

        let proposal = rank_slots(slots, max, self.config.backfill);
        debug!(
            participants = participants.len(),
            duration_minutes,
            proposed = proposal.slots.len(),
            free = proposal.slots.iter().filter(|s| s.is_all_free()).count(),
            "Slots proposed"
        );
        Ok(proposal)
    }

    fn bounded(&self, window: SearchWindow) -> SearchWindow {
        let horizon = window.start + Duration::days(i64::from(self.config.search_days.max(1)));
        if window.end <= horizon {
            return window;
        }
        debug!(
            requested_end = %window.end,
            horizon = %horizon,
            "Search window cut to the scheduling horizon"
        );
        SearchWindow::new(window.start, horizon)
    }

    /// Busy intervals per participant, in participant order. `None` marks
    /// unknown availability.
    async fn fetch_busy(
        &self,
        participants: &[Participant],
        window: SearchWindow,
    ) -> Vec<Option<Vec<BusyInterval>>> {
        let mut busy: Vec<Option<Vec<BusyInterval>>> = vec![None; participants.len()];
        let mut tasks = JoinSet::new();

        for (index, participant) in participants.iter().enumerate() {
            let Some(calendar) = participant.calendar.clone() else {
                debug!(participant = %participant.id, "No calendar, availability unknown");
                continue;
            };
            let id = participant.id.clone();
            let policy = self.retry;
            tasks.spawn(async move {
                let result = with_retry("busy_intervals", &policy, || {
                    calendar.busy_intervals(&id, window.start, window.end)
                })
                .await;
                (index, id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, _, Ok(intervals))) => busy[index] = Some(intervals),
                Ok((_, id, Err(e))) => {
                    warn!(participant = %id, error = %e, "Availability unknown");
                }
                Err(e) => warn!(error = %e, "Availability lookup task failed"),
            }
        }
        busy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollaboratorError;
    use async_trait::async_trait;
    use chrono::{DateTime, TimeZone, Utc};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicU32, Ordering};
    use taskmaster_core::config::BackfillPolicy;

    #[derive(Default)]
    struct FakeCalendar {
        busy: HashMap<String, Vec<BusyInterval>>,
        failing: bool,
        calls: AtomicU32,
    }

    #[async_trait]
    impl CalendarCollaborator for FakeCalendar {
        async fn busy_intervals(
            &self,
            attendee: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
        ) -> Result<Vec<BusyInterval>, CollaboratorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(CollaboratorError::Unavailable("calendar down".to_string()));
            }
            Ok(self.busy.get(attendee).cloned().unwrap_or_default())
        }

        async fn create_event(
            &self,
            _title: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _attendees: &[String],
        ) -> Result<String, CollaboratorError> {
            Ok("evt-1".to_string())
        }
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 12, h, m, 0).unwrap()
    }

    fn morning() -> SearchWindow {
        SearchWindow::new(at(9, 0), at(12, 0))
    }

    fn engine() -> SchedulingEngine {
        SchedulingEngine::new(
            SchedulingConfig::default(),
            RetryPolicy {
                timeout: std::time::Duration::from_millis(100),
                retries: 1,
                backoff: std::time::Duration::from_millis(1),
            },
        )
    }

    fn calendar_with_a_busy() -> Arc<dyn CalendarCollaborator> {
        let mut busy = HashMap::new();
        busy.insert("a".to_string(), vec![BusyInterval::new(at(10, 0), at(11, 0))]);
        Arc::new(FakeCalendar {
            busy,
            ..FakeCalendar::default()
        })
    }

    // ---- validation ----

    #[tokio::test]
    async fn test_rejects_bad_input() {
        let engine = engine();
        let cal = calendar_with_a_busy();
        let people = vec![Participant::new("a", Some(cal))];

        assert_eq!(
            engine.propose(&[], 30, morning(), 5).await.unwrap_err(),
            SchedulingError::NoAttendees
        );
        assert_eq!(
            engine.propose(&people, 0, morning(), 5).await.unwrap_err(),
            SchedulingError::InvalidDuration(0)
        );
        assert_eq!(
            engine
                .propose(&people, 30, SearchWindow::new(at(12, 0), at(9, 0)), 5)
                .await
                .unwrap_err(),
            SchedulingError::InvalidWindow
        );
    }

    // ---- availability ----

    #[tokio::test]
    async fn test_busy_attendee_scenario() {
        let cal = calendar_with_a_busy();
        let people = vec![
            Participant::new("a", Some(Arc::clone(&cal))),
            Participant::new("b", Some(cal)),
        ];
        let proposal = engine().propose(&people, 30, morning(), 5).await.unwrap();

        assert_eq!(proposal.slots[0].start, at(9, 0));
        let free: Vec<_> = proposal
            .slots
            .iter()
            .filter(|s| s.is_all_free())
            .map(|s| s.start)
            .collect();
        assert_eq!(free, vec![at(9, 0), at(9, 30), at(11, 0), at(11, 30)]);

        // Backfilled with the earliest partial slot.
        let last = proposal.slots.last().unwrap();
        assert_eq!(last.start, at(10, 0));
        assert_eq!(last.unavailable_count, 1);

        let busy = BusyInterval::new(at(10, 0), at(11, 0));
        for slot in proposal.slots.iter().filter(|s| s.is_all_free()) {
            assert!(!busy.overlaps(slot.start, slot.end));
        }
    }

    #[tokio::test]
    async fn test_no_backfill_when_policy_forbids() {
        let engine = SchedulingEngine::new(
            SchedulingConfig {
                backfill: BackfillPolicy::OnlyWhenNoneFree,
                ..SchedulingConfig::default()
            },
            RetryPolicy::default(),
        );
        let people = vec![Participant::new("a", Some(calendar_with_a_busy()))];
        let proposal = engine.propose(&people, 30, morning(), 10).await.unwrap();
        assert_eq!(proposal.slots.len(), 4);
        assert!(proposal.slots.iter().all(|s| s.is_all_free()));
    }

    #[tokio::test]
    async fn test_unresolved_participant_never_free() {
        let people = vec![
            Participant::new("b", Some(calendar_with_a_busy())),
            Participant::new("ghost@nowhere.test", None),
        ];
        let proposal = engine().propose(&people, 30, morning(), 3).await.unwrap();
        assert_eq!(proposal.slots.len(), 3);
        assert!(proposal
            .slots
            .iter()
            .all(|s| !s.is_all_free() && s.unavailable_count == 1));
    }

    #[tokio::test]
    async fn test_failing_calendar_retried_then_unknown() {
        let failing = Arc::new(FakeCalendar {
            failing: true,
            ..FakeCalendar::default()
        });
        let people = vec![Participant::new("a", Some(failing.clone()))];
        let proposal = engine().propose(&people, 30, morning(), 2).await.unwrap();

        assert_eq!(failing.calls.load(Ordering::SeqCst), 2);
        assert!(proposal.first_free().is_none());
        assert_eq!(proposal.slots.len(), 2);
    }

    #[tokio::test]
    async fn test_off_hours_window_is_empty_not_error() {
        let people = vec![Participant::new("a", Some(calendar_with_a_busy()))];
        let evening = SearchWindow::new(at(19, 0), at(23, 0));
        let proposal = engine().propose(&people, 30, evening, 5).await.unwrap();
        assert!(proposal.is_empty());
    }

    #[derive(Default)]
    struct WindowRecorder {
        asked: std::sync::Mutex<Vec<SearchWindow>>,
    }

    #[async_trait]
    impl CalendarCollaborator for WindowRecorder {
        async fn busy_intervals(
            &self,
            _attendee: &str,
            start: DateTime<Utc>,
            end: DateTime<Utc>,
        ) -> Result<Vec<BusyInterval>, CollaboratorError> {
            self.asked.lock().unwrap().push(SearchWindow::new(start, end));
            Ok(Vec::new())
        }

        async fn create_event(
            &self,
            _title: &str,
            _start: DateTime<Utc>,
            _end: DateTime<Utc>,
            _attendees: &[String],
        ) -> Result<String, CollaboratorError> {
            Ok("evt-1".to_string())
        }
    }

    #[tokio::test]
    async fn test_far_future_window_cut_to_horizon() {
        let recorder = Arc::new(WindowRecorder::default());
        let people = vec![Participant::new("a", Some(recorder.clone()))];
        let until = at(9, 0) + Duration::days(365 * 500);
        let proposal = engine()
            .propose(&people, 30, SearchWindow::new(at(9, 0), until), 3)
            .await
            .unwrap();

        assert_eq!(proposal.slots.len(), 3);
        assert_eq!(proposal.slots[0].start, at(9, 0));
        let asked = recorder.asked.lock().unwrap().clone();
        assert_eq!(asked, vec![SearchWindow::new(at(9, 0), at(9, 0) + Duration::days(7))]);
    }

    #[tokio::test]
    async fn test_busy_horizon_yields_partial_slots_only() {
        // Every slot in the seven-day horizon is busy for "a".
        let mut busy = HashMap::new();
        busy.insert(
            "a".to_string(),
            vec![BusyInterval::new(at(0, 0), at(0, 0) + Duration::days(400))],
        );
        let cal: Arc<dyn CalendarCollaborator> = Arc::new(FakeCalendar {
            busy,
            ..FakeCalendar::default()
        });
        let people = vec![Participant::new("a", Some(cal))];
        let window = SearchWindow::new(at(9, 0), at(9, 0) + Duration::days(365));
        let proposal = engine().propose(&people, 30, window, 2).await.unwrap();
        assert_eq!(proposal.slots.len(), 2);
        assert!(proposal.first_free().is_none());
    }

    #[tokio::test]
    async fn test_zero_max_is_empty() {
        let people = vec![Participant::new("a", Some(calendar_with_a_busy()))];
        assert!(engine()
            .propose(&people, 30, morning(), 0)
            .await
            .unwrap()
            .is_empty());
    }
}
