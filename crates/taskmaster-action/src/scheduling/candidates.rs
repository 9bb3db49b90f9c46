//! Candidate slot generation.
//!
//! Walks the search window day by day in the configured working-hours
//! calendar and emits fixed-length slots on an aligned grid.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, Utc};

use taskmaster_core::config::SchedulingConfig;

use crate::types::SearchWindow;

/// Every candidate `[start, end)` of `duration_minutes` inside working hours
/// and inside `window`, in chronological order.
///
/// Slots are produced lazily, one working day at a time.
pub fn candidate_slots(
    config: &SchedulingConfig,
    window: SearchWindow,
    duration_minutes: u32,
) -> CandidateSlots {
    let start_hour = config.working_hours_start.min(24);
    let end_hour = config.working_hours_end.min(24);
    let offset = Duration::minutes(i64::from(config.utc_offset_minutes));
    let duration = Duration::minutes(i64::from(duration_minutes));
    let step = match config.step_minutes {
        0 => duration,
        minutes => Duration::minutes(i64::from(minutes)),
    };

    let open = duration_minutes > 0 && window.end > window.start && start_hour < end_hour;
    CandidateSlots {
        window,
        working_days: config.working_days.clone(),
        start_hour,
        end_hour,
        offset,
        duration,
        step,
        alignment: Duration::minutes(i64::from(config.alignment_minutes)),
        next_day: open.then(|| (window.start + offset).date_naive()),
        last_day: (window.end + offset).date_naive(),
        cursor: None,
    }
}

/// Iterator returned by [`candidate_slots`].
#[derive(Debug, Clone)]
pub struct CandidateSlots {
    window: SearchWindow,
    working_days: Vec<u32>,
    start_hour: u32,
    end_hour: u32,
    offset: Duration,
    duration: Duration,
    step: Duration,
    alignment: Duration,
    /// Next local day to open, `None` once exhausted.
    next_day: Option<NaiveDate>,
    last_day: NaiveDate,
    /// Next slot start and the close of the day being walked.
    cursor: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl CandidateSlots {
    /// Position the cursor on the first slot of `day`, if it is a working day.
    fn open_day(&mut self, day: NaiveDate) {
        if !self
            .working_days
            .contains(&day.weekday().num_days_from_monday())
        {
            return;
        }
        let midnight = to_utc(day_at(day, 0), self.offset);
        let open = to_utc(day_at(day, self.start_hour), self.offset).max(self.window.start);
        let close = to_utc(day_at(day, self.end_hour), self.offset).min(self.window.end);
        self.cursor = Some((align_up(open, midnight, self.alignment), close));
    }
}

impl Iterator for CandidateSlots {
    type Item = (DateTime<Utc>, DateTime<Utc>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some((slot_start, close)) = self.cursor {
                let slot_end = slot_start + self.duration;
                if slot_end <= close {
                    self.cursor = Some((slot_start + self.step, close));
                    return Some((slot_start, slot_end));
                }
                self.cursor = None;
            }

            let day = self.next_day.filter(|day| *day <= self.last_day)?;
            self.next_day = day.succ_opt();
            self.open_day(day);
        }
    }
}

/// Local wall-clock time at `hour` on `day`. Hour 24 is the next midnight.
fn day_at(day: NaiveDate, hour: u32) -> NaiveDateTime {
    day.and_time(chrono::NaiveTime::MIN) + Duration::hours(i64::from(hour))
}

fn to_utc(local: NaiveDateTime, offset: Duration) -> DateTime<Utc> {
    (local - offset).and_utc()
}

/// Smallest `origin + k * alignment` that is not before `at`.
fn align_up(at: DateTime<Utc>, origin: DateTime<Utc>, alignment: Duration) -> DateTime<Utc> {
    let grid = alignment.num_seconds();
    if grid <= 0 {
        return at;
    }
    let elapsed = (at - origin).num_seconds();
    let steps = elapsed.div_euclid(grid) + i64::from(elapsed.rem_euclid(grid) != 0);
    origin + Duration::seconds(steps * grid)
}
