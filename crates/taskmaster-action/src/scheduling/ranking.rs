//! Proposal ranking.

use taskmaster_core::config::BackfillPolicy;

use crate::types::{Proposal, TimeSlot};

/// Pick up to `max` slots: fully free ones first in time order, then partial
/// ones (earliest first, fewer unavailable attendees breaking ties) when the
/// backfill policy allows.
///
/// `slots` is consumed in chronological order and only until `max` free
/// slots have been seen, so an unbounded candidate stream is fine as long as
/// it eventually yields them or ends.
pub fn rank_slots(
    slots: impl IntoIterator<Item = TimeSlot>,
    max: usize,
    policy: BackfillPolicy,
) -> Proposal {
    if max == 0 {
        return Proposal::default();
    }

    let mut free: Vec<TimeSlot> = Vec::with_capacity(max);
    let mut partial: Vec<TimeSlot> = Vec::new();
    for slot in slots {
        if slot.is_all_free() {
            free.push(slot);
            if free.len() == max {
                break;
            }
        } else {
            partial.push(slot);
            // Only the best `max` partial slots can ever be backfilled.
            if partial.len() > 2 * max {
                keep_best(&mut partial, max);
            }
        }
    }
    free.sort_by_key(|s| s.start);

    let backfill = match policy {
        BackfillPolicy::WhenShort => free.len() < max,
        BackfillPolicy::OnlyWhenNoneFree => free.is_empty(),
    };
    if backfill {
        keep_best(&mut partial, max - free.len());
        free.extend(partial);
    }

    Proposal { slots: free }
}

fn keep_best(partial: &mut Vec<TimeSlot>, room: usize) {
    partial.sort_by_key(|s| (s.start, s.unavailable_count));
    partial.truncate(room);
}
