//! Absolute time bounds accepted by `from` / `until`.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

/// Parse `YYYY-MM-DD` (midnight UTC) or `YYYY-MM-DDTHH:MM` (UTC).
pub fn parse_when(token: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(token, "%Y-%m-%dT%H:%M") {
        return Some(dt.and_utc());
    }
    NaiveDate::parse_from_str(token, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}
