//! Token patterns recognised inside commands.

use regex::Regex;
use std::sync::LazyLock;

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(\d{1,4})(min|mins|minute|minutes|m|h|hr|hrs|hour|hours)$")
        .expect("Invalid duration regex")
});

static EMAIL_DOMAIN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@([^@\s]+)$").expect("Invalid email regex"));

/// Keywords that end a free-text section (title or attendee list).
pub const MARKERS: &[&str] = &["with", "from", "until", "max", "saying"];

pub fn is_marker(token: &str) -> bool {
    MARKERS.iter().any(|m| token.eq_ignore_ascii_case(m))
}

/// Parse a duration token such as `30min`, `45m` or `1h` into minutes.
///
/// Returns `None` if the token is not duration-shaped at all, and
/// `Some(0)` for a zero duration so the caller can reject it.
pub fn parse_duration(token: &str) -> Option<u32> {
    let caps = DURATION_RE.captures(token)?;
    let value: u32 = caps.get(1)?.as_str().parse().ok()?;
    let unit = caps.get(2)?.as_str().to_ascii_lowercase();
    if unit.starts_with('h') {
        value.checked_mul(60)
    } else {
        Some(value)
    }
}

/// Lowercased domain of an email-shaped identifier.
pub fn email_domain(identifier: &str) -> Option<String> {
    EMAIL_DOMAIN_RE
        .captures(identifier)
        .and_then(|c| c.get(1))
        .map(|d| d.as_str().to_ascii_lowercase())
}

/// Split an attendee token on commas and drop list glue.
pub fn split_attendees(token: &str) -> impl Iterator<Item = &str> {
    token
        .split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty() && !t.eq_ignore_ascii_case("and"))
}
