//! The 24-hour retention rule, defined once.
//!
//! `load`, the sweeper, and the remaining-time display all go through these
//! functions.

use chrono::{DateTime, Duration, Utc};

/// How long an enhanced result is kept after upload.
pub const RETENTION_HOURS: i64 = 24;

pub fn retention() -> Duration {
    Duration::hours(RETENTION_HOURS)
}

/// A record is valid while less than the retention window has elapsed since
/// upload. Uploads stamped in the future (clock skew) count as valid.
pub fn is_valid(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    now - uploaded_at < retention()
}

pub fn is_expired(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    !is_valid(uploaded_at, now)
}

/// Time left before the cutoff, floored at zero and capped at the window.
pub fn time_remaining(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let remaining = uploaded_at + retention() - now;
    remaining.clamp(Duration::zero(), retention())
}

/// `"20m"` under an hour, otherwise `"22h 0m"`. Partial minutes are dropped.
pub fn format_remaining(remaining: Duration) -> String {
    let total_minutes = remaining.num_minutes().max(0);
    if total_minutes < 60 {
        format!("{}m", total_minutes)
    } else {
        format!("{}h {}m", total_minutes / 60, total_minutes % 60)
    }
}

pub fn time_remaining_display(uploaded_at: DateTime<Utc>, now: DateTime<Utc>) -> String {
    format_remaining(time_remaining(uploaded_at, now))
}
