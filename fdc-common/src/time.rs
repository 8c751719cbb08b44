//! Timestamp utilities

use chrono::{DateTime, Duration, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Age of `then` as seen from `now`, clamped at zero for timestamps in the future
///
/// Device clocks drift; a snapshot stamped slightly ahead of the reader is
/// treated as brand new rather than producing a negative age.
pub fn age(then: DateTime<Utc>, now: DateTime<Utc>) -> Duration {
    let age = now - then;
    if age < Duration::zero() {
        Duration::zero()
    } else {
        age
    }
}

/// Seconds a timestamp may be ahead of the reader and still count as recent
pub const CLOCK_SKEW_TOLERANCE_SECS: i64 = 300;

/// Whether `then` falls inside the `window` ending at `now`
///
/// Timestamps up to [`CLOCK_SKEW_TOLERANCE_SECS`] in the future count as age zero.
/// Anything further ahead was written under a wrong clock and is never
/// recent, so it cannot stay fresh forever.
pub fn within(then: DateTime<Utc>, now: DateTime<Utc>, window: Duration) -> bool {
    if then - now > Duration::seconds(CLOCK_SKEW_TOLERANCE_SECS) {
        return false;
    }
    age(then, now) < window
}
