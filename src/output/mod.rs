//! Terminal output: prefixed per-repository writers, label colours, and
//! relative times.

pub mod color;
pub mod prefix;

use chrono::{DateTime, TimeZone, Utc};

pub use color::{Color, ColorAllocator, Painter};
pub use prefix::{PrefixWriter, SharedSink};

/// Render how long ago `then` was, relative to `now` ("3 hours ago").
///
/// Times in the future render as "from now".
pub fn time_ago<Tz: TimeZone>(then: &DateTime<Tz>, now: DateTime<Utc>) -> String {
    let delta = now.signed_duration_since(then);
    let (seconds, suffix) = if delta.num_seconds() < 0 {
        (-delta.num_seconds(), "from now")
    } else {
        (delta.num_seconds(), "ago")
    };

    const MINUTE: i64 = 60;
    const HOUR: i64 = 60 * MINUTE;
    const DAY: i64 = 24 * HOUR;
    const WEEK: i64 = 7 * DAY;
    const MONTH: i64 = 30 * DAY;
    const YEAR: i64 = 365 * DAY;

    let (count, unit) = match seconds {
        s if s < 1 => return "now".to_string(),
        s if s < MINUTE => (s, "second"),
        s if s < HOUR => (s / MINUTE, "minute"),
        s if s < DAY => (s / HOUR, "hour"),
        s if s < WEEK => (s / DAY, "day"),
        s if s < MONTH => (s / WEEK, "week"),
        s if s < YEAR => (s / MONTH, "month"),
        s => (s / YEAR, "year"),
    };

    let plural = if count == 1 { "" } else { "s" };
    format!("{} {}{} {}", count, unit, plural, suffix)
}
