//! Schedule time parsing
//!
//! Turns what an operator types into an absolute publish time.

use chrono::{DateTime, Duration, Utc};

use crate::error::{CrosscastError, Result};

/// Parse a schedule time relative to `now`.
///
/// Accepted, in order:
/// - `now`
/// - RFC 3339 timestamps: `2026-11-20T15:00:00Z`
/// - Unix seconds prefixed with `@`: `@1795000000`
/// - Durations from now: `90s`, `30m`, `2h 15m`, `1d`
/// - Natural language: `tomorrow 9am`, `next friday 14:00`
///
/// # Errors
///
/// `InvalidInput` for empty or unrecognised input.
pub fn parse_schedule_time(input: &str, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CrosscastError::InvalidInput(
            "Schedule time cannot be empty".to_string(),
        ));
    }

    if input.eq_ignore_ascii_case("now") {
        return Ok(now);
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Some(secs) = input.strip_prefix('@') {
        let secs: i64 = secs
            .parse()
            .map_err(|_| CrosscastError::InvalidInput(format!("Invalid unix time: {}", input)))?;
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| CrosscastError::InvalidInput(format!("Unix time out of range: {}", input)));
    }

    if let Some(duration) = parse_duration(input) {
        return Ok(now + duration);
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us).map_err(|e| {
        CrosscastError::InvalidInput(format!("Could not parse schedule time '{}': {}", input, e))
    })
}

fn parse_duration(input: &str) -> Option<Duration> {
    let std_duration = humantime::parse_duration(input).ok()?;
    Duration::from_std(std_duration).ok()
}
