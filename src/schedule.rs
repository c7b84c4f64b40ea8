//! Cron and relative-time schedule evaluation.
//!
//! One-shot tasks accept an absolute ISO-8601 timestamp or a relative
//! duration (`"90s"`, `"2h"`). Recurring tasks use standard 5-field Unix
//! cron expressions (minute, hour, day-of-month, month, day-of-week),
//! evaluated in an IANA timezone.
//!
//! Note: the `cron` crate requires 6 fields (sec min hour dom month dow),
//! so 5-field expressions are normalized by prepending `"0 "` to match at
//! second 0.

use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use cron::Schedule;

/// Evaluation failures surfaced to the tool layer.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("invalid time: {0}")]
    InvalidTime(String),
    #[error("invalid cron expression: {0}")]
    InvalidCron(String),
    #[error("invalid timezone: {0}")]
    InvalidTimezone(String),
    #[error("cron expression has no occurrence within one year: {0}")]
    Unfeasible(String),
}

/// Matches are searched no further than this far ahead; an expression with
/// no occurrence inside the horizon is rejected as unfeasible.
const FEASIBILITY_HORIZON_DAYS: i64 = 366;

/// Convert a 5-field Unix cron expression to the 6-field form the `cron`
/// crate parses.
fn normalize_cron_expr(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() == 5 {
        format!("0 {}", fields.join(" "))
    } else {
        cron_expr.to_string()
    }
}

/// Parse an IANA timezone name; empty or missing input means UTC.
pub fn parse_timezone(name: Option<&str>) -> Result<Tz, ScheduleError> {
    match name {
        None => Ok(Tz::UTC),
        Some(s) if s.trim().is_empty() => Ok(Tz::UTC),
        Some(s) => s
            .parse::<Tz>()
            .map_err(|_| ScheduleError::InvalidTimezone(s.to_string())),
    }
}

/// Parse a relative duration of the form `<integer><unit>` where unit is
/// one of ms, s, m, h, d, w.
pub fn parse_relative(input: &str) -> Result<Duration, ScheduleError> {
    let trimmed = input.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .ok_or_else(|| ScheduleError::InvalidTime(format!("missing unit in '{trimmed}'")))?;
    let (digits, unit) = trimmed.split_at(split);
    let value: i64 = digits
        .parse()
        .map_err(|_| ScheduleError::InvalidTime(format!("bad number in '{trimmed}'")))?;
    if value <= 0 {
        return Err(ScheduleError::InvalidTime(format!(
            "duration must be positive: '{trimmed}'"
        )));
    }
    match unit {
        "ms" => Ok(Duration::milliseconds(value)),
        "s" => Ok(Duration::seconds(value)),
        "m" => Ok(Duration::minutes(value)),
        "h" => Ok(Duration::hours(value)),
        "d" => Ok(Duration::days(value)),
        "w" => Ok(Duration::weeks(value)),
        other => Err(ScheduleError::InvalidTime(format!(
            "unknown duration unit '{other}'"
        ))),
    }
}

/// Parse an absolute ISO-8601 timestamp; a timestamp without an offset is
/// taken as UTC.
pub fn parse_absolute(input: &str) -> Result<DateTime<Utc>, ScheduleError> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(input) {
        return Ok(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(input, "%Y-%m-%dT%H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&naive));
    }
    Err(ScheduleError::InvalidTime(format!(
        "unparseable timestamp '{input}'"
    )))
}

/// Resolve the fire instant for a one-shot task from either an absolute
/// timestamp (`at`) or a relative duration (`in`). Absolute timestamps
/// strictly in the past are rejected.
pub fn resolve_fire_at(
    at: Option<&str>,
    relative: Option<&str>,
    now: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    match (at, relative) {
        (Some(abs), _) => {
            let fire_at = parse_absolute(abs)?;
            if fire_at < now {
                return Err(ScheduleError::InvalidTime(format!(
                    "'{abs}' is in the past"
                )));
            }
            Ok(fire_at)
        }
        (None, Some(rel)) => Ok(now + parse_relative(rel)?),
        (None, None) => Err(ScheduleError::InvalidTime(
            "one of 'at' or 'in' is required".to_string(),
        )),
    }
}

/// Smallest instant strictly greater than `after` matching the expression,
/// evaluated in `tz`. Fails if the expression is unparseable or has no
/// match within one year.
pub fn next_after(
    cron_expr: &str,
    tz: Tz,
    after: DateTime<Utc>,
) -> Result<DateTime<Utc>, ScheduleError> {
    let normalized = normalize_cron_expr(cron_expr);
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| ScheduleError::InvalidCron(format!("'{cron_expr}': {e}")))?;

    let local = after.with_timezone(&tz);
    let next = schedule
        .after(&local)
        .next()
        .ok_or_else(|| ScheduleError::Unfeasible(cron_expr.to_string()))?
        .with_timezone(&Utc);

    if next - after > Duration::days(FEASIBILITY_HORIZON_DAYS) {
        return Err(ScheduleError::Unfeasible(cron_expr.to_string()));
    }
    Ok(next)
}

/// The next `n` matches of the expression after `now`, for previews.
pub fn upcoming(cron_expr: &str, tz: Tz, n: usize) -> Result<Vec<DateTime<Utc>>, ScheduleError> {
    let normalized = normalize_cron_expr(cron_expr);
    let schedule = Schedule::from_str(&normalized)
        .map_err(|e| ScheduleError::InvalidCron(format!("'{cron_expr}': {e}")))?;

    let local = Utc::now().with_timezone(&tz);
    Ok(schedule
        .after(&local)
        .take(n)
        .map(|dt| dt.with_timezone(&Utc))
        .collect())
}

const WEEKDAYS: [&str; 7] = [
    "Sunday",
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
];

/// Best-effort human rendering of a cron expression. Unrecognized shapes
/// come back verbatim.
pub fn describe(cron_expr: &str) -> String {
    let fields: Vec<&str> = cron_expr.split_whitespace().collect();
    if fields.len() != 5 {
        return cron_expr.to_string();
    }
    let (minute, hour, dom, month, dow) = (fields[0], fields[1], fields[2], fields[3], fields[4]);

    if dom != "*" || month != "*" {
        return cron_expr.to_string();
    }

    if let Some(step) = minute.strip_prefix("*/") {
        if hour == "*" && dow == "*" && step.parse::<u32>().is_ok() {
            return format!("Every {step} minutes");
        }
        return cron_expr.to_string();
    }

    let Ok(m) = minute.parse::<u32>() else {
        return cron_expr.to_string();
    };

    if hour == "*" && dow == "*" {
        return format!("At minute {m} of every hour");
    }

    let Ok(h) = hour.parse::<u32>() else {
        return cron_expr.to_string();
    };

    match dow {
        "*" => format!("At {h:02}:{m:02} every day"),
        day => match day.parse::<usize>() {
            Ok(d) if d < 7 => format!("At {h:02}:{m:02} on {}", WEEKDAYS[d]),
            _ => cron_expr.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn normalize_prepends_seconds_to_five_fields() {
        assert_eq!(normalize_cron_expr("0 9 * * *"), "0 0 9 * * *");
        assert_eq!(normalize_cron_expr("0 0 9 * * *"), "0 0 9 * * *");
    }

    #[test]
    fn parse_relative_understands_all_units() {
        assert_eq!(parse_relative("500ms").unwrap(), Duration::milliseconds(500));
        assert_eq!(parse_relative("30s").unwrap(), Duration::seconds(30));
        assert_eq!(parse_relative("5m").unwrap(), Duration::minutes(5));
        assert_eq!(parse_relative("2h").unwrap(), Duration::hours(2));
        assert_eq!(parse_relative("1d").unwrap(), Duration::days(1));
        assert_eq!(parse_relative("2w").unwrap(), Duration::weeks(2));
    }

    #[test]
    fn parse_relative_rejects_garbage() {
        assert!(parse_relative("abc").is_err());
        assert!(parse_relative("10").is_err());
        assert!(parse_relative("10y").is_err());
        assert!(parse_relative("0s").is_err());
        assert!(parse_relative("-5m").is_err());
    }

    #[test]
    fn resolve_fire_at_rejects_past_absolute() {
        let now = Utc::now();
        let past = (now - Duration::hours(1)).to_rfc3339();
        let err = resolve_fire_at(Some(&past), None, now).unwrap_err();
        assert!(matches!(err, ScheduleError::InvalidTime(_)));
    }

    #[test]
    fn resolve_fire_at_adds_relative_duration() {
        let now = Utc::now();
        let fire_at = resolve_fire_at(None, Some("90s"), now).unwrap();
        assert_eq!(fire_at, now + Duration::seconds(90));
    }

    #[test]
    fn resolve_fire_at_requires_one_input() {
        assert!(resolve_fire_at(None, None, Utc::now()).is_err());
    }

    #[test]
    fn next_after_is_strictly_greater() {
        // 09:00 daily: asking at exactly 09:00 must return tomorrow.
        let at_nine = Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap();
        let next = next_after("0 9 * * *", Tz::UTC, at_nine).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap());
    }

    #[test]
    fn next_after_honors_timezone() {
        // 09:00 in New York during EST is 14:00 UTC.
        let t = Utc.with_ymd_and_hms(2026, 1, 15, 0, 0, 0).unwrap();
        let next = next_after("0 9 * * *", Tz::America__New_York, t).unwrap();
        assert_eq!(next, Utc.with_ymd_and_hms(2026, 1, 15, 14, 0, 0).unwrap());
    }

    #[test]
    fn next_after_rejects_unparseable() {
        assert!(matches!(
            next_after("not a cron", Tz::UTC, Utc::now()),
            Err(ScheduleError::InvalidCron(_))
        ));
    }

    #[test]
    fn upcoming_returns_ascending_matches() {
        let times = upcoming("*/5 * * * *", Tz::UTC, 3).unwrap();
        assert_eq!(times.len(), 3);
        assert!(times[0] < times[1] && times[1] < times[2]);
    }

    #[test]
    fn parse_timezone_defaults_to_utc() {
        assert_eq!(parse_timezone(None).unwrap(), Tz::UTC);
        assert_eq!(parse_timezone(Some("")).unwrap(), Tz::UTC);
        assert_eq!(
            parse_timezone(Some("Europe/Berlin")).unwrap(),
            Tz::Europe__Berlin
        );
        assert!(parse_timezone(Some("Mars/Olympus")).is_err());
    }

    #[test]
    fn describe_common_shapes() {
        assert_eq!(describe("0 9 * * *"), "At 09:00 every day");
        assert_eq!(describe("30 14 * * 1"), "At 14:30 on Monday");
        assert_eq!(describe("15 * * * *"), "At minute 15 of every hour");
        assert_eq!(describe("*/10 * * * *"), "Every 10 minutes");
        // Unrecognized shapes fall back to the raw expression.
        assert_eq!(describe("0 9 1 * *"), "0 9 1 * *");
        assert_eq!(describe("bogus"), "bogus");
    }
}
