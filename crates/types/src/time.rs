//! Timestamp helpers.
//!
//! Every persisted timestamp in CORTEX is an ISO-8601 UTC string. String
//! comparison of these values matches chronological comparison, which the
//! temporal filters in the fact store rely on.

use chrono::{DateTime, SecondsFormat, Utc};

/// Returns the current UTC time as an ISO-8601 string with microsecond
/// precision, e.g. `2026-08-01T12:34:56.123456Z`.
pub fn now_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parses an ISO-8601 timestamp, accepting both `Z` and offset suffixes.
///
/// Returns `None` when the input is not a valid timestamp. Callers treat
/// this as a validation failure; attacker-controlled strings are never
/// interpolated into SQL.
pub fn parse_iso(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Normalizes a caller-supplied timestamp into the canonical storage form.
pub fn normalize_iso(value: &str) -> Option<String> {
    parse_iso(value).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Micros, true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_iso_round_trips() {
        let ts = now_iso();
        assert!(parse_iso(&ts).is_some());
        assert_eq!(normalize_iso(&ts).as_deref(), Some(ts.as_str()));
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_iso("not-a-timestamp").is_none());
        assert!(parse_iso("2026-13-40T99:00:00Z").is_none());
    }

    #[test]
    fn string_order_matches_time_order() {
        let a = "2026-01-01T00:00:00.000000Z";
        let b = "2026-01-01T00:00:00.000001Z";
        assert!(a < b);
        assert!(parse_iso(a).unwrap() < parse_iso(b).unwrap());
    }
}
