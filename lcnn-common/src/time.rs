//! Timestamp utilities

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Parse a feed timestamp.
///
/// Accepts RFC 3339 (`2025-10-17T14:02:11Z`, `2025-10-17T14:02:11-04:00`) and
/// offset-less ISO 8601 (`2025-10-17T14:02:11`), which is taken as UTC.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Canonical second-precision RFC 3339 rendering used in ledger keys
pub fn canonical(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Wikibase time value for "retrieved" references: `+YYYY-MM-DDT00:00:00Z`
pub fn wikibase_day(ts: &DateTime<Utc>) -> String {
    format!("+{}T00:00:00Z", ts.format("%Y-%m-%d"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_now_returns_valid_timestamp() {
        let timestamp = now();
        // Should be a reasonable timestamp (after year 2000)
        assert!(timestamp.timestamp() > 946_684_800);
    }

    #[test]
    fn test_parse_rfc3339_with_offset() {
        let ts = parse_timestamp("2025-10-17T10:00:00-04:00").unwrap();
        assert_eq!(ts, Utc.with_ymd_and_hms(2025, 10, 17, 14, 0, 0).unwrap());
    }

    #[test]
    fn test_parse_naive_is_utc() {
        let ts = parse_timestamp("2025-10-17T14:02:11").unwrap();
        assert_eq!(canonical(&ts), "2025-10-17T14:02:11Z");
    }

    #[test]
    fn test_parse_fractional_seconds_truncate_in_canonical() {
        let ts = parse_timestamp("2025-10-17T14:02:11.734Z").unwrap();
        assert_eq!(canonical(&ts), "2025-10-17T14:02:11Z");
    }

    #[test]
    fn test_parse_garbage() {
        assert!(parse_timestamp("yesterday").is_none());
        assert!(parse_timestamp("").is_none());
    }

    #[test]
    fn test_wikibase_day() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 9, 17, 45, 0).unwrap();
        assert_eq!(wikibase_day(&ts), "+2026-03-09T00:00:00Z");
    }
}
