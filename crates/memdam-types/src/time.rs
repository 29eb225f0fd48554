//! Event time helpers.
//!
//! Times are UTC with microsecond precision. Storage uses integer
//! microseconds since the Unix epoch; the canonical form uses RFC 3339.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::error::TypeError;

/// The current time, truncated to microseconds.
pub fn now() -> DateTime<Utc> {
    normalize(Utc::now())
}

/// Drop sub-microsecond precision.
pub fn normalize(t: DateTime<Utc>) -> DateTime<Utc> {
    t.trunc_subsecs(6)
}

pub fn to_micros(t: &DateTime<Utc>) -> i64 {
    t.timestamp_micros()
}

pub fn from_micros(micros: i64) -> Result<DateTime<Utc>, TypeError> {
    DateTime::<Utc>::from_timestamp_micros(micros).ok_or_else(|| TypeError::InvalidTime {
        value: micros.to_string(),
        reason: "out of range".into(),
    })
}

/// `2024-01-02T03:04:05.000006Z`
pub fn to_iso8601(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Parse an RFC 3339 timestamp in any offset and convert it to UTC.
pub fn parse_iso8601(s: &str) -> Result<DateTime<Utc>, TypeError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| normalize(t.with_timezone(&Utc)))
        .map_err(|e| TypeError::InvalidTime {
            value: s.to_string(),
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn micros_roundtrip() {
        let t = now();
        assert_eq!(from_micros(to_micros(&t)).unwrap(), t);
    }

    #[test]
    fn normalize_truncates_nanos() {
        let t = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        assert_eq!(normalize(t).timestamp_subsec_nanos(), 123_456_000);
    }

    #[test]
    fn iso8601_is_utc_with_micros() {
        let t = Utc.timestamp_opt(0, 6_000).unwrap();
        assert_eq!(to_iso8601(&t), "1970-01-01T00:00:00.000006Z");
    }

    #[test]
    fn parse_converts_offsets_to_utc() {
        let t = parse_iso8601("2024-01-01T02:00:00+02:00").unwrap();
        assert_eq!(to_iso8601(&t), "2024-01-01T00:00:00.000000Z");
        assert!(parse_iso8601("yesterday").is_err());
    }
}
