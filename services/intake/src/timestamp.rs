//! Ingestion timestamps, kept at millisecond precision and rendered as
//! `2026-10-16T09:30:00.123Z` everywhere they leave the process.

use chrono::{DateTime, SecondsFormat, Utc};

/// Current wall-clock time truncated to whole milliseconds
pub fn now() -> DateTime<Utc> {
    let now = Utc::now();
    DateTime::from_timestamp_millis(now.timestamp_millis()).unwrap_or(now)
}

/// ISO-8601 rendering with millisecond precision and a `Z` suffix
pub fn to_iso(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp into UTC
pub fn parse_iso(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|ts| ts.with_timezone(&Utc))
}

/// Serde adapter for `DateTime<Utc>` fields using [`to_iso`]
pub mod iso_millis {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&super::to_iso(ts))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        super::parse_iso(&raw).map_err(de::Error::custom)
    }
}
