//! Timestamps as exchanged with the model service.
//!
//! The service writes `2019-11-15 00:00:00` (UTC) for training timestamps but
//! RFC 3339 strings and epoch milliseconds also show up in `meta` blocks, so
//! all three are accepted on input. Output is always the service format.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serializer};

pub const SERVICE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTimestamp {
    Text(String),
    Millis(i64),
}

pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(naive) = NaiveDateTime::parse_from_str(raw, SERVICE_FORMAT) {
        return Some(naive.and_utc());
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub fn format(ts: &DateTime<Utc>) -> String {
    ts.format(SERVICE_FORMAT).to_string()
}

pub fn serialize<S: Serializer>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error> {
    match value {
        Some(ts) => serializer.serialize_str(&format(ts)),
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error> {
    let raw: Option<RawTimestamp> = Option::deserialize(deserializer)?;
    match raw {
        None => Ok(None),
        Some(RawTimestamp::Text(s)) if s.trim().is_empty() => Ok(None),
        Some(RawTimestamp::Text(s)) => parse(&s)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("unrecognized timestamp '{}'", s))),
        Some(RawTimestamp::Millis(ms)) => Utc
            .timestamp_millis_opt(ms)
            .single()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("timestamp out of range: {}", ms))),
    }
}
