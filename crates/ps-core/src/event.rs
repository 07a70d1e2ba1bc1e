//! Raw device events as reported by the pump/CGM vendor.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::event_code::EventCode;
use crate::payload::{Payload, parse_number};
use crate::types::EventKey;

/// Naive formats accepted after RFC 3339. Interpreted as UTC.
const NAIVE_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"];

/// A raw event from the vendor stream. Never mutated by the core.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawDeviceEvent {
    /// Stable vendor identity.
    pub id: EventKey,
    /// Entry in the vendor event table.
    pub code: EventCode,
    /// Vendor timestamp, see [`parse_vendor_timestamp`].
    pub timestamp: String,
    /// String-encoded numeric value.
    #[serde(
        default,
        deserialize_with = "lenient_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<String>,
    /// Vendor JSON payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Soft-delete flag. Deleted events never produce output.
    #[serde(default)]
    pub deleted: bool,
}

impl RawDeviceEvent {
    /// Creates a live event with no value or payload.
    pub fn new(id: EventKey, code: EventCode, timestamp: impl Into<String>) -> Self {
        Self {
            id,
            code,
            timestamp: timestamp.into(),
            value: None,
            payload: None,
            deleted: false,
        }
    }

    #[must_use]
    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    #[must_use]
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub const fn deleted(mut self) -> Self {
        self.deleted = true;
        self
    }

    /// The event time as a UTC instant, if the vendor timestamp parses.
    pub fn instant(&self) -> Option<DateTime<Utc>> {
        parse_vendor_timestamp(&self.timestamp)
    }

    /// The event time in epoch milliseconds.
    pub fn timestamp_ms(&self) -> Option<i64> {
        self.instant().map(|dt| dt.timestamp_millis())
    }

    /// The string-encoded value parsed as a finite number.
    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_deref().and_then(parse_number)
    }

    pub fn payload(&self) -> Payload<'_> {
        Payload::parse(self.payload.as_ref())
    }

    pub const fn is_live(&self) -> bool {
        !self.deleted
    }
}

/// Converts a vendor timestamp to a UTC instant.
///
/// Supports:
/// - RFC 3339: "2024-01-01T12:00:00Z", "2024-01-01T07:00:00-05:00"
/// - Naive ISO (assumed UTC): "2024-01-01T12:00:00", "2024-01-01 12:00:00.250"
/// - Unix milliseconds: "1704110400000"
pub fn parse_vendor_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
            return Some(naive.and_utc());
        }
    }

    s.parse::<i64>().ok().and_then(DateTime::from_timestamp_millis)
}

/// Accepts `"4.5"`, `4.5` or `null` for the value field.
fn lenient_value<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(serde_json::Value::String(s)) => Some(s),
        Some(serde_json::Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn parse_rfc3339() {
        let dt = parse_vendor_timestamp("2024-01-01T12:00:00Z").unwrap();
        assert_eq!(dt.year(), 2024);
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn parse_rfc3339_with_offset() {
        let dt = parse_vendor_timestamp("2024-01-01T07:00:00-05:00").unwrap();
        assert_eq!(dt.hour(), 12);
    }

    #[test]
    fn parse_naive_as_utc() {
        let a = parse_vendor_timestamp("2024-01-01 12:00:00").unwrap();
        let b = parse_vendor_timestamp("2024-01-01T12:00:00").unwrap();
        let c = parse_vendor_timestamp("2024-01-01T12:00:00.250").unwrap();
        assert_eq!(a, b);
        assert_eq!(c.timestamp_millis() - a.timestamp_millis(), 250);
    }

    #[test]
    fn parse_millis() {
        let dt = parse_vendor_timestamp("1704110400000").unwrap();
        assert_eq!(dt.timestamp_millis(), 1_704_110_400_000);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_vendor_timestamp("yesterday").is_none());
        assert!(parse_vendor_timestamp("").is_none());
    }

    #[test]
    fn event_deserializes_numeric_value() {
        let json = r#"{
            "id": "1",
            "code": "basal_rate",
            "timestamp": "2024-01-01T00:00:00Z",
            "value": 0.85
        }"#;
        let event: RawDeviceEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.value.as_deref(), Some("0.85"));
        assert_eq!(event.numeric_value(), Some(0.85));
        assert!(event.is_live());
    }

    #[test]
    fn event_rejects_empty_id() {
        let json = r#"{"id": "", "code": "note", "timestamp": "2024-01-01T00:00:00Z"}"#;
        let result: Result<RawDeviceEvent, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }

    #[test]
    fn event_rejects_unknown_code() {
        let json = r#"{"id": "1", "code": "firmware_dump", "timestamp": "2024-01-01T00:00:00Z"}"#;
        let result: Result<RawDeviceEvent, _> = serde_json::from_str(json);
        assert!(result.is_err());
    }
}
