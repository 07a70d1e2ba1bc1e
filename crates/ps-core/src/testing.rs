//! Event builders shared by unit tests.

use chrono::{DateTime, SecondsFormat};

use crate::event::RawDeviceEvent;
use crate::event_code::EventCode;
use crate::types::EventKey;

/// 2024-01-01T12:00:00Z.
pub const BASE_MS: i64 = 1_704_110_400_000;

pub fn key(id: &str) -> EventKey {
    EventKey::new(id).unwrap()
}

/// Epoch milliseconds `minutes` after [`BASE_MS`].
pub const fn ms(minutes: i64) -> i64 {
    BASE_MS + minutes * 60_000
}

/// RFC 3339 timestamp `minutes` after [`BASE_MS`].
pub fn at(minutes: i64) -> String {
    at_secs(minutes * 60)
}

/// RFC 3339 timestamp `seconds` after [`BASE_MS`].
pub fn at_secs(seconds: i64) -> String {
    DateTime::from_timestamp_millis(BASE_MS + seconds * 1_000)
        .unwrap()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn event(id: &str, code: EventCode, timestamp: String) -> RawDeviceEvent {
    RawDeviceEvent::new(key(id), code, timestamp)
}
