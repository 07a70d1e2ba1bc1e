//! Boundary parsing for loosely-typed vendor payloads.
//!
//! Vendors send whatever JSON they like. Everything downstream goes through
//! [`Payload`], whose lookups return `None` for both missing and malformed
//! values, so handlers never traverse raw JSON.

use serde_json::{Map, Value};

/// A validated key-lookup view over a vendor payload.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Payload<'a> {
    fields: Option<&'a Map<String, Value>>,
}

impl<'a> Payload<'a> {
    /// Parses an optional raw payload. Anything but a JSON object is empty.
    pub fn parse(raw: Option<&'a Value>) -> Self {
        Self {
            fields: raw.and_then(Value::as_object),
        }
    }

    fn get(&self, key: &str) -> Option<&'a Value> {
        self.fields?.get(key)
    }

    /// A finite number, accepting numeric strings.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.get(key)? {
            Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
            Value::String(s) => parse_number(s),
            _ => None,
        }
    }

    /// A non-empty string.
    pub fn text(&self, key: &str) -> Option<&'a str> {
        self.get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// A boolean, accepting `"true"`/`"false"` and `1`/`0`.
    pub fn flag(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim() {
                "true" => Some(true),
                "false" => Some(false),
                _ => None,
            },
            Value::Number(n) => match n.as_i64() {
                Some(1) => Some(true),
                Some(0) => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Parses a string-encoded numeric value. Empty, non-numeric and
/// non-finite inputs are rejected.
pub fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
