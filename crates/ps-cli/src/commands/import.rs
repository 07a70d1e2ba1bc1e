//! Import command for storing raw device events in the local `SQLite` store.

use std::io::{BufRead, Write};

use anyhow::{Context, Result};
use serde_json::Value;

use ps_core::{EventCode, RawDeviceEvent};
use ps_db::Database;

/// Outcome of one import.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub imported: usize,
    /// Lines skipped because their event code is not in the vendor table.
    pub skipped: usize,
}

pub fn run<R: BufRead, W: Write>(reader: R, writer: &mut W, db: &mut Database) -> Result<ImportSummary> {
    let (events, skipped) = parse_events(reader)?;
    let imported = db
        .insert_events(&events)
        .context("failed to store events")?;

    let summary = ImportSummary { imported, skipped };
    writeln!(writer, "Imported {imported} events ({skipped} skipped)")?;
    Ok(summary)
}

/// Parses JSON lines into events. Returns the events and the number of lines
/// skipped for carrying an unknown event code.
fn parse_events<R: BufRead>(reader: R) -> Result<(Vec<RawDeviceEvent>, usize)> {
    let mut events = Vec::new();
    let mut skipped = 0;
    for (idx, line) in reader.lines().enumerate() {
        let line_no = idx + 1;
        let line = line.with_context(|| format!("failed to read line {line_no}"))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let raw: Value = serde_json::from_str(trimmed)
            .with_context(|| format!("invalid JSON on line {line_no}"))?;

        // Vendors add codes over time; an unknown one is not fatal.
        if let Some(code) = raw.get("code").and_then(Value::as_str) {
            if let Err(err) = code.parse::<EventCode>() {
                tracing::warn!(line = line_no, %err, "skipping event");
                skipped += 1;
                continue;
            }
        }

        let event: RawDeviceEvent = serde_json::from_value(raw)
            .with_context(|| format!("invalid event on line {line_no}"))?;
        events.push(event);
    }
    Ok((events, skipped))
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::io::Cursor;

    #[test]
    fn parse_events_accepts_numeric_and_string_values() {
        let input = r#"{"id":"1","code":"glucose_reading","timestamp":"2024-01-01T12:00:00Z","value":"112"}
{"id":"2","code":"bolus_normal","timestamp":"2024-01-01T12:05:00Z","value":3.5,"payload":{"carbs":30}}

{"id":"3","code":"note","timestamp":"2024-01-01T12:06:00Z","deleted":true}"#;
        let (events, skipped) = parse_events(Cursor::new(input)).unwrap();
        assert_eq!(skipped, 0);
        assert_eq!(events.len(), 3);
        assert_eq!(events[1].code, EventCode::BolusNormal);
        assert_eq!(events[1].value.as_deref(), Some("3.5"));
        assert!(events[2].deleted);
    }

    #[test]
    fn parse_events_skips_unknown_codes() {
        let input = r#"{"id":"1","code":"firmware_update","timestamp":"2024-01-01T12:00:00Z"}
{"id":"2","code":"egv","timestamp":"2024-01-01T12:05:00Z","value":"98"}"#;
        let (events, skipped) = parse_events(Cursor::new(input)).unwrap();
        assert_eq!(skipped, 1);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].code, EventCode::GlucoseReading);
    }

    #[test]
    fn parse_events_reports_line_numbers() {
        let input = r#"{"id":"1","code":"note","timestamp":"2024-01-01T12:00:00Z"}
{"id":"","code":"note","timestamp":"2024-01-01T12:00:00Z"}"#;
        let err = parse_events(Cursor::new(input)).unwrap_err();
        assert!(err.to_string().contains("invalid event on line 2"));

        let err = parse_events(Cursor::new("not json")).unwrap_err();
        assert!(err.to_string().contains("invalid JSON on line 1"));
    }

    #[test]
    fn run_stores_events() {
        let mut db = Database::open_in_memory().unwrap();
        let input = r#"{"id":"1","code":"carbs","timestamp":"2024-01-01T12:00:00Z","value":"45"}"#;
        let mut output = Vec::new();
        let summary = run(Cursor::new(input), &mut output, &mut db).unwrap();

        assert_eq!(summary, ImportSummary { imported: 1, skipped: 0 });
        assert_eq!(db.event_count().unwrap(), 1);
        assert_eq!(String::from_utf8(output).unwrap(), "Imported 1 events (0 skipped)\n");
    }
}
