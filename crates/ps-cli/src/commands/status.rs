//! Status command for showing sync metrics.

use std::io::Write;
use std::path::Path;

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};

use ps_core::SyncMetrics;
use ps_db::Database;

pub fn run<W: Write>(
    writer: &mut W,
    db: &Database,
    database_path: &Path,
    now: DateTime<Utc>,
) -> Result<()> {
    writeln!(writer, "Pump sync status")?;
    writeln!(writer, "Database: {}", database_path.display())?;

    let event_count = db.event_count()?;
    if event_count == 0 {
        writeln!(writer, "No events recorded.")?;
        return Ok(());
    }
    match db.last_event_time()? {
        Some(last) => writeln!(writer, "Events: {event_count} (latest {})", format_time(last))?,
        None => writeln!(writer, "Events: {event_count}")?,
    }

    let records = db.list_records(None)?;
    let metrics = SyncMetrics::collect(&records, now);
    writeln!(writer, "Records: {}", metrics.total_records)?;
    if let Some(last) = metrics.last_entry_time {
        writeln!(writer, "Last record: {}", format_time(last))?;
    }
    writeln!(writer, "Records in last 24h: {}", metrics.entries_last_24h)?;
    if !metrics.by_kind.is_empty() {
        writeln!(writer, "By kind:")?;
        for (kind, count) in &metrics.by_kind {
            writeln!(writer, "- {kind}: {count}")?;
        }
    }

    Ok(())
}

fn format_time(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}
