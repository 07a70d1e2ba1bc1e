//! Records command: stored records of one kind as JSON lines.
//!
//! Bodies are decoded before printing so a corrupt row fails loudly.

use std::io::Write;

use anyhow::{Context, Result};

use ps_db::Database;

use crate::cli::RecordKind;

pub fn run<W: Write>(writer: &mut W, db: &Database, kind: RecordKind) -> Result<usize> {
    let records = db.list_records(Some(kind.as_str()))?;
    for stored in &records {
        let record = stored.record()?;
        serde_json::to_writer(&mut *writer, &record).context("failed to write JSON")?;
        writeln!(writer)?;
    }
    Ok(records.len())
}
