//! Reconcile command: stored events in, normalized records out.

use std::io::Write;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;

use ps_core::{ReconcileOptions, ReconcileOutput, reconcile};
use ps_db::Database;

use super::util::parse_datetime;

#[derive(Debug, Default, Args)]
pub struct ReconcileArgs {
    /// Only events at or after this time (ISO 8601 or e.g. "2 days ago").
    #[arg(long)]
    pub after: Option<String>,

    /// Only events before this time.
    #[arg(long)]
    pub before: Option<String>,

    /// Skip glucose entries.
    #[arg(long)]
    pub no_glucose: bool,

    /// Skip manually entered BG checks.
    #[arg(long)]
    pub no_manual_bg: bool,

    /// Do not pair boluses with carbohydrate entries.
    #[arg(long)]
    pub no_carb_consolidation: bool,

    /// Do not pair temp basal programs with confirmed rates.
    #[arg(long)]
    pub no_temp_basal_consolidation: bool,

    /// Temp basal matching window in minutes.
    #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
    pub temp_basal_window: Option<i64>,

    /// Bolus/carbohydrate matching window in minutes.
    #[arg(long, value_name = "MINUTES", allow_negative_numbers = true)]
    pub carb_window: Option<i64>,

    /// Print the full output as JSON.
    #[arg(long)]
    pub json: bool,

    /// Reconcile without storing records.
    #[arg(long)]
    pub dry_run: bool,
}

impl ReconcileArgs {
    /// Applies the flags on top of configured options.
    pub fn options(&self, configured: &ReconcileOptions) -> ReconcileOptions {
        let mut options = configured.clone();
        options.glucose_sync &= !self.no_glucose;
        options.manual_bg_sync &= !self.no_manual_bg;
        options.meal_carb_consolidation &= !self.no_carb_consolidation;
        options.temp_basal_consolidation &= !self.no_temp_basal_consolidation;
        if let Some(minutes) = self.temp_basal_window {
            options.temp_basal_window_minutes = minutes;
        }
        if let Some(minutes) = self.carb_window {
            options.carb_window_minutes = minutes;
        }
        options
    }

    fn range(&self) -> Result<Option<(DateTime<Utc>, DateTime<Utc>)>> {
        if self.after.is_none() && self.before.is_none() {
            return Ok(None);
        }
        let start = self
            .after
            .as_deref()
            .map(parse_datetime)
            .transpose()
            .context("invalid --after")?
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let end = self
            .before
            .as_deref()
            .map(parse_datetime)
            .transpose()
            .context("invalid --before")?
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        Ok(Some((start, end)))
    }
}

pub fn run<W: Write>(
    writer: &mut W,
    db: &mut Database,
    configured: &ReconcileOptions,
    args: &ReconcileArgs,
) -> Result<ReconcileOutput> {
    let options = args.options(configured);
    let range = args.range()?;
    let events = match range {
        Some((start, end)) => db.list_events_in_range(start, end),
        None => db.list_events(),
    }
    .context("failed to load events")?;
    tracing::debug!(events = events.len(), ?options, "reconciling");

    let output = reconcile(&events, &options);

    if args.json {
        serde_json::to_writer_pretty(&mut *writer, &output).context("failed to write JSON")?;
        writeln!(writer)?;
    } else {
        write_summary(writer, events.len(), &output)?;
    }

    if args.dry_run {
        if !args.json {
            writeln!(writer, "Dry run: nothing stored.")?;
        }
    } else {
        let records = output.clone().into_records();
        let stored = match range {
            Some((start, end)) => db.replace_records_in_range(start, end, &records),
            None => db.replace_records(&records),
        }
        .context("failed to store records")?;
        if !args.json {
            writeln!(writer, "Stored {stored} records.")?;
        }
    }

    Ok(output)
}

fn write_summary<W: Write>(writer: &mut W, event_count: usize, output: &ReconcileOutput) -> Result<()> {
    writeln!(
        writer,
        "Reconciled {event_count} events into {} records",
        output.record_count()
    )?;
    let rows = [
        ("entries", output.entries.len()),
        ("boluses", output.boluses.len()),
        ("carb intakes", output.carb_intakes.len()),
        ("bg checks", output.bg_checks.len()),
        ("bolus calculations", output.bolus_calculations.len()),
        ("notes", output.notes.len()),
        ("device events", output.device_events.len()),
        ("state spans", output.state_spans.len()),
    ];
    for (label, count) in rows {
        writeln!(writer, "- {label}: {count}")?;
    }
    Ok(())
}
