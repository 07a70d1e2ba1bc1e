//! Command-line argument definitions.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::commands::reconcile::ReconcileArgs;

/// Pump and CGM event reconciliation.
///
/// Imports raw vendor device events and reconciles them into glucose
/// entries, treatments and basal delivery spans.
#[derive(Debug, Parser)]
#[command(name = "pumpsync", version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to config file.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Import raw device events as JSON lines from stdin.
    Import,

    /// Reconcile stored events into records.
    Reconcile(ReconcileArgs),

    /// Show sync status and record counts.
    Status,

    /// Print stored records of one kind as JSON lines.
    Records {
        /// Record kind to print.
        #[arg(value_enum)]
        kind: RecordKind,
    },
}

/// Stored record kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "snake_case")]
pub enum RecordKind {
    Entry,
    Bolus,
    CarbIntake,
    BgCheck,
    BolusCalculation,
    Note,
    DeviceEvent,
    StateSpan,
}

impl RecordKind {
    /// Kind name as stored in the database.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Entry => "entry",
            Self::Bolus => "bolus",
            Self::CarbIntake => "carb_intake",
            Self::BgCheck => "bg_check",
            Self::BolusCalculation => "bolus_calculation",
            Self::Note => "note",
            Self::DeviceEvent => "device_event",
            Self::StateSpan => "state_span",
        }
    }
}
