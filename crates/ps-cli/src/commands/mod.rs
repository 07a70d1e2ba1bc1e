//! CLI subcommand implementations.

pub mod import;
pub mod reconcile;
pub mod records;
pub mod status;
pub mod util;
