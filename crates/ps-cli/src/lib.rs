//! Pumpsync CLI library.
//!
//! This crate provides the CLI interface for pump event reconciliation.

mod cli;
pub mod commands;
mod config;

pub use cli::{Cli, Commands, RecordKind};
pub use config::Config;
