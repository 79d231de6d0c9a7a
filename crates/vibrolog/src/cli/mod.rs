//! Command-line interface for vibrolog.
//!
//! This module provides the CLI structure for the `vibrolog` binary.

mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use commands::{
    CaptureCommand, CaptureInput, CatalogCommand, ConfigCommand, EditCommand, LedgerCommand,
    StatusCommand, SyncCommand,
};

use crate::logging::Verbosity;

/// vibrolog - Offline-first vibration readings
///
/// Walks an operator through the day's equipment readings, keeps every
/// capture in a local ledger, and pushes it to the central store whenever
/// the network allows.
#[derive(Debug, Parser)]
#[command(name = "vibrolog")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to custom configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// The command to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Capture a unit's readings, one cell at a time
    Capture(CaptureCommand),

    /// Correct one captured reading
    Edit(EditCommand),

    /// Push unsynced records to the remote store
    Sync(SyncCommand),

    /// Show ledger and connectivity status
    Status(StatusCommand),

    /// Inspect or clear the local ledger
    #[command(subcommand)]
    Ledger(LedgerCommand),

    /// Show the equipment catalog
    #[command(subcommand)]
    Catalog(CatalogCommand),

    /// View or validate configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

impl Cli {
    /// Get the verbosity level based on flags.
    #[must_use]
    pub fn verbosity(&self) -> Verbosity {
        Verbosity::from_flags(self.quiet, self.verbose)
    }
}
