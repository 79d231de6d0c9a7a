//! CLI command definitions.
//!
//! This module defines the structure of all CLI subcommands.

use std::path::PathBuf;

use chrono::NaiveDate;
use clap::{Args, Subcommand};

/// Guided capture arguments.
#[derive(Debug, Args)]
pub struct CaptureCommand {
    /// Unit to capture, e.g. DRI1
    pub unit: String,

    /// Shift day (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    pub date: Option<NaiveDate>,
}

/// Correction arguments.
#[derive(Debug, Args)]
pub struct EditCommand {
    /// Unit of the reading
    pub unit: String,

    /// Equipment id, e.g. GB-cp51
    pub equipment: String,

    /// Parameter id, e.g. V1
    pub parameter: String,

    /// The corrected value
    pub value: String,

    /// Shift day (YYYY-MM-DD), defaults to today
    #[arg(short, long)]
    pub date: Option<NaiveDate>,

    /// Note to attach to the corrected record
    #[arg(short, long)]
    pub note: Option<String>,
}

/// Sync command arguments.
#[derive(Debug, Args)]
pub struct SyncCommand {
    /// Keep probing and reconcile on every reconnect until interrupted
    #[arg(short, long)]
    pub watch: bool,
}

/// Status command arguments.
#[derive(Debug, Args)]
pub struct StatusCommand {
    /// Output as JSON
    #[arg(short, long)]
    pub json: bool,
}

/// Ledger commands.
#[derive(Debug, Subcommand)]
pub enum LedgerCommand {
    /// List stored records, newest first
    List {
        /// Only records waiting for sync (oldest first)
        #[arg(short, long)]
        unsynced: bool,

        /// Filter by unit
        #[arg(long)]
        unit: Option<String>,

        /// Filter by shift day (YYYY-MM-DD)
        #[arg(short, long)]
        date: Option<NaiveDate>,

        /// Maximum number of records
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Delete every record, including unsynced ones
    Clear {
        /// Confirm the deletion
        #[arg(short, long)]
        yes: bool,
    },
}

/// Catalog commands.
#[derive(Debug, Subcommand)]
pub enum CatalogCommand {
    /// Show units, equipment and parameters
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },
}

/// Configuration commands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Output as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Show the configuration file path
    Path,

    /// Validate configuration
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
}

/// One line typed during guided capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureInput {
    /// A reading for the current cell.
    Value(String),
    /// Set (or with empty text, clear) the equipment note.
    Note(String),
    /// Start the current equipment over.
    Restart,
    /// Leave capture.
    Quit,
}

impl CaptureInput {
    /// Interpret one input line.
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let line = line.trim();
        let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        match word.to_ascii_lowercase().as_str() {
            "note" => Self::Note(rest.trim().to_string()),
            "restart" if rest.is_empty() => Self::Restart,
            "quit" | "exit" if rest.is_empty() => Self::Quit,
            _ => Self::Value(line.to_string()),
        }
    }
}
