//! Error types for vibrolog.
//!
//! This module defines the crate-wide error type. Operator input errors
//! ([`crate::validator::Rejection`]) and remote delivery errors
//! ([`crate::gateway::RemoteError`]) live next to the code that produces them;
//! everything here is either a local storage failure or a setup problem.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for vibrolog operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Ledger Errors ===
    /// Failed to open or create the ledger database.
    #[error("failed to open ledger at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A ledger query or write failed.
    #[error("ledger query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run ledger migrations.
    #[error("ledger migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    // === Configuration Errors ===
    /// Failed to load configuration or catalog.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    /// The equipment catalog is unusable.
    #[error("invalid catalog: {message}")]
    Catalog {
        /// Description of the catalog problem.
        message: String,
    },

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for vibrolog operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a new catalog error.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Create a new configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error means a capture may not have reached durable storage.
    ///
    /// These are the only failures an operator must be told about: the
    /// reading is not guaranteed to survive a restart.
    #[must_use]
    pub fn is_ledger_failure(&self) -> bool {
        matches!(
            self,
            Self::DatabaseOpen { .. }
                | Self::DatabaseQuery(_)
                | Self::DatabaseMigration { .. }
                | Self::DirectoryCreate { .. }
                | Self::Io(_)
        )
    }
}
