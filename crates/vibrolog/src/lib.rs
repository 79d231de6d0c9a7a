//! `vibrolog` - Offline-first capture and synchronization of vibration readings
//!
//! This library provides the guided entry state machine, the durable local
//! ledger, and the reconciliation protocol that delivers every reading to
//! the central store once the network allows.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]
#![deny(unsafe_code)]

pub mod catalog;
pub mod cli;
pub mod config;
pub mod connectivity;
pub mod context;
pub mod entry;
pub mod error;
pub mod gateway;
pub mod ledger;
pub mod logging;
pub mod record;
pub mod session;
pub mod sync;
pub mod validator;

pub use catalog::Catalog;
pub use config::Config;
pub use connectivity::{ConnectivityMonitor, Transition};
pub use context::AppContext;
pub use entry::{EntryError, EntryState, GuidedEntryMachine, Mode, Progress, Submitted};
pub use error::{Error, Result};
pub use gateway::{RemoteError, RemoteGateway};
pub use ledger::{Ledger, LedgerStats};
pub use logging::init_logging;
pub use record::{Author, CaptureRecord, RecordFilter};
pub use sync::{CommitOutcome, ReconcileSummary, SyncCoordinator, SyncEvent, SyncPolicy};
pub use validator::{validate, Rejection};
