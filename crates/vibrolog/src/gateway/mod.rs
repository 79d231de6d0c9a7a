//! Remote store interface.
//!
//! The remote store is the authority every reading must eventually reach.
//! Nothing in this module touches the ledger: a [`RemoteError`] is never fatal
//! to a capture, it only means the record stays queued for reconciliation.

mod memory;
mod rest;

pub use memory::MemoryGateway;
pub use rest::RestGateway;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::record::{CaptureRecord, RecordFilter};

/// Why the remote store did not accept or answer a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    /// No remote store is configured.
    #[error("remote store not configured")]
    NotConfigured,

    /// No authenticated session is available.
    #[error("no authenticated session")]
    NoSession,

    /// The session was refused.
    #[error("remote store refused credentials")]
    Unauthorized,

    /// The request did not finish in time.
    #[error("remote request timed out after {millis} ms")]
    Timeout {
        /// The bound that was exceeded.
        millis: u64,
    },

    /// The store refused the payload.
    #[error("remote store rejected the record: {0}")]
    Rejected(String),

    /// The store failed internally.
    #[error("remote server error: {0}")]
    Server(String),

    /// The request never got an HTTP answer.
    #[error("transport error: {0}")]
    Transport(String),

    /// The answer could not be understood.
    #[error("invalid response from remote store: {0}")]
    InvalidResponse(String),
}

/// Acknowledgement of an accepted insert.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteReceipt {
    /// Identifier assigned by the remote store, if it returned one.
    pub remote_id: Option<String>,
    /// Server-side creation time, if it returned one.
    pub created_at: Option<DateTime<Utc>>,
}

/// The authenticated remote CRUD/query surface.
#[async_trait::async_trait]
pub trait RemoteGateway: Send + Sync + std::fmt::Debug {
    /// Insert one record. A success means the store has durably accepted it.
    async fn insert(&self, record: &CaptureRecord) -> Result<RemoteReceipt, RemoteError>;

    /// Fetch records matching `filter`, newest first.
    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CaptureRecord>, RemoteError>;
}

/// Gateway used when no remote store is configured; every capture stays local.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledGateway;

#[async_trait::async_trait]
impl RemoteGateway for DisabledGateway {
    async fn insert(&self, _record: &CaptureRecord) -> Result<RemoteReceipt, RemoteError> {
        Err(RemoteError::NotConfigured)
    }

    async fn query(&self, _filter: &RecordFilter) -> Result<Vec<CaptureRecord>, RemoteError> {
        Err(RemoteError::NotConfigured)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fixtures::{complete_record, day};

    #[tokio::test]
    async fn test_disabled_gateway_refuses_everything() {
        let gateway = DisabledGateway;
        let record = complete_record("DRI1", "GB-cp48A", day());
        assert_eq!(
            gateway.insert(&record).await,
            Err(RemoteError::NotConfigured)
        );
        assert_eq!(
            gateway.query(&RecordFilter::default()).await,
            Err(RemoteError::NotConfigured)
        );
    }

    #[test]
    fn test_remote_error_display() {
        assert!(RemoteError::Timeout { millis: 250 }
            .to_string()
            .contains("250 ms"));
        assert!(RemoteError::Rejected("bad unit".to_string())
            .to_string()
            .contains("bad unit"));
        assert_eq!(RemoteError::NoSession.to_string(), "no authenticated session");
    }
}
