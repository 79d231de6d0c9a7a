//! In-process remote store.
//!
//! Holds accepted rows in memory and can be scripted to fail, stall or go
//! away, which is how the sync paths are exercised without a network.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;

use super::{RemoteError, RemoteGateway, RemoteReceipt};
use crate::record::{CaptureRecord, RecordFilter};

#[derive(Debug, Default)]
struct MemoryState {
    rows: Vec<CaptureRecord>,
    outcomes: VecDeque<Option<RemoteError>>,
    unavailable: bool,
    latency: Option<Duration>,
}

/// Remote store kept in memory. Clones share the same rows.
#[derive(Debug, Clone, Default)]
pub struct MemoryGateway {
    state: Arc<Mutex<MemoryState>>,
    attempts: Arc<AtomicU64>,
}

impl MemoryGateway {
    /// Create an empty, available store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Queue the outcome of the next insert: `None` accepts, `Some` fails.
    ///
    /// Once the queue is empty inserts are accepted.
    pub fn push_outcome(&self, outcome: Option<RemoteError>) {
        self.lock().outcomes.push_back(outcome);
    }

    /// Make every request fail with a transport error until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Delay every request by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        self.lock().latency = latency;
    }

    /// Rows accepted so far, in acceptance order.
    #[must_use]
    pub fn inserted(&self) -> Vec<CaptureRecord> {
        self.lock().rows.clone()
    }

    /// Number of accepted rows.
    #[must_use]
    pub fn insert_count(&self) -> usize {
        self.lock().rows.len()
    }

    /// Number of insert attempts, accepted or not.
    #[must_use]
    pub fn attempt_count(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Seed a row as if another device had written it.
    pub fn seed(&self, mut record: CaptureRecord) {
        record.local_id = None;
        record.synced = true;
        self.lock().rows.push(record);
    }

    async fn wait(&self) -> Result<(), RemoteError> {
        let (latency, unavailable) = {
            let state = self.lock();
            (state.latency, state.unavailable)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if unavailable {
            return Err(RemoteError::Transport("remote store unreachable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl RemoteGateway for MemoryGateway {
    async fn insert(&self, record: &CaptureRecord) -> Result<RemoteReceipt, RemoteError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.wait().await?;

        let mut state = self.lock();
        if let Some(Some(err)) = state.outcomes.pop_front() {
            return Err(err);
        }

        let mut row = record.clone();
        row.local_id = None;
        row.synced = true;
        state.rows.push(row);

        Ok(RemoteReceipt {
            remote_id: Some(state.rows.len().to_string()),
            created_at: Some(Utc::now()),
        })
    }

    async fn query(&self, filter: &RecordFilter) -> Result<Vec<CaptureRecord>, RemoteError> {
        self.wait().await?;
        let state = self.lock();
        Ok(state
            .rows
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }
}
