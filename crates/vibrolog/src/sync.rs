//! Offline-first commit and reconciliation.
//!
//! [`SyncCoordinator`] owns the write path. A commit always lands in the
//! [`Ledger`] before any network attempt; the remote insert that follows is
//! best effort and bounded by [`SyncPolicy::insert_timeout`]. Records the
//! remote store did not acknowledge stay unsynced and are drained by
//! [`SyncCoordinator::reconcile`], which runs on every `CameOnline` edge.
//!
//! Delivery is at-least-once per record. A crash between the remote accepting
//! a row and the ledger flag flipping produces a duplicate remote row on the
//! next pass; the record's fingerprint travels with it so the store can drop
//! such duplicates.
//!
//! The ledger is shared behind a synchronous mutex that is never held across
//! an `.await`.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::NaiveDate;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::connectivity::{ConnectivityMonitor, Transition};
use crate::error::Result;
use crate::gateway::{RemoteError, RemoteGateway, RemoteReceipt};
use crate::ledger::{Ledger, LedgerStats};
use crate::record::{Author, CaptureRecord, DayCapture, RecordFilter};
use crate::session::IdentityProvider;

/// Capacity of the event channel.
const EVENT_CAPACITY: usize = 64;

/// Default bound on a single remote insert.
pub const DEFAULT_INSERT_TIMEOUT: Duration = Duration::from_secs(10);

/// When the coordinator may talk to the remote store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
    /// Send captures made without a signed-in user to the remote store.
    pub allow_anonymous_remote: bool,
    /// Bound on one remote insert attempt.
    pub insert_timeout: Duration,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            allow_anonymous_remote: false,
            insert_timeout: DEFAULT_INSERT_TIMEOUT,
        }
    }
}

/// An equipment's readings, ready to be committed.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordDraft {
    /// Catalog unit id.
    pub unit: String,
    /// Catalog equipment id.
    pub equipment: String,
    /// The shift day.
    pub date: NaiveDate,
    /// Reading per parameter id.
    pub parameters: BTreeMap<String, f64>,
    /// Note for the equipment.
    pub notes: Option<String>,
}

/// Result of a commit that reached the ledger.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitOutcome {
    /// The stored record, with its `local_id` and final `synced` flag.
    pub record: CaptureRecord,
    /// `true` when the record is saved locally only and queued for sync.
    pub offline: bool,
    /// The remote acknowledgement, when the store accepted the record.
    pub receipt: Option<RemoteReceipt>,
    /// Why the record was not delivered, if an attempt was made or refused.
    pub remote_error: Option<RemoteError>,
}

impl CommitOutcome {
    /// Local id of the stored record.
    #[must_use]
    pub fn local_id(&self) -> Option<i64> {
        self.record.local_id
    }
}

/// What one reconciliation pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Records sent to the remote store.
    pub attempted: usize,
    /// Records the store acknowledged.
    pub synced: usize,
    /// Records left unsynced for the next pass.
    pub failed: usize,
    /// Records skipped because a commit was still delivering them.
    pub skipped_in_flight: usize,
}

/// Notifications for listeners such as a status line.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A record reached the ledger.
    Committed {
        /// Ledger id of the record.
        local_id: i64,
        /// Whether it is waiting for sync.
        offline: bool,
    },
    /// A reconciliation pass finished.
    Reconciled(ReconcileSummary),
}

/// Orchestrates the ledger, the remote store and connectivity.
#[derive(Debug)]
pub struct SyncCoordinator {
    ledger: Arc<Mutex<Ledger>>,
    gateway: Arc<dyn RemoteGateway>,
    connectivity: ConnectivityMonitor,
    identity: Arc<dyn IdentityProvider>,
    policy: SyncPolicy,
    /// Local ids whose remote insert is running, held through
    /// [`InFlightClaim`]. Lock the ledger first.
    in_flight: Mutex<HashSet<i64>>,
    /// Serialises reconciliation passes.
    pass: tokio::sync::Mutex<()>,
    events: broadcast::Sender<SyncEvent>,
}

impl SyncCoordinator {
    /// Build a coordinator from its collaborators.
    #[must_use]
    pub fn new(
        ledger: Arc<Mutex<Ledger>>,
        gateway: Arc<dyn RemoteGateway>,
        connectivity: ConnectivityMonitor,
        identity: Arc<dyn IdentityProvider>,
        policy: SyncPolicy,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            ledger,
            gateway,
            connectivity,
            identity,
            policy,
            in_flight: Mutex::new(HashSet::new()),
            pass: tokio::sync::Mutex::new(()),
            events,
        }
    }

    /// The connectivity monitor this coordinator follows.
    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// The active policy.
    #[must_use]
    pub fn policy(&self) -> SyncPolicy {
        self.policy
    }

    /// Subscribe to commit and reconciliation events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    /// Ledger statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub fn ledger_stats(&self) -> Result<LedgerStats> {
        self.lock_ledger().stats()
    }

    /// Commit one equipment's readings.
    ///
    /// The record is appended to the ledger first; an `Err` means it may not
    /// have been stored and the operator must be told. Once the append
    /// succeeds the commit succeeds: a failed or skipped remote insert only
    /// sets [`CommitOutcome::offline`].
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger write fails.
    pub async fn commit(&self, draft: RecordDraft) -> Result<CommitOutcome> {
        let author = self.identity.current_user();
        let mut record = CaptureRecord::new(
            &draft.unit,
            &draft.equipment,
            draft.date,
            draft.parameters,
            draft.notes,
            author.as_ref(),
        );

        let refusal = self.remote_refusal(author.as_ref());
        let (local_id, claim) = {
            let ledger = self.lock_ledger();
            let local_id = ledger.append(&record)?;
            let claim = if refusal.is_none() {
                let mut held = self.lock_in_flight();
                InFlightClaim::acquire(&self.in_flight, &mut held, local_id)
            } else {
                None
            };
            (local_id, claim)
        };
        record.local_id = Some(local_id);

        if let Some(refusal) = refusal {
            debug!(local_id, reason = ?refusal, "Saved offline without remote attempt");
            let remote_error = match refusal {
                Refusal::Offline => None,
                Refusal::Anonymous => Some(RemoteError::NoSession),
            };
            return Ok(self.finish_commit(record, None, remote_error));
        }

        let result = self.insert_bounded(&record).await;

        let (receipt, remote_error) = {
            let ledger = self.lock_ledger();
            let outcome = match result {
                Ok(receipt) => match ledger.mark_synced(local_id) {
                    Ok(_) => {
                        record.synced = true;
                        (Some(receipt), None)
                    }
                    Err(e) => {
                        error!(local_id, "Remote accepted record but ledger flag failed: {e}");
                        (Some(receipt), None)
                    }
                },
                Err(e) => {
                    warn!(local_id, "Remote insert failed, saved offline: {e}");
                    (None, Some(e))
                }
            };
            drop(claim);
            outcome
        };

        Ok(self.finish_commit(record, receipt, remote_error))
    }

    fn finish_commit(
        &self,
        record: CaptureRecord,
        receipt: Option<RemoteReceipt>,
        remote_error: Option<RemoteError>,
    ) -> CommitOutcome {
        let offline = !record.synced;
        let local_id = record.local_id.unwrap_or_default();
        if offline {
            info!(local_id, equipment = %record.equipment, "Capture saved offline");
        } else {
            info!(local_id, equipment = %record.equipment, "Capture saved and synced");
        }
        let _ = self.events.send(SyncEvent::Committed { local_id, offline });
        CommitOutcome {
            record,
            offline,
            receipt,
            remote_error,
        }
    }

    /// Push every unsynced ledger record to the remote store, oldest first.
    ///
    /// A failed record is left unsynced and the pass moves on; it is retried
    /// on the next pass, never within this one. Passes never overlap: a call
    /// made while a pass runs waits for it, then runs its own.
    ///
    /// Does nothing while offline or while remote writes are not permitted.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn reconcile(&self) -> Result<ReconcileSummary> {
        let _pass = self.pass.lock().await;

        if let Some(refusal) = self.remote_refusal(self.identity.current_user().as_ref()) {
            debug!(reason = ?refusal, "Skipping reconciliation");
            return Ok(ReconcileSummary::default());
        }

        let mut summary = ReconcileSummary::default();
        let batch = {
            let ledger = self.lock_ledger();
            let unsynced = ledger.list_unsynced()?;
            let mut in_flight = self.lock_in_flight();
            let mut batch = Vec::with_capacity(unsynced.len());
            for record in unsynced {
                let Some(local_id) = record.local_id else {
                    continue;
                };
                match InFlightClaim::acquire(&self.in_flight, &mut in_flight, local_id) {
                    Some(claim) => batch.push((claim, record)),
                    None => summary.skipped_in_flight += 1,
                }
            }
            batch
        };

        if batch.is_empty() && summary.skipped_in_flight == 0 {
            debug!("Nothing to reconcile");
            return Ok(summary);
        }
        info!(pending = batch.len(), "Reconciling unsynced records");

        let mut ledger_error = None;
        for (claim, record) in batch {
            let local_id = claim.local_id;
            summary.attempted += 1;
            let result = self.insert_bounded(&record).await;

            let ledger = self.lock_ledger();
            match result {
                Ok(_) => match ledger.mark_synced(local_id) {
                    Ok(_) => summary.synced += 1,
                    Err(e) => {
                        error!(local_id, "Remote accepted record but ledger flag failed: {e}");
                        summary.failed += 1;
                        ledger_error.get_or_insert(e);
                    }
                },
                Err(e) => {
                    warn!(local_id, "Reconcile insert failed: {e}");
                    summary.failed += 1;
                }
            }
            drop(claim);
        }

        info!(
            attempted = summary.attempted,
            synced = summary.synced,
            failed = summary.failed,
            "Reconciliation finished"
        );
        let _ = self.events.send(SyncEvent::Reconciled(summary));

        match ledger_error {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    /// What has been captured for `unit` on `date`, here and remotely.
    ///
    /// The remote store is consulted only when remote access is permitted;
    /// if it fails the answer is built from the ledger alone.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub async fn captured_for_day(&self, unit: &str, date: NaiveDate) -> Result<DayCapture> {
        let filter = RecordFilter::day(unit, date);
        let local = self.lock_ledger().query(&filter)?;
        let mut day = DayCapture::from_records(&local);

        if self
            .remote_refusal(self.identity.current_user().as_ref())
            .is_none()
        {
            let remote =
                tokio::time::timeout(self.policy.insert_timeout, self.gateway.query(&filter)).await;
            match remote {
                Ok(Ok(records)) => {
                    for record in &records {
                        day.absorb(record);
                    }
                }
                Ok(Err(e)) => warn!("Remote lookup failed, using local records: {e}"),
                Err(_) => warn!("Remote lookup timed out, using local records"),
            }
        }

        Ok(day)
    }

    /// Run [`reconcile`](Self::reconcile) on every `CameOnline` transition.
    ///
    /// If the device is already online when the task starts, one pass runs
    /// straight away so a backlog from earlier sessions does not wait for
    /// the next reconnect. The task runs until aborted.
    pub fn spawn_auto_reconcile(self: Arc<Self>) -> JoinHandle<()> {
        let mut transitions = self.connectivity.subscribe();
        tokio::spawn(async move {
            if self.connectivity.is_online() {
                self.reconcile_logged().await;
            }
            loop {
                let received = transitions.recv().await;
                match &received {
                    Err(RecvError::Closed) => break,
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Missed connectivity transitions, reconciling");
                    }
                    Ok(_) => {}
                }
                if pass_due(&received) {
                    self.reconcile_logged().await;
                }
            }
        })
    }

    async fn reconcile_logged(&self) {
        if let Err(e) = self.reconcile().await {
            error!("Reconciliation failed: {e}");
        }
    }

    async fn insert_bounded(
        &self,
        record: &CaptureRecord,
    ) -> std::result::Result<RemoteReceipt, RemoteError> {
        match tokio::time::timeout(self.policy.insert_timeout, self.gateway.insert(record)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                millis: u64::try_from(self.policy.insert_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    fn remote_refusal(&self, author: Option<&Author>) -> Option<Refusal> {
        if !self.connectivity.is_online() {
            Some(Refusal::Offline)
        } else if author.is_none() && !self.policy.allow_anonymous_remote {
            Some(Refusal::Anonymous)
        } else {
            None
        }
    }

    fn lock_ledger(&self) -> MutexGuard<'_, Ledger> {
        match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_in_flight(&self) -> MutexGuard<'_, HashSet<i64>> {
        match self.in_flight.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refusal {
    Offline,
    Anonymous,
}

/// Whether a received transition calls for a pass. A lagged receiver may
/// have missed a `CameOnline`, so it gets one too.
fn pass_due(received: &std::result::Result<Transition, RecvError>) -> bool {
    matches!(
        received,
        Ok(Transition::CameOnline) | Err(RecvError::Lagged(_))
    )
}

/// A record whose remote insert is running. Released on drop, so a
/// cancelled commit or pass never leaves its records claimed.
#[derive(Debug)]
struct InFlightClaim<'a> {
    set: &'a Mutex<HashSet<i64>>,
    local_id: i64,
}

impl<'a> InFlightClaim<'a> {
    /// Claim `local_id` in the already locked `held` set, or `None` if
    /// someone else holds it.
    fn acquire(
        set: &'a Mutex<HashSet<i64>>,
        held: &mut HashSet<i64>,
        local_id: i64,
    ) -> Option<Self> {
        if held.insert(local_id) {
            Some(Self { set, local_id })
        } else {
            None
        }
    }
}

impl Drop for InFlightClaim<'_> {
    fn drop(&mut self) {
        let mut held = match self.set.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        held.remove(&self.local_id);
    }
}


#[cfg(test)]
mod tests {
    use super::fixtures::{draft, harness};
    use super::*;
    use crate::record::fixtures::day;

    fn unsynced_equipment(ledger: &Arc<Mutex<Ledger>>) -> Vec<String> {
        ledger
            .lock()
            .unwrap()
            .list_unsynced()
            .unwrap()
            .into_iter()
            .map(|r| r.equipment)
            .collect()
    }

    #[tokio::test]
    async fn test_online_commit_syncs() {
        let h = harness(true, SyncPolicy::default());
        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();

        assert!(!outcome.offline);
        assert!(outcome.record.synced);
        assert!(outcome.receipt.is_some());
        assert_eq!(outcome.record.author_id.as_deref(), Some("op-1"));
        assert_eq!(h.gateway.insert_count(), 1);
        assert_eq!(h.ledger.lock().unwrap().count_unsynced().unwrap(), 0);
        assert_eq!(h.ledger.lock().unwrap().count().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_offline_commits_all_stay_local() {
        let h = harness(false, SyncPolicy::default());
        for equipment in ["GB-cp48A", "CP-cp48A", "GB-cp48B", "CP-cp48B"] {
            let outcome = h.coordinator.commit(draft(equipment, day())).await.unwrap();
            assert!(outcome.offline);
            assert!(outcome.remote_error.is_none());
        }

        let ledger = h.ledger.lock().unwrap();
        assert_eq!(ledger.count().unwrap(), 4);
        assert_eq!(ledger.count_unsynced().unwrap(), 4);
        assert_eq!(h.gateway.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_remote_timeout_saves_offline() {
        let h = harness(true, SyncPolicy::default());
        h.gateway.push_outcome(Some(RemoteError::Timeout { millis: 10_000 }));

        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();

        assert!(outcome.offline);
        assert_eq!(
            outcome.remote_error,
            Some(RemoteError::Timeout { millis: 10_000 })
        );
        assert_eq!(unsynced_equipment(&h.ledger), vec!["GB-cp48A"]);
    }

    #[tokio::test]
    async fn test_slow_remote_is_bounded() {
        let policy = SyncPolicy {
            insert_timeout: Duration::from_millis(20),
            ..SyncPolicy::default()
        };
        let h = harness(true, policy);
        h.gateway.set_latency(Some(Duration::from_millis(500)));

        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();

        assert!(outcome.offline);
        assert_eq!(outcome.remote_error, Some(RemoteError::Timeout { millis: 20 }));
        assert_eq!(h.gateway.insert_count(), 0);
    }

    #[tokio::test]
    async fn test_anonymous_capture_stays_local_by_default() {
        let h = harness(true, SyncPolicy::default());
        h.identity.set(None);

        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();
        assert!(outcome.offline);
        assert_eq!(outcome.remote_error, Some(RemoteError::NoSession));
        assert_eq!(outcome.record.author_name, crate::record::GUEST_NAME);
        assert_eq!(h.gateway.attempt_count(), 0);

        let summary = h.coordinator.reconcile().await.unwrap();
        assert_eq!(summary, ReconcileSummary::default());
    }

    #[tokio::test]
    async fn test_anonymous_capture_allowed_by_policy() {
        let policy = SyncPolicy {
            allow_anonymous_remote: true,
            ..SyncPolicy::default()
        };
        let h = harness(true, policy);
        h.identity.set(None);

        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();
        assert!(!outcome.offline);
        assert!(h.gateway.inserted()[0].author_id.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_partial_failure() {
        let h = harness(false, SyncPolicy::default());
        for equipment in ["GB-cp48A", "CP-cp48A", "GB-cp48B"] {
            h.coordinator.commit(draft(equipment, day())).await.unwrap();
        }

        h.monitor.set_online(true);
        h.gateway.push_outcome(None);
        h.gateway.push_outcome(Some(RemoteError::Server("HTTP 503".to_string())));
        h.gateway.push_outcome(None);

        let first = h.coordinator.reconcile().await.unwrap();
        assert_eq!(first.attempted, 3);
        assert_eq!(first.synced, 2);
        assert_eq!(first.failed, 1);
        assert_eq!(unsynced_equipment(&h.ledger), vec!["CP-cp48A"]);
        assert_eq!(h.gateway.attempt_count(), 3);

        let second = h.coordinator.reconcile().await.unwrap();
        assert_eq!(second.synced, 1);
        assert!(unsynced_equipment(&h.ledger).is_empty());
        assert_eq!(h.ledger.lock().unwrap().count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_preserves_capture_order() {
        let h = harness(false, SyncPolicy::default());
        let order = ["FN-fnMAB", "GB-cp51", "CP-cpSGC", "GB-cp48A"];
        for equipment in order {
            h.coordinator.commit(draft(equipment, day())).await.unwrap();
        }

        h.monitor.set_online(true);
        h.coordinator.reconcile().await.unwrap();

        let delivered: Vec<String> = h.gateway.inserted().into_iter().map(|r| r.equipment).collect();
        assert_eq!(delivered, order);
    }

    #[tokio::test]
    async fn test_reconcile_offline_does_nothing() {
        let h = harness(false, SyncPolicy::default());
        h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();

        let summary = h.coordinator.reconcile().await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(h.gateway.attempt_count(), 0);
    }

    #[tokio::test]
    async fn test_reconcile_skips_record_still_in_commit() {
        let h = harness(true, SyncPolicy::default());
        h.gateway.set_latency(Some(Duration::from_millis(100)));

        let coordinator = h.coordinator.clone();
        let commit = tokio::spawn(async move { coordinator.commit(draft("GB-cp48A", day())).await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let summary = h.coordinator.reconcile().await.unwrap();
        assert_eq!(summary.attempted, 0);
        assert_eq!(summary.skipped_in_flight, 1);

        let outcome = commit.await.unwrap().unwrap();
        assert!(!outcome.offline);
        assert_eq!(h.gateway.insert_count(), 1);
        assert_eq!(h.ledger.lock().unwrap().count_unsynced().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_commit_releases_its_claim() {
        let h = harness(true, SyncPolicy::default());
        h.gateway.set_latency(Some(Duration::from_millis(200)));

        let coordinator = h.coordinator.clone();
        let commit = tokio::spawn(async move { coordinator.commit(draft("GB-cp48A", day())).await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        commit.abort();
        assert!(commit.await.is_err());
        assert_eq!(h.ledger.lock().unwrap().count_unsynced().unwrap(), 1);

        h.gateway.set_latency(None);
        for _ in 0..2 {
            let summary = h.coordinator.reconcile().await.unwrap();
            assert_eq!(summary.skipped_in_flight, 0);
        }
        assert!(unsynced_equipment(&h.ledger).is_empty());
        assert_eq!(h.gateway.insert_count(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_reconcile_releases_its_claims() {
        let h = harness(false, SyncPolicy::default());
        for equipment in ["GB-cp48A", "CP-cp48A"] {
            h.coordinator.commit(draft(equipment, day())).await.unwrap();
        }
        h.monitor.set_online(true);
        h.gateway.set_latency(Some(Duration::from_millis(200)));

        let coordinator = h.coordinator.clone();
        let pass = tokio::spawn(async move { coordinator.reconcile().await });
        tokio::time::sleep(Duration::from_millis(20)).await;
        pass.abort();
        assert!(pass.await.is_err());

        h.gateway.set_latency(None);
        let summary = h.coordinator.reconcile().await.unwrap();
        assert_eq!(summary.skipped_in_flight, 0);
        assert_eq!(summary.synced, 2);
        assert!(unsynced_equipment(&h.ledger).is_empty());
    }

    #[tokio::test]
    async fn test_commit_during_reconcile_is_not_lost() {
        let h = harness(false, SyncPolicy::default());
        for equipment in ["GB-cp48A", "CP-cp48A"] {
            h.coordinator.commit(draft(equipment, day())).await.unwrap();
        }
        h.monitor.set_online(true);
        h.gateway.set_latency(Some(Duration::from_millis(30)));

        let coordinator = h.coordinator.clone();
        let pass = tokio::spawn(async move { coordinator.reconcile().await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.coordinator.commit(draft("GB-cp48B", day())).await.unwrap();

        let summary = pass.await.unwrap().unwrap();
        assert_eq!(summary.attempted, 2);
        assert_eq!(h.gateway.insert_count(), 3);
        assert!(unsynced_equipment(&h.ledger).is_empty());
        assert_eq!(h.ledger.lock().unwrap().count().unwrap(), 3);
    }

    #[tokio::test]
    async fn test_events() {
        let h = harness(false, SyncPolicy::default());
        let mut rx = h.coordinator.subscribe();

        let outcome = h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();
        assert_eq!(
            rx.recv().await.unwrap(),
            SyncEvent::Committed {
                local_id: outcome.local_id().unwrap(),
                offline: true,
            }
        );

        h.monitor.set_online(true);
        h.coordinator.reconcile().await.unwrap();
        assert!(matches!(
            rx.recv().await.unwrap(),
            SyncEvent::Reconciled(ReconcileSummary { synced: 1, .. })
        ));
    }

    #[tokio::test]
    async fn test_auto_reconcile_on_came_online() {
        let h = harness(false, SyncPolicy::default());
        h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();
        h.coordinator.commit(draft("CP-cp48A", day())).await.unwrap();

        let mut rx = h.coordinator.subscribe();
        let task = h.coordinator.clone().spawn_auto_reconcile();
        tokio::task::yield_now().await;

        h.monitor.set_online(true);
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            SyncEvent::Reconciled(ReconcileSummary { synced: 2, .. })
        ));
        assert!(unsynced_equipment(&h.ledger).is_empty());

        task.abort();
    }

    #[tokio::test]
    async fn test_auto_reconcile_drains_backlog_when_already_online() {
        let h = harness(false, SyncPolicy::default());
        h.coordinator.commit(draft("GB-cp48A", day())).await.unwrap();
        // The edge fires before anything listens for it.
        h.monitor.set_online(true);

        let mut rx = h.coordinator.subscribe();
        let task = h.coordinator.clone().spawn_auto_reconcile();
        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            event,
            SyncEvent::Reconciled(ReconcileSummary { synced: 1, .. })
        ));
        assert!(unsynced_equipment(&h.ledger).is_empty());

        task.abort();
    }

    #[test]
    fn test_pass_due_after_missed_transitions() {
        assert!(pass_due(&Ok(Transition::CameOnline)));
        assert!(pass_due(&Err(RecvError::Lagged(3))));
        assert!(!pass_due(&Ok(Transition::WentOffline)));
        assert!(!pass_due(&Err(RecvError::Closed)));
    }

    #[tokio::test]
    async fn test_captured_for_day_merges_remote() {
        let h = harness(true, SyncPolicy::default());
        h.gateway
            .seed(crate::record::fixtures::complete_record("DRI1", "GB-cp48A", day()));
        h.monitor.set_online(false);
        h.coordinator.commit(draft("CP-cp48A", day())).await.unwrap();
        h.monitor.set_online(true);

        let captured = h.coordinator.captured_for_day("DRI1", day()).await.unwrap();
        assert_eq!(
            captured.equipment_ids().into_iter().collect::<Vec<_>>(),
            vec!["CP-cp48A", "GB-cp48A"]
        );
    }

    #[tokio::test]
    async fn test_captured_for_day_falls_back_to_ledger() {
        let h = harness(true, SyncPolicy::default());
        h.coordinator.commit(draft("GB-cp51", day())).await.unwrap();
        h.gateway.set_unavailable(true);

        let captured = h.coordinator.captured_for_day("DRI1", day()).await.unwrap();
        assert_eq!(
            captured.equipment_ids().into_iter().collect::<Vec<_>>(),
            vec!["GB-cp51"]
        );
    }

    #[tokio::test]
    async fn test_ledger_stats() {
        let h = harness(false, SyncPolicy::default());
        h.coordinator.commit(draft("GB-cp51", day())).await.unwrap();
        let stats = h.coordinator.ledger_stats().unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.unsynced, 1);
    }
}
