//! Wiring of one capture device.
//!
//! [`AppContext`] builds the ledger, remote gateway, connectivity monitor,
//! identity and coordinator from a [`Config`]. Everything is constructed
//! explicitly, so two contexts never share state.

use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::catalog::Catalog;
use crate::config::Config;
use crate::connectivity::{
    spawn_probe_loop, ConnectivityMonitor, ConnectivityProbe, ProbeHandle, TcpProbe,
};
use crate::entry::GuidedEntryMachine;
use crate::error::Result;
use crate::gateway::{DisabledGateway, RemoteGateway, RestGateway};
use crate::ledger::Ledger;
use crate::session::SharedIdentity;
use crate::sync::SyncCoordinator;

/// Everything a capture session needs.
#[derive(Debug)]
pub struct AppContext {
    /// The catalog in use.
    pub catalog: Arc<Catalog>,
    /// The shared ledger.
    pub ledger: Arc<Mutex<Ledger>>,
    /// Connectivity state.
    pub connectivity: ConnectivityMonitor,
    /// Who is signed in.
    pub identity: SharedIdentity,
    /// The write path.
    pub coordinator: Arc<SyncCoordinator>,
    probe: Option<Arc<dyn ConnectivityProbe>>,
    config: Config,
}

impl AppContext {
    /// Build a context from configuration, opening the ledger on disk.
    ///
    /// Connectivity starts offline until the first probe.
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded or the ledger
    /// cannot be opened.
    pub fn from_config(config: &Config) -> Result<Self> {
        let catalog = Catalog::load_from(config.catalog.path.as_deref())?;
        let ledger = Ledger::open(config.database_path())?;

        let gateway: Arc<dyn RemoteGateway> = match &config.remote.base_url {
            Some(base_url) => Arc::new(
                RestGateway::new(base_url, &config.remote.table, config.remote_timeout())
                    .with_api_key(config.remote.api_key.clone())
                    .with_access_token(config.remote.access_token.clone()),
            ),
            None => {
                debug!("No remote store configured; captures stay local");
                Arc::new(DisabledGateway)
            }
        };

        let probe = config.probe_address().map(|address| {
            Arc::new(TcpProbe::new(address, config.probe_timeout())) as Arc<dyn ConnectivityProbe>
        });

        Ok(Self::with_parts(config, catalog, ledger, gateway, probe))
    }

    /// Assemble a context from already-built parts.
    #[must_use]
    pub fn with_parts(
        config: &Config,
        catalog: Catalog,
        ledger: Ledger,
        gateway: Arc<dyn RemoteGateway>,
        probe: Option<Arc<dyn ConnectivityProbe>>,
    ) -> Self {
        let ledger = Arc::new(Mutex::new(ledger));
        let connectivity = ConnectivityMonitor::new(false);
        let identity = SharedIdentity::new(config.author());
        let coordinator = Arc::new(SyncCoordinator::new(
            ledger.clone(),
            gateway,
            connectivity.clone(),
            Arc::new(identity.clone()),
            config.sync_policy(),
        ));

        Self {
            catalog: Arc::new(catalog),
            ledger,
            connectivity,
            identity,
            coordinator,
            probe,
            config: config.clone(),
        }
    }

    /// The configuration this context was built from.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Probe once and update the monitor. Without a probe the device is
    /// treated as offline.
    pub async fn probe_once(&self) -> bool {
        let online = match &self.probe {
            Some(probe) => probe.check().await,
            None => false,
        };
        self.connectivity.set_online(online);
        online
    }

    /// Start background probing and automatic reconciliation.
    ///
    /// If a probe already found the device online, the unsynced backlog is
    /// drained right away. Returns `None` when there is nothing to probe.
    pub fn spawn_background(&self) -> Option<Background> {
        let probe = self.probe.clone()?;
        let reconciler = self.coordinator.clone().spawn_auto_reconcile();
        let (probe_handle, probe_task) =
            spawn_probe_loop(self.connectivity.clone(), probe, self.config.probe_interval());
        info!("Background sync started");
        Some(Background {
            probe_handle,
            probe_task,
            reconciler,
        })
    }

    /// A fresh guided entry machine over this context.
    #[must_use]
    pub fn entry_machine(&self) -> GuidedEntryMachine {
        GuidedEntryMachine::new(
            self.catalog.clone(),
            self.coordinator.clone(),
            self.config.entry.max_note_length,
        )
    }
}

/// Running background tasks.
#[derive(Debug)]
pub struct Background {
    probe_handle: ProbeHandle,
    probe_task: JoinHandle<()>,
    reconciler: JoinHandle<()>,
}

impl Background {
    /// Stop probing and automatic reconciliation.
    ///
    /// A reconciliation pass already running is aborted between inserts;
    /// records it did not reach stay unsynced.
    pub async fn shutdown(self) {
        self.probe_handle.stop();
        let _ = self.probe_task.await;
        self.reconciler.abort();
        let _ = self.reconciler.await;
        debug!("Background sync stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::MemoryGateway;
    use crate::record::fixtures::day;
    use crate::session::IdentityProvider;
    use crate::sync::RecordDraft;

    #[derive(Debug)]
    struct FixedProbe(bool);

    #[async_trait::async_trait]
    impl ConnectivityProbe for FixedProbe {
        async fn check(&self) -> bool {
            self.0
        }
    }

    fn signed_in_config() -> Config {
        let mut config = Config::default();
        config.session.user_id = Some("op-3".to_string());
        config
    }

    #[tokio::test]
    async fn test_from_config_without_remote() {
        let root = std::env::temp_dir().join(format!("vibrolog_ctx_{}", std::process::id()));
        let mut config = Config::default();
        config.storage.database_path = Some(root.join("ledger.db"));

        let ctx = AppContext::from_config(&config).unwrap();
        assert!(!ctx.probe_once().await);
        assert!(!ctx.connectivity.is_online());
        assert!(ctx.spawn_background().is_none());
        assert_eq!(ctx.catalog.units.len(), 2);

        drop(ctx);
        let _ = std::fs::remove_dir_all(&root);
    }

    #[tokio::test]
    async fn test_probe_drives_connectivity() {
        let ctx = AppContext::with_parts(
            &signed_in_config(),
            Catalog::default(),
            Ledger::open_in_memory().unwrap(),
            Arc::new(MemoryGateway::new()),
            Some(Arc::new(FixedProbe(true))),
        );
        assert!(ctx.probe_once().await);
        assert!(ctx.connectivity.is_online());
    }

    #[tokio::test]
    async fn test_background_reconciles_on_reconnect() {
        let gateway = MemoryGateway::new();
        let ctx = AppContext::with_parts(
            &signed_in_config(),
            Catalog::default(),
            Ledger::open_in_memory().unwrap(),
            Arc::new(gateway.clone()),
            Some(Arc::new(FixedProbe(true))),
        );
        let draft = RecordDraft {
            unit: "DRI1".to_string(),
            equipment: "FN-fnAUX".to_string(),
            date: day(),
            parameters: [("V1".to_string(), 2.0)].into_iter().collect(),
            notes: None,
        };
        ctx.coordinator.commit(draft).await.unwrap();
        assert_eq!(gateway.insert_count(), 0);

        let mut events = ctx.coordinator.subscribe();
        let background = ctx.spawn_background().unwrap();
        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, crate::sync::SyncEvent::Reconciled(_)));
        assert_eq!(gateway.insert_count(), 1);

        background.shutdown().await;
    }

    #[tokio::test]
    async fn test_background_drains_backlog_found_online_at_startup() {
        let gateway = MemoryGateway::new();
        let ctx = AppContext::with_parts(
            &signed_in_config(),
            Catalog::default(),
            Ledger::open_in_memory().unwrap(),
            Arc::new(gateway.clone()),
            Some(Arc::new(FixedProbe(true))),
        );
        let draft = RecordDraft {
            unit: "DRI1".to_string(),
            equipment: "GB-cp51".to_string(),
            date: day(),
            parameters: [("V1".to_string(), 4.5)].into_iter().collect(),
            notes: None,
        };
        ctx.coordinator.commit(draft).await.unwrap();

        // Startup order used by the binary: probe first, then background.
        assert!(ctx.probe_once().await);
        let mut events = ctx.coordinator.subscribe();
        let background = ctx.spawn_background().unwrap();

        let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(event, crate::sync::SyncEvent::Reconciled(_)));
        assert_eq!(gateway.insert_count(), 1);
        assert_eq!(ctx.coordinator.ledger_stats().unwrap().unsynced, 0);

        background.shutdown().await;
    }

    #[test]
    fn test_identity_from_config() {
        let ctx = AppContext::with_parts(
            &signed_in_config(),
            Catalog::default(),
            Ledger::open_in_memory().unwrap(),
            Arc::new(DisabledGateway),
            None,
        );
        assert_eq!(ctx.identity.current_user().unwrap().id, "op-3");
        assert_eq!(ctx.entry_machine().progress().total(), 144);
    }
}
