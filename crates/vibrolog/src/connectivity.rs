//! Online/offline tracking.
//!
//! [`ConnectivityMonitor`] folds whatever connectivity signal the platform
//! offers into one boolean and an edge-triggered stream of [`Transition`]s.
//! Repeating the current state is a no-op, so listeners never see a second
//! `CameOnline` without a `WentOffline` in between.
//!
//! Where no push signal exists, [`spawn_probe_loop`] polls a
//! [`ConnectivityProbe`] at a bounded interval and feeds the monitor.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Capacity of the transition channel; slow listeners skip stale edges.
const TRANSITION_CAPACITY: usize = 16;

/// A change in connectivity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    /// Offline to online.
    CameOnline,
    /// Online to offline.
    WentOffline,
}

impl std::fmt::Display for Transition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CameOnline => write!(f, "online"),
            Self::WentOffline => write!(f, "offline"),
        }
    }
}

#[derive(Debug)]
struct MonitorInner {
    online: watch::Sender<bool>,
    transitions: broadcast::Sender<Transition>,
}

/// Shared connectivity state. Cheap to clone; clones observe the same state.
#[derive(Debug, Clone)]
pub struct ConnectivityMonitor {
    inner: Arc<MonitorInner>,
}

impl ConnectivityMonitor {
    /// Create a monitor with a known starting state.
    #[must_use]
    pub fn new(initially_online: bool) -> Self {
        let (online, _) = watch::channel(initially_online);
        let (transitions, _) = broadcast::channel(TRANSITION_CAPACITY);
        Self {
            inner: Arc::new(MonitorInner {
                online,
                transitions,
            }),
        }
    }

    /// Current connectivity.
    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.inner.online.borrow()
    }

    /// Report the platform's current signal.
    ///
    /// Returns the transition this caused, or `None` if the state was
    /// already `online`.
    pub fn set_online(&self, online: bool) -> Option<Transition> {
        let changed = self.inner.online.send_if_modified(|state| {
            if *state == online {
                false
            } else {
                *state = online;
                true
            }
        });
        if !changed {
            return None;
        }

        let transition = if online {
            Transition::CameOnline
        } else {
            Transition::WentOffline
        };
        info!("Connectivity changed: {transition}");
        // No subscribers is fine.
        let _ = self.inner.transitions.send(transition);
        Some(transition)
    }

    /// Subscribe to future transitions.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<Transition> {
        self.inner.transitions.subscribe()
    }

    /// Watch the level rather than the edges.
    #[must_use]
    pub fn watch(&self) -> watch::Receiver<bool> {
        self.inner.online.subscribe()
    }
}

/// A way to find out whether the remote store is reachable.
#[async_trait::async_trait]
pub trait ConnectivityProbe: Send + Sync + std::fmt::Debug {
    /// Check reachability once. Must return within a bounded time.
    async fn check(&self) -> bool;
}

/// Probe that opens a TCP connection to the remote host.
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    /// Probe `host:port` with the given connect timeout.
    #[must_use]
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        Self {
            address: address.into(),
            timeout,
        }
    }

    /// Probe the host of an `http(s)://` base URL.
    #[must_use]
    pub fn for_base_url(base_url: &str, timeout: Duration) -> Option<Self> {
        probe_address(base_url).map(|address| Self::new(address, timeout))
    }

    /// The address being probed.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }
}

#[async_trait::async_trait]
impl ConnectivityProbe for TcpProbe {
    async fn check(&self) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect(&self.address)).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                debug!("Probe to {} failed: {e}", self.address);
                false
            }
            Err(_) => {
                debug!("Probe to {} timed out", self.address);
                false
            }
        }
    }
}

/// Derive `host:port` from an `http(s)://` URL.
#[must_use]
pub fn probe_address(base_url: &str) -> Option<String> {
    let (rest, default_port) = if let Some(rest) = base_url.strip_prefix("https://") {
        (rest, 443)
    } else if let Some(rest) = base_url.strip_prefix("http://") {
        (rest, 80)
    } else {
        return None;
    };

    let authority = rest.split(['/', '?', '#']).next().unwrap_or_default();
    let host_port = authority.rsplit('@').next().unwrap_or_default();
    if host_port.is_empty() {
        return None;
    }

    let has_port = if host_port.starts_with('[') {
        host_port.contains("]:")
    } else {
        host_port.contains(':')
    };
    if has_port {
        Some(host_port.to_string())
    } else {
        Some(format!("{host_port}:{default_port}"))
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    notify: Notify,
}

/// Handle to stop a running probe loop. Clones share the same signal.
#[derive(Debug, Clone, Default)]
pub struct ProbeHandle {
    signal: Arc<StopSignal>,
}

impl ProbeHandle {
    /// Signal the loop to stop after its current probe.
    pub fn stop(&self) {
        self.signal.stopped.store(true, Ordering::SeqCst);
        self.signal.notify.notify_waiters();
    }

    /// Check if the stop signal has been sent.
    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.signal.stopped.load(Ordering::SeqCst)
    }
}

/// Poll `probe` every `interval` and report results to `monitor`.
///
/// The first probe runs immediately.
pub fn spawn_probe_loop(
    monitor: ConnectivityMonitor,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> (ProbeHandle, JoinHandle<()>) {
    let handle = ProbeHandle::default();
    let loop_handle = handle.clone();

    let task = tokio::spawn(async move {
        while !loop_handle.should_stop() {
            let online = probe.check().await;
            monitor.set_online(online);

            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = loop_handle.signal.notify.notified() => {}
            }
        }
        debug!("Connectivity probe loop stopped");
    });

    (handle, task)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_initial_state() {
        assert!(ConnectivityMonitor::new(true).is_online());
        assert!(!ConnectivityMonitor::new(false).is_online());
    }

    #[test]
    fn test_transitions_are_edge_triggered() {
        let monitor = ConnectivityMonitor::new(false);
        assert_eq!(monitor.set_online(true), Some(Transition::CameOnline));
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(true), None);
        assert_eq!(monitor.set_online(false), Some(Transition::WentOffline));
        assert_eq!(monitor.set_online(false), None);
        assert!(!monitor.is_online());
    }

    #[tokio::test]
    async fn test_subscribers_see_each_edge_once() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();

        monitor.set_online(true);
        monitor.set_online(true);
        monitor.set_online(false);
        monitor.set_online(true);

        assert_eq!(rx.recv().await.unwrap(), Transition::CameOnline);
        assert_eq!(rx.recv().await.unwrap(), Transition::WentOffline);
        assert_eq!(rx.recv().await.unwrap(), Transition::CameOnline);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_clones_share_state() {
        let monitor = ConnectivityMonitor::new(false);
        let clone = monitor.clone();
        monitor.set_online(true);
        assert!(clone.is_online());
        assert!(*clone.watch().borrow());
    }

    #[test]
    fn test_probe_address() {
        assert_eq!(
            probe_address("https://abc.supabase.co"),
            Some("abc.supabase.co:443".to_string())
        );
        assert_eq!(
            probe_address("http://10.0.0.5:8080/rest"),
            Some("10.0.0.5:8080".to_string())
        );
        assert_eq!(
            probe_address("http://[::1]/x"),
            Some("[::1]:80".to_string())
        );
        assert_eq!(probe_address("ftp://example.com"), None);
        assert_eq!(probe_address("https://"), None);
    }

    #[test]
    fn test_probe_handle_stop() {
        let handle = ProbeHandle::default();
        let clone = handle.clone();
        assert!(!clone.should_stop());
        handle.stop();
        assert!(clone.should_stop());
    }

    #[derive(Debug, Default)]
    struct FlippingProbe {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl ConnectivityProbe for FlippingProbe {
        async fn check(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) % 2 == 0
        }
    }

    #[tokio::test]
    async fn test_probe_loop_feeds_monitor() {
        let monitor = ConnectivityMonitor::new(false);
        let mut rx = monitor.subscribe();
        let probe = Arc::new(FlippingProbe::default());

        let (handle, task) = spawn_probe_loop(
            monitor.clone(),
            probe.clone(),
            Duration::from_millis(5),
        );

        assert_eq!(rx.recv().await.unwrap(), Transition::CameOnline);
        assert_eq!(rx.recv().await.unwrap(), Transition::WentOffline);

        handle.stop();
        task.await.unwrap();
        assert!(probe.calls.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test]
    async fn test_tcp_probe_unreachable() {
        // Port 9 on localhost is almost never listening; either way the probe must return.
        let probe = TcpProbe::new("127.0.0.1:9", Duration::from_millis(200));
        let _ = probe.check().await;
        assert_eq!(probe.address(), "127.0.0.1:9");
    }

    #[tokio::test]
    async fn test_tcp_probe_reachable() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let probe = TcpProbe::new(addr.to_string(), Duration::from_secs(1));
        assert!(probe.check().await);
    }
}
