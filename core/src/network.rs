//! Connectivity tracking.
//!
//! Raw observations (from a probe loop or the host platform) are fed in with
//! [`NetworkStatusMonitor::report`]. A background task debounces them and
//! publishes only stable transitions, so a link that flaps inside the
//! debounce window produces at most one change event.

use async_trait::async_trait;
use reqwest::Client;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type Listener = Arc<dyn Fn(bool) + Send + Sync>;
type Registry = Mutex<Vec<(u64, Listener)>>;

/// Debounced view of network reachability
pub struct NetworkStatusMonitor {
    raw_tx: watch::Sender<bool>,
    stable_rx: watch::Receiver<bool>,
    listeners: Arc<Registry>,
    next_listener: AtomicU64,
}

/// Registration handle returned by [`NetworkStatusMonitor::on_change`].
/// Dropping it removes the listener.
#[must_use = "the listener is removed when the guard is dropped"]
pub struct ListenerGuard {
    id: u64,
    registry: Weak<Registry>,
}

impl fmt::Debug for ListenerGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerGuard").field("id", &self.id).finish()
    }
}

impl Drop for ListenerGuard {
    fn drop(&mut self) {
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        match registry.lock() {
            Ok(mut listeners) => listeners.retain(|(id, _)| *id != self.id),
            Err(e) => warn!(error = %e, "Listener registry poisoned, listener not removed"),
        };
    }
}

impl NetworkStatusMonitor {
    /// Starts a monitor. Must be called inside a tokio runtime.
    pub fn start(initial: bool, debounce: Duration) -> Arc<Self> {
        let (raw_tx, raw_rx) = watch::channel(initial);
        let (stable_tx, stable_rx) = watch::channel(initial);
        let listeners: Arc<Registry> = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn(debounce_loop(raw_rx, stable_tx, listeners.clone(), debounce));

        Arc::new(Self {
            raw_tx,
            stable_rx,
            listeners,
            next_listener: AtomicU64::new(0),
        })
    }

    pub fn is_online(&self) -> bool {
        *self.stable_rx.borrow()
    }

    /// Feeds one raw connectivity observation
    pub fn report(&self, online: bool) {
        self.raw_tx.send_replace(online);
    }

    /// Registers a listener invoked once per stable transition. The listener
    /// stays registered for as long as the returned guard is alive.
    pub fn on_change<F>(&self, callback: F) -> ListenerGuard
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        match self.listeners.lock() {
            Ok(mut listeners) => listeners.push((id, Arc::new(callback))),
            Err(e) => warn!(error = %e, "Listener registry poisoned, listener dropped"),
        }
        ListenerGuard {
            id,
            registry: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().map(|l| l.len()).unwrap_or(0)
    }

    /// Stream of stable connectivity values
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.stable_rx.clone()
    }
}

async fn debounce_loop(
    mut raw_rx: watch::Receiver<bool>,
    stable_tx: watch::Sender<bool>,
    listeners: Arc<Registry>,
    window: Duration,
) {
    loop {
        if raw_rx.changed().await.is_err() {
            break;
        }

        // Wait until the raw signal stays quiet for a full window.
        loop {
            match tokio::time::timeout(window, raw_rx.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return,
                Err(_) => break,
            }
        }

        let value = *raw_rx.borrow_and_update();
        if value == *stable_tx.borrow() {
            debug!(online = value, "Connectivity flap settled on previous value");
            continue;
        }

        stable_tx.send_replace(value);
        info!(online = value, "Connectivity changed");

        // Called outside the lock so a listener may drop its own guard.
        let current: Vec<Listener> = match listeners.lock() {
            Ok(listeners) => listeners.iter().map(|(_, l)| l.clone()).collect(),
            Err(e) => {
                warn!(error = %e, "Listener registry poisoned, skipping notification");
                continue;
            }
        };
        for listener in current {
            listener(value);
        }
    }
    debug!("Network monitor stopped");
}

/// Something that can tell whether the network is reachable right now
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    async fn check(&self) -> bool;
}

/// Probes reachability with a HEAD request against a well-known URL
#[derive(Debug, Clone)]
pub struct HttpProbe {
    client: Client,
    url: String,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> bool {
        match self.client.head(&self.url).send().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "Connectivity probe failed");
                false
            }
        }
    }
}

/// Periodically reports probe results into the monitor. The loop ends when
/// the monitor is dropped.
pub fn spawn_probe_loop(
    monitor: &Arc<NetworkStatusMonitor>,
    probe: Arc<dyn ConnectivityProbe>,
    interval: Duration,
) -> JoinHandle<()> {
    let monitor = Arc::downgrade(monitor);
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let online = probe.check().await;
            match monitor.upgrade() {
                Some(monitor) => monitor.report(online),
                None => break,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    const WINDOW: Duration = Duration::from_millis(500);

    type Counter = (ListenerGuard, Arc<AtomicUsize>, Arc<Mutex<Vec<bool>>>);

    fn counting_listener(monitor: &NetworkStatusMonitor) -> Counter {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let (c, s) = (count.clone(), seen.clone());
        let guard = monitor.on_change(move |online| {
            c.fetch_add(1, Ordering::SeqCst);
            s.lock().unwrap().push(online);
        });
        (guard, count, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_transition_notifies_once() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let (_guard, count, seen) = counting_listener(&monitor);

        monitor.report(false);
        tokio::time::sleep(WINDOW * 2).await;

        assert!(!monitor.is_online());
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flapping_collapses_to_last_value() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let (_guard, count, seen) = counting_listener(&monitor);

        for online in [false, true, false, true, false] {
            monitor.report(online);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tokio::time::sleep(WINDOW * 2).await;

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(*seen.lock().unwrap(), vec![false]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flap_back_to_same_value_is_silent() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let (_guard, count, _) = counting_listener(&monitor);

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(20)).await;
        monitor.report(true);
        tokio::time::sleep(WINDOW * 2).await;

        assert!(monitor.is_online());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_value_not_published_before_window() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);

        monitor.report(false);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(monitor.is_online());

        tokio::time::sleep(WINDOW).await;
        assert!(!monitor.is_online());
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_stable_value() {
        let monitor = NetworkStatusMonitor::start(false, WINDOW);
        let mut rx = monitor.subscribe();

        monitor.report(true);
        rx.changed().await.unwrap();
        assert!(*rx.borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_guard_unregisters_listener() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let (kept, kept_count, _) = counting_listener(&monitor);
        let (dropped, dropped_count, _) = counting_listener(&monitor);
        assert_eq!(monitor.listener_count(), 2);

        drop(dropped);
        assert_eq!(monitor.listener_count(), 1);

        monitor.report(false);
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(kept_count.load(Ordering::SeqCst), 1);
        assert_eq!(dropped_count.load(Ordering::SeqCst), 0);

        drop(kept);
        assert_eq!(monitor.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_may_drop_its_own_guard() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let slot: Arc<Mutex<Option<ListenerGuard>>> = Arc::new(Mutex::new(None));
        let inner = slot.clone();
        let guard = monitor.on_change(move |_| {
            inner.lock().unwrap().take();
        });
        *slot.lock().unwrap() = Some(guard);

        monitor.report(false);
        tokio::time::sleep(WINDOW * 2).await;
        assert_eq!(monitor.listener_count(), 0);
    }

    struct FixedProbe(bool);

    #[async_trait]
    impl ConnectivityProbe for FixedProbe {
        async fn check(&self) -> bool {
            self.0
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_loop_reports_into_monitor() {
        let monitor = NetworkStatusMonitor::start(true, WINDOW);
        let handle = spawn_probe_loop(&monitor, Arc::new(FixedProbe(false)), Duration::from_secs(1));

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!monitor.is_online());
        handle.abort();
    }
}
