//! Connection manager: connect with retry, liveness monitoring and shutdown.

use crate::config::{Config, ConnectOverrides};
use crate::error::{Disposition, MongoError, Result};
use crate::event::Event;
use crate::feed::ChangeFeed;
use crate::namespace::Namespace;
use crate::store::{Connector, DocumentStore};
use parking_lot::{Mutex, RwLock};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::{AbortHandle, JoinHandle};

/// Capacity of the event broadcast channel.
const EVENT_CAPACITY: usize = 1024;

/// Lifecycle state of the managed connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Owns the driver handle and everything tied to its lifetime.
///
/// Cheap to clone; clones share the same connection.
///
/// # Example
///
/// ```no_run
/// use mongo_bus::{Config, ConnectionManager, MongoConnector};
/// use std::sync::Arc;
///
/// #[tokio::main]
/// async fn main() -> mongo_bus::Result<()> {
///     let manager = ConnectionManager::new(Config::default(), Arc::new(MongoConnector));
///     manager.connect().await.expect("connect task")?;
///     manager.shutdown().await;
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: RwLock<Arc<Config>>,
    connector: Arc<dyn Connector>,
    store: RwLock<Option<Arc<dyn DocumentStore>>>,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<Event>,
    shutdown: watch::Sender<bool>,
    feed: ChangeFeed,
    connecting: Mutex<Option<AbortHandle>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(monitor) = self.monitor.get_mut().take() {
            monitor.abort();
        }
    }
}

impl ConnectionManager {
    pub fn new(config: Config, connector: Arc<dyn Connector>) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (shutdown, _) = watch::channel(false);

        Self {
            inner: Arc::new(Inner {
                config: RwLock::new(Arc::new(config)),
                connector,
                store: RwLock::new(None),
                state,
                events,
                shutdown,
                feed: ChangeFeed::new(),
                connecting: Mutex::new(None),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to lifecycle and change events.
    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.inner.events.subscribe()
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<Event> {
        self.inner.events.clone()
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Follow state transitions.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Current configuration snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.inner.config.read().clone()
    }

    /// The driver handle, if a connection has been established.
    pub fn store(&self) -> Option<Arc<dyn DocumentStore>> {
        self.inner.store.read().clone()
    }

    /// Namespaces in the watched set.
    pub fn watched(&self) -> Vec<Namespace> {
        self.inner.feed.watched()
    }

    /// Connect with the current configuration.
    pub fn connect(&self) -> JoinHandle<Result<()>> {
        self.connect_with(&ConnectOverrides::default())
    }

    /// Merge `overrides` into the configuration and connect in the background.
    ///
    /// Transient failures are retried every `retry_interval` until the
    /// connection succeeds or [`shutdown`](Self::shutdown) is called. A
    /// connect already in progress is abandoned.
    pub fn connect_with(&self, overrides: &ConnectOverrides) -> JoinHandle<Result<()>> {
        {
            let mut config = self.inner.config.write();
            let mut next = Config::clone(&config);
            next.apply(overrides);
            *config = Arc::new(next);
        }
        self.inner.shutdown.send_replace(false);

        let manager = self.clone();
        let task = tokio::spawn(async move { manager.run_connect().await });
        if let Some(previous) = self.inner.connecting.lock().replace(task.abort_handle()) {
            previous.abort();
        }
        task
    }

    async fn run_connect(&self) -> Result<()> {
        let mut shutdown = self.inner.shutdown.subscribe();

        loop {
            let config = self.config();
            let url = config.connection_url();
            self.inner.state.send_replace(ConnectionState::Connecting);
            tracing::info!(url = %url, "connecting to mongodb");

            let err = match self.inner.connector.connect(&url, &config.driver).await {
                Ok(store) => {
                    if *shutdown.borrow() {
                        store.close().await;
                        self.inner.state.send_replace(ConnectionState::Disconnected);
                        return Err(MongoError::connection("shut down while connecting"));
                    }
                    self.on_connected(store, &config);
                    return Ok(());
                }
                Err(err) => err,
            };

            if self.handle_error(&err) != Disposition::Retry {
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }

            tracing::warn!(
                url = %url,
                error = %err,
                retry_in_ms = config.retry_interval_ms,
                "connection failed, retrying"
            );
            if !sleep_unless_shutdown(config.retry_interval(), &mut shutdown).await {
                tracing::debug!("connection retry cancelled");
                self.inner.state.send_replace(ConnectionState::Disconnected);
                return Err(err);
            }
        }
    }

    fn on_connected(&self, store: Arc<dyn DocumentStore>, config: &Config) {
        if let Some(previous) = self.inner.store.write().replace(store.clone()) {
            tokio::spawn(async move { previous.close().await });
        }
        self.inner.state.send_replace(ConnectionState::Connected);
        tracing::info!("connected to mongodb");
        let _ = self.inner.events.send(Event::Connected);

        self.inner.feed.abort();
        self.inner.feed.attach_all(
            &store,
            &self.inner.events,
            config.retry_interval(),
            &self.inner.shutdown.subscribe(),
        );
        self.start_monitor(store, config.heartbeat_interval());
    }

    /// Classify an error and log it accordingly.
    ///
    /// Retryable errors are left for the caller to log alongside its retry
    /// decision.
    pub fn handle_error(&self, err: &MongoError) -> Disposition {
        let disposition = err.disposition();
        match disposition {
            Disposition::Suppress => tracing::debug!(error = %err, "ignoring transient topology error"),
            Disposition::Retry => {}
            Disposition::Report => tracing::error!(error = %err, "mongodb error"),
        }
        disposition
    }

    /// Add `namespace` to the watched set and stream it if connected.
    pub fn watch(&self, namespace: &str) -> Result<()> {
        let config = self.config();
        let ns = Namespace::resolve(namespace, &config.namespaces)?;
        if !self.inner.feed.add(ns.clone()) {
            tracing::debug!(namespace = %ns, "already watching");
            return Ok(());
        }

        if let Some(store) = self.store() {
            self.inner.feed.attach(
                ns,
                store,
                self.inner.events.clone(),
                config.retry_interval(),
                self.inner.shutdown.subscribe(),
            );
        }
        Ok(())
    }

    fn start_monitor(&self, store: Arc<dyn DocumentStore>, interval: Duration) {
        let inner = Arc::downgrade(&self.inner);
        let mut shutdown = self.inner.shutdown.subscribe();

        let task = tokio::spawn(async move {
            while sleep_unless_shutdown(interval, &mut shutdown).await {
                match Weak::upgrade(&inner) {
                    Some(inner) => ConnectionManager { inner }.heartbeat(&store).await,
                    None => break,
                }
            }
        });
        if let Some(previous) = self.inner.monitor.lock().replace(task) {
            previous.abort();
        }
    }

    async fn heartbeat(&self, store: &Arc<dyn DocumentStore>) {
        let result = store.ping().await;
        match (self.state(), result) {
            (ConnectionState::Disconnected, Ok(())) => {
                tracing::info!("connection recovered");
                self.inner.state.send_replace(ConnectionState::Connected);
                let _ = self.inner.events.send(Event::Connected);
            }
            (ConnectionState::Connected, Err(err)) => {
                tracing::warn!(error = %err, "heartbeat failed, connection lost");
                self.inner.state.send_replace(ConnectionState::Disconnected);
                let _ = self.inner.events.send(Event::Disconnected);
            }
            (_, Err(err)) => tracing::debug!(error = %err, "heartbeat failed"),
            _ => {}
        }
    }

    /// Cancel any pending retry, stop background tasks and close the handle.
    pub async fn shutdown(&self) {
        self.inner.shutdown.send_replace(true);
        if let Some(monitor) = self.inner.monitor.lock().take() {
            monitor.abort();
        }
        self.inner.feed.abort();

        let store = self.inner.store.write().take();
        let had_store = store.is_some();
        if let Some(store) = store {
            store.close().await;
        }

        let previous = self.inner.state.send_replace(ConnectionState::Disconnected);
        if had_store || previous != ConnectionState::Disconnected {
            tracing::info!("disconnected from mongodb");
            let _ = self.inner.events.send(Event::Disconnected);
        }
    }
}

/// Sleep for `duration` unless shutdown is signalled first.
///
/// Returns false when interrupted.
pub(crate) async fn sleep_unless_shutdown(
    duration: Duration,
    shutdown: &mut watch::Receiver<bool>,
) -> bool {
    if *shutdown.borrow() {
        return false;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown.wait_for(|stop| *stop) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_completes() {
        let (_tx, mut rx) = watch::channel(false);
        let start = tokio::time::Instant::now();
        assert!(sleep_unless_shutdown(Duration::from_secs(10), &mut rx).await);
        assert!(start.elapsed() >= Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_interrupted() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move { sleep_unless_shutdown(Duration::from_secs(10), &mut rx).await });
        tokio::task::yield_now().await;
        tx.send_replace(true);
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_sleep_after_shutdown_returns_immediately() {
        let (_tx, mut rx) = watch::channel(true);
        assert!(!sleep_unless_shutdown(Duration::from_secs(3600), &mut rx).await);
    }
}
