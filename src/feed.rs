//! Change-feed bridge: one change-stream task per watched namespace.

use crate::client::sleep_unless_shutdown;
use crate::error::Disposition;
use crate::event::Event;
use crate::namespace::Namespace;
use crate::store::DocumentStore;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Watched namespaces and the tasks streaming them.
#[derive(Default)]
pub struct ChangeFeed {
    watched: Mutex<Vec<Namespace>>,
    tasks: Mutex<HashMap<Namespace, JoinHandle<()>>>,
}

impl ChangeFeed {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a namespace to the watched set. Returns false if it was already there.
    pub fn add(&self, ns: Namespace) -> bool {
        let mut watched = self.watched.lock();
        if watched.contains(&ns) {
            return false;
        }
        watched.push(ns);
        true
    }

    /// Watched namespaces in the order they were added.
    pub fn watched(&self) -> Vec<Namespace> {
        self.watched.lock().clone()
    }

    /// Whether a stream task is currently running for `ns`.
    pub fn is_streaming(&self, ns: &Namespace) -> bool {
        self.tasks
            .lock()
            .get(ns)
            .map(|task| !task.is_finished())
            .unwrap_or(false)
    }

    /// Start streaming `ns`, replacing any task already running for it.
    pub fn attach(
        &self,
        ns: Namespace,
        store: Arc<dyn DocumentStore>,
        events: broadcast::Sender<Event>,
        retry_interval: Duration,
        shutdown: watch::Receiver<bool>,
    ) {
        let task = tokio::spawn(stream_changes(
            ns.clone(),
            store,
            events,
            retry_interval,
            shutdown,
        ));
        if let Some(previous) = self.tasks.lock().insert(ns, task) {
            previous.abort();
        }
    }

    /// Attach every watched namespace.
    pub fn attach_all(
        &self,
        store: &Arc<dyn DocumentStore>,
        events: &broadcast::Sender<Event>,
        retry_interval: Duration,
        shutdown: &watch::Receiver<bool>,
    ) {
        for ns in self.watched() {
            self.attach(
                ns,
                store.clone(),
                events.clone(),
                retry_interval,
                shutdown.clone(),
            );
        }
    }

    /// Stop every stream task. The watched set is kept for the next connect.
    pub fn abort(&self) {
        for (_, task) in self.tasks.lock().drain() {
            task.abort();
        }
    }
}

impl Drop for ChangeFeed {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn stream_changes(
    ns: Namespace,
    store: Arc<dyn DocumentStore>,
    events: broadcast::Sender<Event>,
    retry_interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let error = match store.watch(&ns).await {
            Ok(mut stream) => {
                tracing::info!(namespace = %ns, "watching for changes");
                loop {
                    let next = tokio::select! {
                        next = stream.next() => next,
                        _ = shutdown.wait_for(|stop| *stop) => return,
                    };
                    match next {
                        Some(Ok(change)) => {
                            tracing::trace!(namespace = %ns, kind = change.kind.as_str(), "change");
                            // no subscribers is fine
                            let _ = events.send(Event::Change(change));
                        }
                        Some(Err(err)) => break Some(err),
                        None => break None,
                    }
                }
            }
            Err(err) => Some(err),
        };

        match error {
            None => tracing::debug!(namespace = %ns, "change stream ended, reopening"),
            Some(err) => match err.disposition() {
                Disposition::Report => {
                    tracing::error!(namespace = %ns, error = %err, "change stream failed");
                    return;
                }
                Disposition::Suppress => {
                    tracing::debug!(namespace = %ns, error = %err, "change stream interrupted")
                }
                Disposition::Retry => {
                    tracing::warn!(namespace = %ns, error = %err, "change stream lost, reopening")
                }
            },
        }

        if !sleep_unless_shutdown(retry_interval, &mut shutdown).await {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watched_set_is_ordered_and_deduplicated() {
        let feed = ChangeFeed::new();
        assert!(feed.add(Namespace::new("app", "users")));
        assert!(feed.add(Namespace::new("app", "orders")));
        assert!(!feed.add(Namespace::new("app", "users")));

        assert_eq!(
            feed.watched(),
            vec![Namespace::new("app", "users"), Namespace::new("app", "orders")]
        );
    }

    #[test]
    fn test_not_streaming_before_attach() {
        let feed = ChangeFeed::new();
        let ns = Namespace::new("app", "users");
        feed.add(ns.clone());
        assert!(!feed.is_streaming(&ns));
    }
}
