//! Collection watches.
//!
//! Many UI surfaces may watch the same collection. The registry keeps at most
//! one remote subscription per collection and fans every snapshot out to all
//! registered callbacks. Snapshots include expired leases; callers decide how
//! to render them.
//!
//! Callbacks are invoked outside the registry lock, so a callback may register
//! or cancel watches itself. Deliveries to one callback are serialized and
//! never go backwards; a callback must not synchronously trigger a delivery to
//! itself (for example through `reconcile_connectivity`).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::classify::classify;
use crate::coordinator::LeaseCoordinator;
use crate::lease::{LeaseSnapshot, snapshot_of};
use crate::metrics;
use crate::observability::collection_span;
use crate::remote::SnapshotStream;

/// Callback receiving `entry_id -> editor_name` snapshots.
pub type WatchCallback = Arc<dyn Fn(&LeaseSnapshot) + Send + Sync>;

/// One registered callback and the newest snapshot sequence it has seen.
struct Watcher {
    callback: WatchCallback,
    delivered: Mutex<u64>,
}

impl Watcher {
    fn new(callback: WatchCallback) -> Self {
        Self {
            callback,
            delivered: Mutex::new(0),
        }
    }

    /// Invokes the callback unless a newer snapshot was already delivered.
    ///
    /// Holds the watcher's own lock across the call so deliveries to one
    /// callback never interleave.
    fn deliver(&self, sequence: u64, snapshot: &LeaseSnapshot) {
        let mut delivered = self
            .delivered
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if sequence <= *delivered {
            return;
        }
        *delivered = sequence;
        (self.callback)(snapshot);
    }
}

#[derive(Default)]
struct CollectionWatch {
    watchers: Vec<(u64, Arc<Watcher>)>,
    subscription: Option<JoinHandle<()>>,
    sequence: u64,
    last_snapshot: Option<(u64, LeaseSnapshot)>,
}

impl CollectionWatch {
    fn has_live_subscription(&self) -> bool {
        self.subscription
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    fn cancel_subscription(&mut self) {
        if let Some(task) = self.subscription.take() {
            task.abort();
        }
    }

    fn next_sequence(&mut self) -> u64 {
        self.sequence += 1;
        self.sequence
    }
}

type Collections = HashMap<String, CollectionWatch>;

/// Registry of watch callbacks and remote subscriptions.
///
/// Every snapshot published for a collection gets a sequence number under the
/// registry lock; a watcher never receives a snapshot older than one it has
/// already seen, whichever thread delivers first.
#[derive(Default)]
pub(crate) struct WatchRegistry {
    collections: Mutex<Collections>,
    next_id: AtomicU64,
}

impl WatchRegistry {
    fn lock(&self) -> MutexGuard<'_, Collections> {
        self.collections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds a callback and returns its id, the watcher, and the last snapshot
    /// of a live subscription if any.
    fn register(
        &self,
        collection_id: &str,
        callback: WatchCallback,
    ) -> (u64, Arc<Watcher>, Option<(u64, LeaseSnapshot)>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let watcher = Arc::new(Watcher::new(callback));
        let mut collections = self.lock();
        let watch = collections.entry(collection_id.to_string()).or_default();
        watch.watchers.push((id, Arc::clone(&watcher)));
        let cached = watch
            .has_live_subscription()
            .then(|| watch.last_snapshot.clone())
            .flatten();
        metrics::set_watch_callbacks(total_watchers(&collections));
        (id, watcher, cached)
    }

    /// Removes a callback; the last one out tears down the subscription.
    fn unregister(&self, collection_id: &str, id: u64) {
        let mut collections = self.lock();
        let Some(watch) = collections.get_mut(collection_id) else {
            return;
        };
        watch.watchers.retain(|(existing, _)| *existing != id);
        if watch.watchers.is_empty() {
            watch.cancel_subscription();
            collections.remove(collection_id);
            tracing::debug!(collection = collection_id, "last watcher left; subscription closed");
        }
        metrics::set_watch_callbacks(total_watchers(&collections));
    }

    pub(crate) fn collections(&self) -> Vec<String> {
        self.lock().keys().cloned().collect()
    }

    pub(crate) fn callback_count(&self, collection_id: &str) -> usize {
        self.lock()
            .get(collection_id)
            .map_or(0, |watch| watch.watchers.len())
    }

    pub(crate) fn has_subscription(&self, collection_id: &str) -> bool {
        self.lock()
            .get(collection_id)
            .is_some_and(CollectionWatch::has_live_subscription)
    }

    /// Aborts every remote subscription, keeping callbacks registered.
    pub(crate) fn cancel_subscriptions(&self) {
        for watch in self.lock().values_mut() {
            watch.cancel_subscription();
        }
    }

    /// Caches `snapshot` and delivers it to every callback of the collection.
    pub(crate) fn fan_out(&self, collection_id: &str, snapshot: LeaseSnapshot) {
        self.publish(collection_id, None, || snapshot);
    }

    /// Publishes the snapshot produced by `read` to the collection's watchers,
    /// or only to watcher `target`.
    ///
    /// `read` runs under the registry lock so the snapshot and its sequence
    /// number are taken together. Callbacks run after the lock is released.
    fn publish(
        &self,
        collection_id: &str,
        target: Option<u64>,
        read: impl FnOnce() -> LeaseSnapshot,
    ) {
        let (sequence, snapshot, watchers) = {
            let mut collections = self.lock();
            let Some(watch) = collections.get_mut(collection_id) else {
                return;
            };
            let sequence = watch.next_sequence();
            let snapshot = read();
            if target.is_none() {
                watch.last_snapshot = Some((sequence, snapshot.clone()));
            }
            let watchers: Vec<Arc<Watcher>> = watch
                .watchers
                .iter()
                .filter(|(id, _)| target.is_none_or(|target| target == *id))
                .map(|(_, watcher)| Arc::clone(watcher))
                .collect();
            (sequence, snapshot, watchers)
        };
        for watcher in watchers {
            watcher.deliver(sequence, &snapshot);
        }
    }
}

fn total_watchers(collections: &Collections) -> usize {
    collections.values().map(|watch| watch.watchers.len()).sum()
}

impl Drop for WatchRegistry {
    fn drop(&mut self) {
        let collections = self
            .collections
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        for watch in collections.values_mut() {
            watch.cancel_subscription();
        }
    }
}

/// Handle to a registered watch.
///
/// Dropping the handle keeps the watch alive; call [`WatchHandle::cancel`] to
/// remove it.
#[derive(Debug)]
pub struct WatchHandle {
    collection_id: String,
    id: u64,
    registry: Weak<WatchRegistry>,
}

impl WatchHandle {
    /// Watched collection.
    #[must_use]
    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    /// Removes the callback. The last callback of a collection also closes
    /// its remote subscription.
    pub fn cancel(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.unregister(&self.collection_id, self.id);
        }
    }
}

impl LeaseCoordinator {
    /// Watches the lease map of a collection.
    ///
    /// Online, the first watcher opens the collection's remote subscription
    /// and later watchers share it, receiving the last snapshot immediately.
    /// Offline, the callback receives the local lease map immediately and
    /// again whenever it changes.
    ///
    /// Also starts the coordinator's event listener, so watchers switch
    /// between remote and local data as connectivity changes.
    pub fn watch<F>(&self, collection_id: &str, callback: F) -> WatchHandle
    where
        F: Fn(&LeaseSnapshot) + Send + Sync + 'static,
    {
        let watches = &self.inner.watches;
        let (id, watcher, cached) = watches.register(collection_id, Arc::new(callback));
        self.start_event_listener();

        if self.is_online() {
            if let Some((sequence, snapshot)) = cached {
                watcher.deliver(sequence, &snapshot);
            }
            self.ensure_subscription(collection_id);
        } else {
            let local = &self.inner.local;
            watches.publish(collection_id, Some(id), || local.local_leases(collection_id));
        }

        WatchHandle {
            collection_id: collection_id.to_string(),
            id,
            registry: Arc::downgrade(&self.inner.watches),
        }
    }

    /// Number of callbacks watching a collection.
    #[must_use]
    pub fn watcher_count(&self, collection_id: &str) -> usize {
        self.inner.watches.callback_count(collection_id)
    }

    /// Returns whether a remote subscription is open for a collection.
    #[must_use]
    pub fn is_subscribed(&self, collection_id: &str) -> bool {
        self.inner.watches.has_subscription(collection_id)
    }

    /// Opens the remote subscription of a watched collection if none is live.
    pub(crate) fn ensure_subscription(&self, collection_id: &str) {
        let mut collections = self.inner.watches.lock();
        let Some(watch) = collections.get_mut(collection_id) else {
            return;
        };
        if watch.has_live_subscription() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                collection = collection_id,
                "no async runtime; lease subscription not started"
            );
            return;
        };
        let stream = match self.inner.remote.subscribe(collection_id) {
            Ok(stream) => stream,
            Err(error) => {
                tracing::warn!(
                    collection = collection_id,
                    error = %error,
                    class = classify(&error).as_str(),
                    "failed to subscribe to leases"
                );
                return;
            }
        };

        let registry = Arc::downgrade(&self.inner.watches);
        let task = pump_snapshots(registry, collection_id.to_string(), stream)
            .instrument(collection_span("watch", collection_id));
        watch.subscription = Some(runtime.spawn(task));
        watch.last_snapshot = None;
        tracing::debug!(collection = collection_id, "lease subscription opened");
    }

    /// Delivers the local lease map of a collection to its watchers.
    pub(crate) fn fan_out_local(&self, collection_id: &str) {
        let local = &self.inner.local;
        self.inner
            .watches
            .publish(collection_id, None, || local.local_leases(collection_id));
    }
}

async fn pump_snapshots(
    registry: Weak<WatchRegistry>,
    collection_id: String,
    mut stream: SnapshotStream,
) {
    while let Some(item) = stream.next().await {
        let Some(registry) = registry.upgrade() else {
            return;
        };
        match item {
            Ok(leases) => registry.fan_out(&collection_id, snapshot_of(&leases)),
            Err(error) => tracing::warn!(
                error = %error,
                class = classify(&error).as_str(),
                "lease subscription error"
            ),
        }
    }
    tracing::debug!("lease subscription ended");
}
