//! Device-local lease store used while offline.
//!
//! The offline subsystem owns connectivity detection and the device-local
//! lease map. The coordinator only consumes it through [`LocalLeaseStore`]:
//! it queries connectivity before every operation and listens to
//! [`LocalStoreEvent`]s on the channel returned by
//! [`LocalLeaseStore::subscribe_events`].

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use tokio::sync::broadcast;

use crate::lease::LeaseSnapshot;

/// Capacity of the local event channel.
const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Event published by the offline subsystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalStoreEvent {
    /// Connectivity flipped.
    ConnectivityChanged {
        /// New connectivity state.
        online: bool,
    },
    /// The local lease set of a collection changed (e.g. after deferred sync).
    LocalLeasesChanged {
        /// Affected collection.
        collection_id: String,
    },
}

/// Offline subsystem contract.
pub trait LocalLeaseStore: Send + Sync + 'static {
    /// Returns whether the remote store is currently reachable.
    fn is_online(&self) -> bool;

    /// Returns the local `entry_id -> editor_name` map of a collection.
    fn local_leases(&self, collection_id: &str) -> LeaseSnapshot;

    /// Records a local lease.
    fn add_local_lease(&self, collection_id: &str, entry_id: &str, editor_name: &str);

    /// Removes a local lease. Absent leases are ignored.
    fn remove_local_lease(&self, collection_id: &str, entry_id: &str);

    /// Subscribes to connectivity and local lease events.
    fn subscribe_events(&self) -> broadcast::Receiver<LocalStoreEvent>;
}

/// In-memory offline subsystem.
///
/// Publishes an event for every connectivity flip and every lease mutation.
#[derive(Debug)]
pub struct MemoryLocalLeaseStore {
    online: AtomicBool,
    leases: RwLock<HashMap<String, LeaseSnapshot>>,
    events: broadcast::Sender<LocalStoreEvent>,
}

impl Default for MemoryLocalLeaseStore {
    fn default() -> Self {
        Self::new(true)
    }
}

impl MemoryLocalLeaseStore {
    /// Creates a store with the given initial connectivity.
    #[must_use]
    pub fn new(online: bool) -> Self {
        Self {
            online: AtomicBool::new(online),
            leases: RwLock::new(HashMap::new()),
            events: broadcast::channel(EVENT_CHANNEL_CAPACITY).0,
        }
    }

    /// Flips connectivity, publishing an event when the state changes.
    pub fn set_online(&self, online: bool) {
        if self.online.swap(online, Ordering::SeqCst) != online {
            let _ = self
                .events
                .send(LocalStoreEvent::ConnectivityChanged { online });
        }
    }

    fn notify_changed(&self, collection_id: &str) {
        let _ = self.events.send(LocalStoreEvent::LocalLeasesChanged {
            collection_id: collection_id.to_string(),
        });
    }
}

impl LocalLeaseStore for MemoryLocalLeaseStore {
    fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    fn local_leases(&self, collection_id: &str) -> LeaseSnapshot {
        self.leases
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(collection_id)
            .cloned()
            .unwrap_or_default()
    }

    fn add_local_lease(&self, collection_id: &str, entry_id: &str, editor_name: &str) {
        self.leases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(collection_id.to_string())
            .or_default()
            .insert(entry_id.to_string(), editor_name.to_string());
        self.notify_changed(collection_id);
    }

    fn remove_local_lease(&self, collection_id: &str, entry_id: &str) {
        let removed = self
            .leases
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(collection_id)
            .and_then(|leases| leases.remove(entry_id));
        if removed.is_some() {
            self.notify_changed(collection_id);
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<LocalStoreEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_and_remove_round_trip() {
        let store = MemoryLocalLeaseStore::new(false);
        store.add_local_lease("roster-1", "7", "Ana");
        assert_eq!(
            store.local_leases("roster-1").get("7").map(String::as_str),
            Some("Ana")
        );

        store.remove_local_lease("roster-1", "7");
        assert!(store.local_leases("roster-1").is_empty());
        assert!(store.local_leases("unknown").is_empty());
    }

    #[test]
    fn connectivity_events_fire_only_on_change() {
        let store = MemoryLocalLeaseStore::new(true);
        let mut events = store.subscribe_events();

        store.set_online(true);
        store.set_online(false);

        assert_eq!(
            events.try_recv().expect("event"),
            LocalStoreEvent::ConnectivityChanged { online: false }
        );
        assert!(events.try_recv().is_err());
        assert!(!store.is_online());
    }

    #[test]
    fn mutations_publish_collection_events() {
        let store = MemoryLocalLeaseStore::new(false);
        let mut events = store.subscribe_events();

        store.add_local_lease("roster-1", "7", "Ana");
        store.remove_local_lease("roster-1", "missing");

        assert_eq!(
            events.try_recv().expect("event"),
            LocalStoreEvent::LocalLeasesChanged {
                collection_id: "roster-1".into()
            }
        );
        assert!(events.try_recv().is_err());
    }
}
