//! Remote lease store contract and an in-memory implementation.
//!
//! The remote store is the shared, eventually-consistent document store all
//! devices talk to. It has no locking primitive of its own; the coordinator
//! builds leases on top of plain reads, create-or-replace writes, deletes and
//! snapshot subscriptions.
//!
//! Records are addressed by `(collection_id, entry_id)`. Writes never carry a
//! client timestamp: the store stamps `acquired_at` from its own clock, the
//! way a document store resolves a server-timestamp sentinel.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use futures::stream::BoxStream;
use tokio::sync::broadcast;

use crate::clock::{Clock, SystemClock};
use crate::lease::{Lease, LeaseClaim, LeaseKey};

/// Capacity of each per-collection snapshot channel.
const SNAPSHOT_CHANNEL_CAPACITY: usize = 64;

/// Status code attached to a remote failure.
///
/// Mirrors the canonical status codes document stores report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteErrorCode {
    /// The operation was cancelled.
    Cancelled,
    /// Unknown error.
    Unknown,
    /// The request was malformed.
    InvalidArgument,
    /// The deadline expired before the operation completed.
    DeadlineExceeded,
    /// The document was not found.
    NotFound,
    /// The document already exists.
    AlreadyExists,
    /// The caller lacks permission.
    PermissionDenied,
    /// Quota or rate limit exhausted.
    ResourceExhausted,
    /// The system is not in a state required for the operation.
    FailedPrecondition,
    /// The operation was aborted, typically by a concurrency conflict.
    Aborted,
    /// The service is currently unreachable.
    Unavailable,
    /// Internal backend error.
    Internal,
    /// The request has no valid credentials.
    Unauthenticated,
}

/// Failure reported by a remote store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code:?}: {message}")]
pub struct RemoteError {
    /// Status code.
    pub code: RemoteErrorCode,
    /// Backend message.
    pub message: String,
}

impl RemoteError {
    /// Creates a new remote error.
    #[must_use]
    pub fn new(code: RemoteErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Service unreachable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::Unavailable, message)
    }

    /// Missing or insufficient permissions.
    #[must_use]
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::PermissionDenied, message)
    }

    /// Internal backend failure.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(RemoteErrorCode::Internal, message)
    }
}

/// Result alias for remote store calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Stream of full-collection snapshots.
///
/// The first item is the collection's state at subscription time; each later
/// item follows a change. The stream ends when the store drops the
/// subscription.
pub type SnapshotStream = BoxStream<'static, RemoteResult<Vec<Lease>>>;

/// Remote lease store contract.
#[async_trait]
pub trait RemoteLeaseStore: Send + Sync + 'static {
    /// Reads one lease record.
    async fn get(&self, key: &LeaseKey) -> RemoteResult<Option<Lease>>;

    /// Creates or replaces the record for `claim.entry_id`.
    ///
    /// Returns the stored record with its server-assigned `acquired_at`.
    async fn put(&self, collection_id: &str, claim: LeaseClaim) -> RemoteResult<Lease>;

    /// Deletes a record. Succeeds when the record is already absent.
    async fn delete(&self, key: &LeaseKey) -> RemoteResult<()>;

    /// Lists every record in a collection, expired ones included.
    async fn list(&self, collection_id: &str) -> RemoteResult<Vec<Lease>>;

    /// Lists records whose `acquired_at` is strictly before `cutoff`.
    async fn list_acquired_before(
        &self,
        collection_id: &str,
        cutoff: DateTime<Utc>,
    ) -> RemoteResult<Vec<Lease>> {
        let mut leases = self.list(collection_id).await?;
        leases.retain(|lease| lease.acquired_at < cutoff);
        Ok(leases)
    }

    /// Deletes several records of one collection as a single atomic batch.
    async fn delete_batch(&self, collection_id: &str, entry_ids: &[String]) -> RemoteResult<()>;

    /// Subscribes to snapshot pushes for a collection.
    fn subscribe(&self, collection_id: &str) -> RemoteResult<SnapshotStream>;
}

/// In-memory remote store.
///
/// Records are held as encoded JSON documents so that decoding behaves like a
/// real backend. Every mutation pushes a fresh snapshot to the collection's
/// subscribers. Not suitable for production.
pub struct MemoryLeaseStore {
    collections: RwLock<HashMap<String, HashMap<String, Bytes>>>,
    channels: Mutex<HashMap<String, broadcast::Sender<Vec<Lease>>>>,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for MemoryLeaseStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryLeaseStore")
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

impl Default for MemoryLeaseStore {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned<T>(_: PoisonError<T>) -> RemoteError {
    RemoteError::internal("lock poisoned")
}

impl MemoryLeaseStore {
    /// Creates an empty store stamping writes with the system clock.
    #[must_use]
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Creates an empty store whose server time comes from `clock`.
    #[must_use]
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Inserts a record verbatim, bypassing server timestamping.
    ///
    /// Used to seed stores with leases of a given age.
    ///
    /// # Errors
    ///
    /// Returns an error if the record cannot be encoded.
    pub fn insert_raw(&self, collection_id: &str, lease: &Lease) -> RemoteResult<()> {
        let document = encode(lease)?;
        self.collections
            .write()
            .map_err(poisoned)?
            .entry(collection_id.to_string())
            .or_default()
            .insert(lease.entry_id.clone(), document);
        self.publish(collection_id)
    }

    /// Returns the number of records in a collection.
    #[must_use]
    pub fn len(&self, collection_id: &str) -> usize {
        self.collections
            .read()
            .map(|collections| collections.get(collection_id).map_or(0, HashMap::len))
            .unwrap_or(0)
    }

    /// Returns whether a collection holds no records.
    #[must_use]
    pub fn is_empty(&self, collection_id: &str) -> bool {
        self.len(collection_id) == 0
    }

    fn snapshot(&self, collection_id: &str) -> RemoteResult<Vec<Lease>> {
        let collections = self.collections.read().map_err(poisoned)?;
        let Some(documents) = collections.get(collection_id) else {
            return Ok(Vec::new());
        };
        let mut leases = documents
            .values()
            .map(decode)
            .collect::<RemoteResult<Vec<_>>>()?;
        drop(collections);
        leases.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        Ok(leases)
    }

    fn publish(&self, collection_id: &str) -> RemoteResult<()> {
        let sender = self
            .channels
            .lock()
            .map_err(poisoned)?
            .get(collection_id)
            .cloned();
        if let Some(sender) = sender {
            let snapshot = self.snapshot(collection_id)?;
            // No receivers is not an error: the subscription may have been dropped.
            let _ = sender.send(snapshot);
        }
        Ok(())
    }
}

fn encode(lease: &Lease) -> RemoteResult<Bytes> {
    serde_json::to_vec(lease)
        .map(Bytes::from)
        .map_err(|e| RemoteError::internal(format!("serialize lease: {e}")))
}

fn decode(document: &Bytes) -> RemoteResult<Lease> {
    serde_json::from_slice(document)
        .map_err(|e| RemoteError::internal(format!("parse lease: {e}")))
}

#[async_trait]
impl RemoteLeaseStore for MemoryLeaseStore {
    async fn get(&self, key: &LeaseKey) -> RemoteResult<Option<Lease>> {
        let collections = self.collections.read().map_err(poisoned)?;
        collections
            .get(&key.collection_id)
            .and_then(|documents| documents.get(&key.entry_id))
            .map(decode)
            .transpose()
    }

    async fn put(&self, collection_id: &str, claim: LeaseClaim) -> RemoteResult<Lease> {
        let lease = claim.stamp(self.clock.now());
        let document = encode(&lease)?;
        self.collections
            .write()
            .map_err(poisoned)?
            .entry(collection_id.to_string())
            .or_default()
            .insert(lease.entry_id.clone(), document);
        self.publish(collection_id)?;
        Ok(lease)
    }

    async fn delete(&self, key: &LeaseKey) -> RemoteResult<()> {
        let removed = self
            .collections
            .write()
            .map_err(poisoned)?
            .get_mut(&key.collection_id)
            .and_then(|documents| documents.remove(&key.entry_id));
        if removed.is_some() {
            self.publish(&key.collection_id)?;
        }
        Ok(())
    }

    async fn list(&self, collection_id: &str) -> RemoteResult<Vec<Lease>> {
        self.snapshot(collection_id)
    }

    async fn delete_batch(&self, collection_id: &str, entry_ids: &[String]) -> RemoteResult<()> {
        if entry_ids.is_empty() {
            return Ok(());
        }
        {
            let mut collections = self.collections.write().map_err(poisoned)?;
            if let Some(documents) = collections.get_mut(collection_id) {
                for entry_id in entry_ids {
                    documents.remove(entry_id);
                }
            }
        }
        self.publish(collection_id)
    }

    fn subscribe(&self, collection_id: &str) -> RemoteResult<SnapshotStream> {
        let receiver = self
            .channels
            .lock()
            .map_err(poisoned)?
            .entry(collection_id.to_string())
            .or_insert_with(|| broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY).0)
            .subscribe();
        // Taken after subscribing so no change can fall between the two.
        let initial = self.snapshot(collection_id)?;

        let updates = futures::stream::unfold(receiver, |mut receiver| async move {
            loop {
                match receiver.recv().await {
                    Ok(snapshot) => return Some((Ok(snapshot), receiver)),
                    // Snapshots are full state; skipping to the newest loses nothing.
                    Err(broadcast::error::RecvError::Lagged(_)) => {}
                    Err(broadcast::error::RecvError::Closed) => return None,
                }
            }
        });

        Ok(futures::stream::once(async move { Ok(initial) })
            .chain(updates)
            .boxed())
    }
}
