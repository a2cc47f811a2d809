//! Remote store double with operation tracing and failure injection.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use roster_lease::clock::Clock;
use roster_lease::remote::{
    MemoryLeaseStore, RemoteError, RemoteLeaseStore, RemoteResult, SnapshotStream,
};
use roster_lease::{Lease, LeaseClaim, LeaseKey};
use tokio::time::Instant;

/// Kind of remote call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoreOpKind {
    /// Single record read.
    Get,
    /// Create-or-replace write.
    Put,
    /// Single record delete.
    Delete,
    /// Collection listing (sweeps list through this too).
    List,
    /// Atomic batch delete.
    DeleteBatch,
    /// Snapshot subscription.
    Subscribe,
}

/// Record of a remote call for test assertions.
#[derive(Debug, Clone)]
pub struct StoreOp {
    /// What was called.
    pub kind: StoreOpKind,
    /// Target collection.
    pub collection_id: String,
    /// Target entry, for single-record calls.
    pub entry_id: Option<String>,
    /// Tokio time at which the call started (pausable in tests).
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Faults {
    scripted: HashMap<StoreOpKind, VecDeque<RemoteError>>,
    persistent: HashMap<StoreOpKind, RemoteError>,
}

/// In-memory remote store that records calls and fails on demand.
///
/// Scripted failures are consumed one per call, before any persistent failure
/// configured for the same kind. A failing call never reaches the wrapped
/// store.
#[derive(Debug, Clone)]
pub struct FlakyLeaseStore {
    inner: Arc<MemoryLeaseStore>,
    operations: Arc<Mutex<Vec<StoreOp>>>,
    faults: Arc<Mutex<Faults>>,
    latency: Arc<Mutex<Option<Duration>>>,
}

impl FlakyLeaseStore {
    /// Creates an empty store stamping leases with `clock`.
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self::wrapping(Arc::new(MemoryLeaseStore::with_clock(clock)))
    }

    /// Wraps an existing store.
    #[must_use]
    pub fn wrapping(inner: Arc<MemoryLeaseStore>) -> Self {
        Self {
            inner,
            operations: Arc::default(),
            faults: Arc::default(),
            latency: Arc::default(),
        }
    }

    /// Returns the wrapped store for direct seeding and inspection.
    #[must_use]
    pub fn inner(&self) -> &Arc<MemoryLeaseStore> {
        &self.inner
    }

    /// Fails the next call of `kind` with `error`.
    pub fn fail_next(&self, kind: StoreOpKind, error: RemoteError) {
        self.fail_next_n(kind, 1, error);
    }

    /// Fails the next `count` calls of `kind` with `error`.
    pub fn fail_next_n(&self, kind: StoreOpKind, count: usize, error: RemoteError) {
        let mut faults = self.faults.lock().expect("lock");
        let queue = faults.scripted.entry(kind).or_default();
        queue.extend(std::iter::repeat_n(error, count));
    }

    /// Fails every call of `kind` with `error` until cleared.
    pub fn fail_always(&self, kind: StoreOpKind, error: RemoteError) {
        self.faults
            .lock()
            .expect("lock")
            .persistent
            .insert(kind, error);
    }

    /// Clears all injected failures.
    pub fn clear_failures(&self) {
        *self.faults.lock().expect("lock") = Faults::default();
    }

    /// Delays every async call by `latency` (tokio time).
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().expect("lock") = latency;
    }

    /// Returns all recorded operations.
    #[must_use]
    pub fn operations(&self) -> Vec<StoreOp> {
        self.operations.lock().expect("lock").clone()
    }

    /// Returns the recorded operations of one kind.
    #[must_use]
    pub fn operations_of(&self, kind: StoreOpKind) -> Vec<StoreOp> {
        self.operations()
            .into_iter()
            .filter(|op| op.kind == kind)
            .collect()
    }

    /// Counts recorded operations of one kind.
    #[must_use]
    pub fn count(&self, kind: StoreOpKind) -> usize {
        self.operations_of(kind).len()
    }

    /// Clears recorded operations.
    pub fn clear_operations(&self) {
        self.operations.lock().expect("lock").clear();
    }

    /// Seeds a record directly, bypassing recording and failures.
    pub fn seed(&self, collection_id: &str, lease: &Lease) {
        self.inner.insert_raw(collection_id, lease).expect("seed lease");
    }

    fn record(&self, kind: StoreOpKind, collection_id: &str, entry_id: Option<&str>) {
        self.operations.lock().expect("lock").push(StoreOp {
            kind,
            collection_id: collection_id.to_string(),
            entry_id: entry_id.map(str::to_string),
            at: Instant::now(),
        });
    }

    fn check_failure(&self, kind: StoreOpKind) -> RemoteResult<()> {
        let mut faults = self.faults.lock().expect("lock");
        if let Some(error) = faults.scripted.get_mut(&kind).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        match faults.persistent.get(&kind) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn enter(
        &self,
        kind: StoreOpKind,
        collection_id: &str,
        entry_id: Option<&str>,
    ) -> RemoteResult<()> {
        self.record(kind, collection_id, entry_id);
        let latency = *self.latency.lock().expect("lock");
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.check_failure(kind)
    }
}

#[async_trait::async_trait]
impl RemoteLeaseStore for FlakyLeaseStore {
    async fn get(&self, key: &LeaseKey) -> RemoteResult<Option<Lease>> {
        self.enter(StoreOpKind::Get, &key.collection_id, Some(&key.entry_id))
            .await?;
        self.inner.get(key).await
    }

    async fn put(&self, collection_id: &str, claim: LeaseClaim) -> RemoteResult<Lease> {
        self.enter(StoreOpKind::Put, collection_id, Some(&claim.entry_id))
            .await?;
        self.inner.put(collection_id, claim).await
    }

    async fn delete(&self, key: &LeaseKey) -> RemoteResult<()> {
        self.enter(StoreOpKind::Delete, &key.collection_id, Some(&key.entry_id))
            .await?;
        self.inner.delete(key).await
    }

    async fn list(&self, collection_id: &str) -> RemoteResult<Vec<Lease>> {
        self.enter(StoreOpKind::List, collection_id, None).await?;
        self.inner.list(collection_id).await
    }

    async fn list_acquired_before(
        &self,
        collection_id: &str,
        cutoff: DateTime<Utc>,
    ) -> RemoteResult<Vec<Lease>> {
        self.enter(StoreOpKind::List, collection_id, None).await?;
        self.inner.list_acquired_before(collection_id, cutoff).await
    }

    async fn delete_batch(&self, collection_id: &str, entry_ids: &[String]) -> RemoteResult<()> {
        self.enter(StoreOpKind::DeleteBatch, collection_id, None)
            .await?;
        self.inner.delete_batch(collection_id, entry_ids).await
    }

    fn subscribe(&self, collection_id: &str) -> RemoteResult<SnapshotStream> {
        self.record(StoreOpKind::Subscribe, collection_id, None);
        self.check_failure(StoreOpKind::Subscribe)?;
        self.inner.subscribe(collection_id)
    }
}
