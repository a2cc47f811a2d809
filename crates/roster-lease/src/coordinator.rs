//! Lease coordinator: acquire, release, query and force-release.
//!
//! The coordinator layers cooperative edit locks over a remote document store
//! that has no locking primitive. It uses:
//! - **Check-then-write**: read the current lease, then create-or-replace it
//!   when absent, expired or already ours
//! - **Server timestamps**: lease age is measured from a store-assigned
//!   `acquired_at`, never from a device clock
//! - **Classified failures**: permission failures fail open, transient
//!   network failures retry with linear backoff, everything else surfaces
//! - **Deadlines**: every operation is bounded so a stalled network cannot
//!   block the caller; a late answer is discarded
//!
//! While the device is offline every operation is served by the
//! [`LocalLeaseStore`] instead and always succeeds. No cross-device exclusion
//! exists in that mode.
//!
//! # Acquisition race
//!
//! Reading and writing are two separate calls, so two devices that both see
//! "no lease" will both write and both believe they hold it until their next
//! read. The last writer's record is the one other devices observe.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use roster_lease::prelude::*;
//!
//! # async fn demo() -> roster_lease::Result<()> {
//! let coordinator = LeaseCoordinator::new(
//!     Arc::new(MemoryLeaseStore::new()),
//!     Arc::new(MemoryLocalLeaseStore::new(true)),
//!     Arc::new(SystemClock),
//!     LeaseConfig::default(),
//! )?;
//!
//! let me = EditorIdentity::new("editor-1", "Ana");
//! match coordinator.acquire("roster-1", "7", &me).await {
//!     AcquireOutcome::Granted => { /* edit, then release */ }
//!     AcquireOutcome::Denied { holder_name } => println!("being edited by {holder_name}"),
//!     AcquireOutcome::Failed(error) => println!("try again: {error}"),
//! }
//! coordinator.release("roster-1", "7", &me.editor_id).await;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::classify::{FailureClass, classify};
use crate::clock::Clock;
use crate::config::LeaseConfig;
use crate::error::{LeaseError, Result};
use crate::lease::{EditorIdentity, Lease, LeaseClaim, LeaseKey, LockState};
use crate::local::{LocalLeaseStore, LocalStoreEvent};
use crate::metrics::{self, OperationTimer};
use crate::observability::lease_span;
use crate::remote::{RemoteError, RemoteErrorCode, RemoteLeaseStore, RemoteResult};
use crate::watch::WatchRegistry;

/// Result of an acquire attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The caller now holds the lease (or locking is failing open).
    Granted,
    /// Another editor holds a live lease.
    Denied {
        /// Display name of the current holder.
        holder_name: String,
    },
    /// The outcome is unknown; treat as not granted.
    Failed(LeaseError),
}

impl AcquireOutcome {
    /// Returns true if the lease was granted.
    #[must_use]
    pub const fn is_granted(&self) -> bool {
        matches!(self, Self::Granted)
    }

    /// Returns true when offering "try again" makes sense.
    ///
    /// Denials are legitimate conflicts and are never retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    /// Converts the outcome into a `Result`, mapping a denial to
    /// [`LeaseError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns an error unless the lease was granted.
    pub fn into_result(self) -> Result<()> {
        match self {
            Self::Granted => Ok(()),
            Self::Denied { holder_name } => Err(LeaseError::Conflict { holder_name }),
            Self::Failed(error) => Err(error),
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Granted => "granted",
            Self::Denied { .. } => "denied",
            Self::Failed(_) => "failed",
        }
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// The lease is gone (or was never there).
    Released,
    /// The lease belongs to someone else and was left untouched.
    Denied {
        /// Display name of the current holder.
        holder_name: String,
    },
    /// The outcome is unknown.
    Failed(LeaseError),
}

impl ReleaseOutcome {
    /// Returns true if the lease is known to be released.
    #[must_use]
    pub const fn is_released(&self) -> bool {
        matches!(self, Self::Released)
    }

    /// Returns true when offering "try again" makes sense.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Failed(_))
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Released => "released",
            Self::Denied { .. } => "denied",
            Self::Failed(_) => "failed",
        }
    }
}

/// Answer to a lock query.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LockStatus {
    /// Whether a live lease exists.
    pub held: bool,
    /// Display name of the holder when held.
    pub holder_name: Option<String>,
}

impl LockStatus {
    /// Not held.
    #[must_use]
    pub const fn unlocked() -> Self {
        Self {
            held: false,
            holder_name: None,
        }
    }

    /// Held by `holder_name`.
    #[must_use]
    pub fn held_by(holder_name: impl Into<String>) -> Self {
        Self {
            held: true,
            holder_name: Some(holder_name.into()),
        }
    }
}

/// A remote failure that exhausted its retry budget or was not retryable.
struct Exhausted {
    error: RemoteError,
    class: FailureClass,
    attempts: u32,
}

impl Exhausted {
    fn into_error(self) -> LeaseError {
        self.class.into_error(&self.error, self.attempts)
    }
}

pub(crate) struct Inner {
    pub(crate) remote: Arc<dyn RemoteLeaseStore>,
    pub(crate) local: Arc<dyn LocalLeaseStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) config: LeaseConfig,
    pub(crate) watches: Arc<WatchRegistry>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        let listener = self
            .listener
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = listener.take() {
            task.abort();
        }
    }
}

/// Lease coordinator service.
///
/// Cheap to clone; clones share stores, configuration and the watch registry.
#[derive(Clone)]
pub struct LeaseCoordinator {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for LeaseCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseCoordinator")
            .field("config", &self.inner.config)
            .field("clock", &self.inner.clock)
            .finish_non_exhaustive()
    }
}

impl LeaseCoordinator {
    /// Creates a coordinator over the given stores.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidInput`] if the configuration is invalid.
    pub fn new(
        remote: Arc<dyn RemoteLeaseStore>,
        local: Arc<dyn LocalLeaseStore>,
        clock: Arc<dyn Clock>,
        config: LeaseConfig,
    ) -> Result<Self> {
        config.validate()?;
        tracing::info!(
            lease_duration_secs = config.lease_duration_secs,
            max_acquire_attempts = config.max_acquire_attempts,
            max_release_attempts = config.max_release_attempts,
            "lease coordinator configured"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                remote,
                local,
                clock,
                config,
                watches: Arc::new(WatchRegistry::default()),
                listener: Mutex::new(None),
            }),
        })
    }

    pub(crate) fn from_weak(inner: &Weak<Inner>) -> Option<Self> {
        inner.upgrade().map(|inner| Self { inner })
    }

    /// Returns the active configuration.
    #[must_use]
    pub fn config(&self) -> &LeaseConfig {
        &self.inner.config
    }

    /// Returns whether operations currently go to the remote store.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.inner.local.is_online()
    }

    /// Acquires (or renews) the lease on an entry.
    ///
    /// Re-acquiring a lease the editor already holds refreshes its timestamp.
    #[tracing::instrument(skip(self, editor), fields(editor = %editor.editor_id))]
    pub async fn acquire(
        &self,
        collection_id: &str,
        entry_id: &str,
        editor: &EditorIdentity,
    ) -> AcquireOutcome {
        let _timer = OperationTimer::start("acquire");

        if !self.is_online() {
            self.inner
                .local
                .add_local_lease(collection_id, entry_id, &editor.editor_name);
            tracing::debug!("offline; lease recorded locally");
            metrics::record_acquire("granted");
            return AcquireOutcome::Granted;
        }

        let key = LeaseKey::new(collection_id, entry_id);
        let deadline = self.inner.config.acquire_timeout();
        let outcome = match tokio::time::timeout(deadline, self.acquire_online(&key, editor))
            .await
        {
            Ok(outcome) => outcome,
            Err(_) => {
                tracing::warn!(deadline_ms = deadline.as_millis(), "acquire timed out");
                metrics::record_timeout("acquire");
                AcquireOutcome::Failed(LeaseError::timeout("acquire", deadline))
            }
        };
        metrics::record_acquire(outcome.label());
        outcome
    }

    async fn acquire_online(&self, key: &LeaseKey, editor: &EditorIdentity) -> AcquireOutcome {
        let attempts = self.inner.config.max_acquire_attempts;
        match self
            .retrying("acquire", attempts, || self.try_acquire(key, editor))
            .await
        {
            Ok(outcome) => outcome,
            Err(failure) if failure.class == FailureClass::Permission => {
                tracing::warn!(
                    error = %failure.error,
                    "lease rules rejected acquire; locking disabled, granting"
                );
                metrics::record_fail_open("acquire");
                AcquireOutcome::Granted
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure.error,
                    class = failure.class.as_str(),
                    attempts = failure.attempts,
                    "acquire failed"
                );
                AcquireOutcome::Failed(failure.into_error())
            }
        }
    }

    /// One read-then-write pass.
    async fn try_acquire(
        &self,
        key: &LeaseKey,
        editor: &EditorIdentity,
    ) -> RemoteResult<AcquireOutcome> {
        if let Some(existing) = self.inner.remote.get(key).await? {
            let expired =
                existing.is_expired(self.inner.clock.now(), self.inner.config.lease_duration());
            if !expired && !existing.is_held_by(&editor.editor_id) {
                tracing::debug!(holder = %existing.editor_name, "entry held by another editor");
                return Ok(AcquireOutcome::Denied {
                    holder_name: existing.editor_name,
                });
            }
            if expired && !existing.is_held_by(&editor.editor_id) {
                tracing::debug!(previous_holder = %existing.editor_name, "taking over expired lease");
            }
        }

        let lease = self
            .inner
            .remote
            .put(&key.collection_id, LeaseClaim::new(&key.entry_id, editor))
            .await?;
        tracing::debug!(acquired_at = %lease.acquired_at, "lease written");
        Ok(AcquireOutcome::Granted)
    }

    /// Releases a lease the caller holds.
    ///
    /// Releasing an absent lease succeeds; releasing someone else's is denied
    /// and leaves their record untouched.
    #[tracing::instrument(skip(self))]
    pub async fn release(&self, collection_id: &str, entry_id: &str, editor_id: &str) -> ReleaseOutcome {
        let _timer = OperationTimer::start("release");

        if !self.is_online() {
            self.inner.local.remove_local_lease(collection_id, entry_id);
            tracing::debug!("offline; local lease removed");
            metrics::record_release("released");
            return ReleaseOutcome::Released;
        }

        let key = LeaseKey::new(collection_id, entry_id);
        let deadline = self.inner.config.release_timeout();
        let outcome =
            match tokio::time::timeout(deadline, self.release_online(&key, editor_id)).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    tracing::warn!(deadline_ms = deadline.as_millis(), "release timed out");
                    metrics::record_timeout("release");
                    ReleaseOutcome::Failed(LeaseError::timeout("release", deadline))
                }
            };
        metrics::record_release(outcome.label());
        outcome
    }

    async fn release_online(&self, key: &LeaseKey, editor_id: &str) -> ReleaseOutcome {
        let attempts = self.inner.config.max_release_attempts;
        match self
            .retrying("release", attempts, || self.try_release(key, editor_id))
            .await
        {
            Ok(outcome) => outcome,
            Err(failure) if failure.class == FailureClass::Permission => {
                tracing::warn!(
                    error = %failure.error,
                    "lease rules rejected release; locking disabled, treating as released"
                );
                metrics::record_fail_open("release");
                ReleaseOutcome::Released
            }
            Err(failure) => {
                tracing::warn!(
                    error = %failure.error,
                    class = failure.class.as_str(),
                    attempts = failure.attempts,
                    "release failed"
                );
                ReleaseOutcome::Failed(failure.into_error())
            }
        }
    }

    async fn try_release(&self, key: &LeaseKey, editor_id: &str) -> RemoteResult<ReleaseOutcome> {
        match self.inner.remote.get(key).await? {
            None => Ok(ReleaseOutcome::Released),
            Some(lease) if !lease.is_held_by(editor_id) => {
                tracing::debug!(holder = %lease.editor_name, "refusing to release another editor's lease");
                Ok(ReleaseOutcome::Denied {
                    holder_name: lease.editor_name,
                })
            }
            Some(_) => {
                absent_is_ok(self.inner.remote.delete(key).await)?;
                Ok(ReleaseOutcome::Released)
            }
        }
    }

    /// Reports whether an entry is locked.
    ///
    /// Permission failures, transport failures and the query deadline all
    /// report "not held": a false "locked" blocks legitimate work more often
    /// than a false "free" causes a collision. An expired lease found here is
    /// deleted in the background.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Unclassified`] for failures that are neither
    /// permission nor transport problems.
    #[tracing::instrument(skip(self))]
    pub async fn query(&self, collection_id: &str, entry_id: &str) -> Result<LockStatus> {
        let _timer = OperationTimer::start("query");

        if !self.is_online() {
            let status = self
                .inner
                .local
                .local_leases(collection_id)
                .remove(entry_id)
                .map_or_else(LockStatus::unlocked, LockStatus::held_by);
            metrics::record_query(status.held);
            return Ok(status);
        }

        let key = LeaseKey::new(collection_id, entry_id);
        let deadline = self.inner.config.query_timeout();
        let lease = match tokio::time::timeout(deadline, self.read_fail_open("query", &key))
            .await
        {
            Ok(lease) => lease?,
            Err(_) => {
                tracing::warn!(deadline_ms = deadline.as_millis(), "query timed out; reporting unlocked");
                metrics::record_timeout("query");
                None
            }
        };

        let status = match lease {
            None => LockStatus::unlocked(),
            Some(lease)
                if lease.is_expired(self.inner.clock.now(), self.inner.config.lease_duration()) =>
            {
                self.delete_expired_in_background(key, lease);
                LockStatus::unlocked()
            }
            Some(lease) => LockStatus::held_by(lease.editor_name),
        };
        metrics::record_query(status.held);
        Ok(status)
    }

    /// Returns the lock state of an entry from `editor`'s point of view.
    ///
    /// Follows the same fail-open rules as [`LeaseCoordinator::query`]. Offline,
    /// local leases carry only a display name, so ownership is decided by name.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::Unclassified`] for unclassified remote failures.
    pub async fn lock_state(
        &self,
        collection_id: &str,
        entry_id: &str,
        editor: &EditorIdentity,
    ) -> Result<LockState> {
        if !self.is_online() {
            let state = match self.inner.local.local_leases(collection_id).remove(entry_id) {
                None => LockState::Unlocked,
                Some(name) if name == editor.editor_name => LockState::HeldBySelf,
                Some(editor_name) => LockState::HeldByOther { editor_name },
            };
            return Ok(state);
        }

        let key = LeaseKey::new(collection_id, entry_id);
        let deadline = self.inner.config.query_timeout();
        let lease = tokio::time::timeout(deadline, self.read_fail_open("lock_state", &key))
            .await
            .unwrap_or(Ok(None))?;
        Ok(LockState::evaluate(
            lease.as_ref(),
            &editor.editor_id,
            self.inner.clock.now(),
            self.inner.config.lease_duration(),
        ))
    }

    /// Deletes a lease regardless of holder.
    ///
    /// Intended for administrative recovery. A single attempt is made and
    /// every failure, permission failures included, is returned.
    ///
    /// # Errors
    ///
    /// Returns the classified remote failure, or [`LeaseError::Timeout`] if
    /// the release deadline fires first.
    #[tracing::instrument(skip(self))]
    pub async fn force_release(&self, collection_id: &str, entry_id: &str) -> Result<()> {
        let _timer = OperationTimer::start("force_release");

        if !self.is_online() {
            self.inner.local.remove_local_lease(collection_id, entry_id);
            return Ok(());
        }

        let key = LeaseKey::new(collection_id, entry_id);
        let deadline = self.inner.config.release_timeout();
        let result = tokio::time::timeout(deadline, self.inner.remote.delete(&key))
            .await
            .map_err(|_| {
                metrics::record_timeout("force_release");
                LeaseError::timeout("force_release", deadline)
            })?;
        absent_is_ok(result).map_err(|error| {
            let class = classify(&error);
            tracing::warn!(error = %error, class = class.as_str(), "force release failed");
            class.into_error(&error, 1)
        })?;
        tracing::info!("lease force-released");
        Ok(())
    }

    /// Starts the task that reacts to connectivity and local lease events,
    /// unless it is already running.
    ///
    /// [`LeaseCoordinator::watch`] calls this, so watchers follow connectivity
    /// changes without further setup. The task stops when the last clone of
    /// the coordinator is dropped. Returns `false` outside a Tokio runtime,
    /// where no listener can run.
    pub fn start_event_listener(&self) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!("no async runtime; local store event listener not started");
            return false;
        };
        let mut listener = self
            .inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if listener.as_ref().is_some_and(|task| !task.is_finished()) {
            return true;
        }

        let mut events = self.inner.local.subscribe_events();
        let inner = Arc::downgrade(&self.inner);
        *listener = Some(runtime.spawn(async move {
            loop {
                let event = match events.recv().await {
                    Ok(event) => Some(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "missed local store events; resynchronising");
                        None
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };
                let Some(coordinator) = Self::from_weak(&inner) else {
                    break;
                };
                match event {
                    Some(event) => coordinator.handle_event(&event),
                    None => coordinator.reconcile_connectivity(),
                }
            }
            tracing::debug!("local store event listener stopped");
        }));
        tracing::debug!("local store event listener started");
        true
    }

    /// Returns whether the event listener task is running.
    #[must_use]
    pub fn has_event_listener(&self) -> bool {
        self.inner
            .listener
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Applies one local store event.
    pub fn handle_event(&self, event: &LocalStoreEvent) {
        match event {
            LocalStoreEvent::ConnectivityChanged { online } => {
                tracing::info!(online, "connectivity changed");
                self.reconcile_connectivity();
            }
            LocalStoreEvent::LocalLeasesChanged { collection_id } => {
                if !self.is_online() {
                    self.fan_out_local(collection_id);
                }
            }
        }
    }

    /// Re-evaluates online/offline mode for every watched collection.
    ///
    /// Online, each watched collection gets a remote subscription. Offline,
    /// remote subscriptions are dropped and watchers receive local snapshots.
    pub fn reconcile_connectivity(&self) {
        let collections = self.inner.watches.collections();
        if self.is_online() {
            for collection_id in &collections {
                self.ensure_subscription(collection_id);
            }
        } else {
            self.inner.watches.cancel_subscriptions();
            for collection_id in &collections {
                self.fan_out_local(collection_id);
            }
        }
    }

    /// Runs `call` until it succeeds, fails non-transiently, or exhausts
    /// `max_attempts`. Attempt `n` is followed by a `n * backoff_step` pause.
    async fn retrying<T, F, Fut>(
        &self,
        operation: &'static str,
        max_attempts: u32,
        mut call: F,
    ) -> std::result::Result<T, Exhausted>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = RemoteResult<T>>,
    {
        let mut attempt = 1;
        loop {
            let error = match call().await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };
            let class = classify(&error);
            if class != FailureClass::Network || attempt >= max_attempts {
                return Err(Exhausted {
                    error,
                    class,
                    attempts: attempt,
                });
            }

            let delay = self.backoff(attempt);
            tracing::debug!(
                attempt,
                delay_ms = delay.as_millis(),
                error = %error,
                "transient failure; backing off"
            );
            metrics::record_retry(operation);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.inner.config.backoff_step().saturating_mul(attempt)
    }

    /// Single read where permission and transport failures read as "absent".
    async fn read_fail_open(&self, operation: &'static str, key: &LeaseKey) -> Result<Option<Lease>> {
        match self.inner.remote.get(key).await {
            Ok(lease) => Ok(lease),
            Err(error) => match classify(&error) {
                FailureClass::Permission => {
                    tracing::warn!(error = %error, "lease rules rejected read; reporting unlocked");
                    metrics::record_fail_open(operation);
                    Ok(None)
                }
                FailureClass::Network => {
                    tracing::warn!(error = %error, "lease read failed; reporting unlocked");
                    Ok(None)
                }
                FailureClass::Other => Err(FailureClass::Other.into_error(&error, 1)),
            },
        }
    }

    /// Best-effort cleanup of an expired lease seen by a query.
    ///
    /// The record is re-read first and only deleted if it is still the same
    /// expired lease, which narrows (but cannot close) the window in which a
    /// fresh acquisition could be removed.
    fn delete_expired_in_background(&self, key: LeaseKey, expired: Lease) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let remote = Arc::clone(&self.inner.remote);
        let span = lease_span("expired_cleanup", &key.collection_id, &key.entry_id);
        runtime.spawn(
            async move {
                match remote.get(&key).await {
                    Ok(Some(current)) if current == expired => {
                        if let Err(error) = remote.delete(&key).await {
                            tracing::debug!(error = %error, "expired lease cleanup failed");
                        } else {
                            tracing::debug!("expired lease removed");
                        }
                    }
                    Ok(_) => {}
                    Err(error) => tracing::debug!(error = %error, "expired lease cleanup read failed"),
                }
            }
            .instrument(span),
        );
    }
}

/// Stores that report deleting an absent record as `NotFound` agree with
/// the idempotent contract once this is applied.
fn absent_is_ok(result: RemoteResult<()>) -> RemoteResult<()> {
    match result {
        Err(error) if error.code == RemoteErrorCode::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::local::MemoryLocalLeaseStore;
    use crate::remote::MemoryLeaseStore;

    struct Fixture {
        clock: ManualClock,
        remote: Arc<MemoryLeaseStore>,
        local: Arc<MemoryLocalLeaseStore>,
        coordinator: LeaseCoordinator,
    }

    fn fixture(online: bool) -> Fixture {
        let clock = ManualClock::default();
        let remote = Arc::new(MemoryLeaseStore::with_clock(Arc::new(clock.clone())));
        let local = Arc::new(MemoryLocalLeaseStore::new(online));
        let coordinator = LeaseCoordinator::new(
            remote.clone(),
            local.clone(),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        )
        .expect("coordinator");
        Fixture {
            clock,
            remote,
            local,
            coordinator,
        }
    }

    fn ana() -> EditorIdentity {
        EditorIdentity::new("editor-a", "Ana")
    }

    fn ben() -> EditorIdentity {
        EditorIdentity::new("editor-b", "Ben")
    }

    #[tokio::test]
    async fn second_editor_is_denied_with_holder_name() {
        let f = fixture(true);

        assert!(f.coordinator.acquire("r", "7", &ana()).await.is_granted());
        assert_eq!(
            f.coordinator.acquire("r", "7", &ben()).await,
            AcquireOutcome::Denied {
                holder_name: "Ana".into()
            }
        );
    }

    #[tokio::test]
    async fn reacquire_by_holder_refreshes_timestamp() {
        let f = fixture(true);
        let key = LeaseKey::new("r", "7");

        f.coordinator.acquire("r", "7", &ana()).await;
        let first = f.remote.get(&key).await.expect("get").expect("lease");

        f.clock.advance(Duration::from_secs(90));
        assert!(f.coordinator.acquire("r", "7", &ana()).await.is_granted());
        let second = f.remote.get(&key).await.expect("get").expect("lease");

        assert_eq!(
            second.acquired_at - first.acquired_at,
            chrono::Duration::seconds(90)
        );
    }

    #[tokio::test]
    async fn expired_lease_can_be_taken_over() {
        let f = fixture(true);

        f.coordinator.acquire("r", "7", &ana()).await;
        f.clock.advance(Duration::from_secs(121));

        assert!(f.coordinator.acquire("r", "7", &ben()).await.is_granted());
        let lease = f
            .remote
            .get(&LeaseKey::new("r", "7"))
            .await
            .expect("get")
            .expect("lease");
        assert_eq!(lease.editor_id, "editor-b");
    }

    #[tokio::test]
    async fn release_rules() {
        let f = fixture(true);

        assert_eq!(
            f.coordinator.release("r", "missing", "editor-a").await,
            ReleaseOutcome::Released
        );

        f.coordinator.acquire("r", "7", &ana()).await;
        assert_eq!(
            f.coordinator.release("r", "7", "editor-b").await,
            ReleaseOutcome::Denied {
                holder_name: "Ana".into()
            }
        );
        assert_eq!(f.remote.len("r"), 1);

        assert!(f.coordinator.release("r", "7", "editor-a").await.is_released());
        assert!(f.remote.is_empty("r"));
    }

    #[tokio::test]
    async fn query_reports_holder_and_expiry() {
        let f = fixture(true);

        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::unlocked()
        );

        f.coordinator.acquire("r", "7", &ana()).await;
        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::held_by("Ana")
        );

        f.clock.advance(Duration::from_secs(121));
        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::unlocked()
        );
        for _ in 0..10 {
            if f.remote.is_empty("r") {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(f.remote.is_empty("r"), "expired lease deleted in the background");
    }

    #[tokio::test]
    async fn expired_cleanup_spares_a_renewed_lease() {
        let f = fixture(true);
        f.coordinator.acquire("r", "7", &ana()).await;
        f.clock.advance(Duration::from_secs(121));

        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::unlocked()
        );
        // Renewed before the background cleanup gets to run.
        assert!(f.coordinator.acquire("r", "7", &ana()).await.is_granted());
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::held_by("Ana")
        );
    }

    #[tokio::test]
    async fn force_release_ignores_ownership() {
        let f = fixture(true);

        f.coordinator.acquire("r", "7", &ana()).await;
        f.coordinator.force_release("r", "7").await.expect("force");
        assert!(f.remote.is_empty("r"));

        f.coordinator
            .force_release("r", "absent")
            .await
            .expect("absent is fine");
    }

    #[tokio::test]
    async fn lock_state_from_each_perspective() {
        let f = fixture(true);
        f.coordinator.acquire("r", "7", &ana()).await;

        assert_eq!(
            f.coordinator.lock_state("r", "7", &ana()).await.expect("state"),
            LockState::HeldBySelf
        );
        assert_eq!(
            f.coordinator.lock_state("r", "7", &ben()).await.expect("state"),
            LockState::HeldByOther {
                editor_name: "Ana".into()
            }
        );
        f.clock.advance(Duration::from_secs(121));
        assert_eq!(
            f.coordinator.lock_state("r", "7", &ben()).await.expect("state"),
            LockState::Expired {
                editor_name: "Ana".into()
            }
        );
    }

    #[tokio::test]
    async fn offline_operations_use_local_store_only() {
        let f = fixture(false);

        assert!(f.coordinator.acquire("r", "7", &ana()).await.is_granted());
        assert!(f.coordinator.acquire("r", "7", &ben()).await.is_granted());
        assert!(f.remote.is_empty("r"));
        assert_eq!(
            f.coordinator.query("r", "7").await.expect("query"),
            LockStatus::held_by("Ben")
        );
        assert_eq!(
            f.coordinator.lock_state("r", "7", &ben()).await.expect("state"),
            LockState::HeldBySelf
        );

        assert!(f.coordinator.release("r", "7", "editor-a").await.is_released());
        assert!(f.local.local_leases("r").is_empty());
    }

    #[test]
    fn outcomes_distinguish_failure_from_denial() {
        let denied = AcquireOutcome::Denied {
            holder_name: "Ana".into(),
        };
        assert!(!denied.is_retryable());
        assert_eq!(
            denied.into_result(),
            Err(LeaseError::Conflict {
                holder_name: "Ana".into()
            })
        );

        let failed = AcquireOutcome::Failed(LeaseError::timeout("acquire", Duration::from_secs(10)));
        assert!(failed.is_retryable());
        assert!(
            ReleaseOutcome::Failed(LeaseError::Unclassified {
                message: "x".into()
            })
            .is_retryable()
        );
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = LeaseConfig {
            max_acquire_attempts: 0,
            ..LeaseConfig::default()
        };
        let result = LeaseCoordinator::new(
            Arc::new(MemoryLeaseStore::new()),
            Arc::new(MemoryLocalLeaseStore::new(true)),
            Arc::new(ManualClock::default()),
            config,
        );
        assert!(matches!(result, Err(LeaseError::InvalidInput(_))));
    }
}
