//! Stale lease sweeping.
//!
//! Expired leases stop blocking acquisition on their own, but their records
//! linger (a device can crash between acquire and release). Sweeping deletes
//! every record older than a threshold in one atomic batch so a partial sweep
//! is never observable.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::Instrument;

use crate::classify::{FailureClass, classify};
use crate::remote::RemoteError;
use crate::coordinator::LeaseCoordinator;
use crate::error::{LeaseError, Result};
use crate::metrics;
use crate::observability::collection_span;

impl LeaseCoordinator {
    /// Deletes leases of a collection acquired more than `threshold` ago.
    ///
    /// `threshold` defaults to the lease duration. Returns the number of
    /// records deleted; offline sweeps do nothing and return 0.
    ///
    /// # Errors
    ///
    /// Returns [`LeaseError::InvalidInput`] for a threshold that cannot be
    /// subtracted from the current time, or the classified remote failure.
    /// Permission failures are logged and report 0 swept records.
    #[tracing::instrument(skip(self))]
    pub async fn sweep(&self, collection_id: &str, threshold: Option<Duration>) -> Result<usize> {
        if !self.is_online() {
            tracing::debug!("offline; sweep skipped");
            return Ok(0);
        }

        let threshold = threshold.unwrap_or_else(|| self.inner.config.lease_duration());
        let cutoff = chrono::Duration::from_std(threshold)
            .ok()
            .and_then(|threshold| self.inner.clock.now().checked_sub_signed(threshold))
            .ok_or_else(|| {
                LeaseError::InvalidInput(format!("sweep threshold {threshold:?} out of range"))
            })?;

        let remote = &self.inner.remote;
        let stale = match remote.list_acquired_before(collection_id, cutoff).await {
            Ok(stale) => stale,
            Err(error) => return sweep_failed(&error),
        };
        if stale.is_empty() {
            return Ok(0);
        }

        let entry_ids: Vec<String> = stale.into_iter().map(|lease| lease.entry_id).collect();
        if let Err(error) = remote.delete_batch(collection_id, &entry_ids).await {
            return sweep_failed(&error);
        }

        tracing::info!(count = entry_ids.len(), %cutoff, "swept stale leases");
        metrics::record_swept(entry_ids.len());
        Ok(entry_ids.len())
    }

    /// Starts a background task sweeping `collection_id` every
    /// `sweep_interval`, beginning immediately.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    #[must_use = "the sweeper stops when its handle is dropped"]
    pub fn spawn_sweeper(&self, collection_id: impl Into<String>) -> SweeperHandle {
        let collection_id = collection_id.into();
        let interval = self.inner.config.sweep_interval();
        let inner = std::sync::Arc::downgrade(&self.inner);
        let span = collection_span("sweeper", &collection_id);

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(coordinator) = Self::from_weak(&inner) else {
                    break;
                };
                if let Err(error) = coordinator.sweep(&collection_id, None).await {
                    tracing::warn!(collection = %collection_id, error = %error, "sweep failed");
                }
            }
        }
        .instrument(span));
        SweeperHandle { task }
    }
}

/// Maps a failed sweep call; permission failures count as nothing swept.
fn sweep_failed(error: &RemoteError) -> Result<usize> {
    match classify(error) {
        FailureClass::Permission => {
            tracing::warn!(error = %error, "sweep not permitted; skipping");
            metrics::record_fail_open("sweep");
            Ok(0)
        }
        class => Err(class.into_error(error, 1)),
    }
}

/// Handle to a background sweeper. The sweeper stops when the handle is
/// dropped or [`SweeperHandle::stop`] is called.
#[derive(Debug)]
pub struct SweeperHandle {
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper.
    pub fn stop(self) {
        drop(self);
    }

    /// Returns whether the sweeper task is still running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::{DateTime, Utc};

    use crate::clock::{Clock, ManualClock};
    use crate::config::LeaseConfig;
    use crate::lease::Lease;
    use crate::local::MemoryLocalLeaseStore;
    use crate::remote::MemoryLeaseStore;

    fn lease(entry_id: &str, acquired_at: DateTime<Utc>) -> Lease {
        Lease {
            entry_id: entry_id.into(),
            editor_id: format!("editor-{entry_id}"),
            editor_name: format!("Editor {entry_id}"),
            acquired_at,
        }
    }

    #[tokio::test]
    async fn sweep_deletes_only_strictly_older_records() {
        let clock = ManualClock::default();
        let remote = Arc::new(MemoryLeaseStore::with_clock(Arc::new(clock.clone())));
        let coordinator = LeaseCoordinator::new(
            remote.clone(),
            Arc::new(MemoryLocalLeaseStore::new(true)),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        )
        .expect("coordinator");

        let now = clock.now();
        remote
            .insert_raw("r", &lease("edge", now - chrono::Duration::seconds(120)))
            .expect("seed");
        remote
            .insert_raw("r", &lease("old", now - chrono::Duration::seconds(121)))
            .expect("seed");

        assert_eq!(coordinator.sweep("r", None).await.expect("sweep"), 1);
        assert_eq!(remote.len("r"), 1);
        assert_eq!(coordinator.sweep("r", None).await.expect("sweep"), 0);
    }

    #[tokio::test]
    async fn offline_sweep_is_a_noop() {
        let clock = ManualClock::default();
        let remote = Arc::new(MemoryLeaseStore::new());
        let coordinator = LeaseCoordinator::new(
            remote.clone(),
            Arc::new(MemoryLocalLeaseStore::new(false)),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        )
        .expect("coordinator");
        remote
            .insert_raw("r", &lease("old", clock.now() - chrono::Duration::days(1)))
            .expect("seed");

        assert_eq!(coordinator.sweep("r", None).await.expect("sweep"), 0);
        assert_eq!(remote.len("r"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_runs_until_stopped() {
        let clock = ManualClock::default();
        let remote = Arc::new(MemoryLeaseStore::with_clock(Arc::new(clock.clone())));
        let coordinator = LeaseCoordinator::new(
            remote.clone(),
            Arc::new(MemoryLocalLeaseStore::new(true)),
            Arc::new(clock.clone()),
            LeaseConfig::default(),
        )
        .expect("coordinator");

        let handle = coordinator.spawn_sweeper("r");
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(handle.is_running());

        remote
            .insert_raw("r", &lease("old", clock.now() - chrono::Duration::seconds(500)))
            .expect("seed");
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(remote.is_empty("r"));

        handle.stop();
        remote
            .insert_raw("r", &lease("old", clock.now() - chrono::Duration::seconds(500)))
            .expect("seed");
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(remote.len("r"), 1);
    }
}
