//! Pre-built test fixtures for common lease scenarios.
//!
//! Provides factory functions to create editors, leases and fully wired
//! coordinators with sensible defaults.

use std::sync::Arc;
use std::time::Duration;

use roster_lease::clock::{Clock, ManualClock};
use roster_lease::config::LeaseConfig;
use roster_lease::local::MemoryLocalLeaseStore;
use roster_lease::{EditorIdentity, Lease, LeaseCoordinator};

use crate::storage::FlakyLeaseStore;

/// Collection used by tests that need only one.
pub const ROSTER: &str = "roster-1";

/// Editor "Ana".
#[must_use]
pub fn ana() -> EditorIdentity {
    EditorIdentity::new("editor-ana", "Ana")
}

/// Editor "Ben".
#[must_use]
pub fn ben() -> EditorIdentity {
    EditorIdentity::new("editor-ben", "Ben")
}

/// Editor with a generated id and display name.
#[must_use]
pub fn editor(n: usize) -> EditorIdentity {
    EditorIdentity::new(format!("editor-{n}"), format!("Editor {n}"))
}

/// Builds a lease for `editor` on `entry_id` written `age` before `now`.
#[must_use]
pub fn aged_lease(
    entry_id: &str,
    editor: &EditorIdentity,
    now: chrono::DateTime<chrono::Utc>,
    age: Duration,
) -> Lease {
    let age = chrono::Duration::from_std(age).expect("age in range");
    Lease {
        entry_id: entry_id.to_string(),
        editor_id: editor.editor_id.clone(),
        editor_name: editor.editor_name.clone(),
        acquired_at: now - age,
    }
}

/// Coordinator wired to a manual clock, a flaky remote store and an
/// in-memory offline store.
pub struct LeaseHarness {
    /// Clock shared by the remote store and every coordinator.
    pub clock: ManualClock,
    /// Shared remote store.
    pub remote: Arc<FlakyLeaseStore>,
    /// Offline store of [`LeaseHarness::coordinator`].
    pub local: Arc<MemoryLocalLeaseStore>,
    /// Coordinator under test.
    pub coordinator: LeaseCoordinator,
    config: LeaseConfig,
}

impl LeaseHarness {
    /// Creates an online harness with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LeaseConfig::default(), true)
    }

    /// Creates an offline harness with the default configuration.
    #[must_use]
    pub fn offline() -> Self {
        Self::with_config(LeaseConfig::default(), false)
    }

    /// Creates a harness with a specific configuration and connectivity.
    #[must_use]
    pub fn with_config(config: LeaseConfig, online: bool) -> Self {
        let clock = ManualClock::default();
        let remote = Arc::new(FlakyLeaseStore::new(Arc::new(clock.clone())));
        let local = Arc::new(MemoryLocalLeaseStore::new(online));
        let coordinator = LeaseCoordinator::new(
            remote.clone(),
            local.clone(),
            Arc::new(clock.clone()),
            config.clone(),
        )
        .expect("valid config");
        Self {
            clock,
            remote,
            local,
            coordinator,
            config,
        }
    }

    /// Creates a coordinator for another device: same remote store and
    /// clock, its own (online) offline store.
    #[must_use]
    pub fn device(&self) -> LeaseCoordinator {
        LeaseCoordinator::new(
            self.remote.clone(),
            Arc::new(MemoryLocalLeaseStore::new(true)),
            Arc::new(self.clock.clone()),
            self.config.clone(),
        )
        .expect("valid config")
    }

    /// Seeds a lease written `age` ago.
    pub fn seed_lease(&self, collection_id: &str, entry_id: &str, editor: &EditorIdentity, age: Duration) {
        let lease = aged_lease(entry_id, editor, self.clock.now(), age);
        self.remote.seed(collection_id, &lease);
    }

    /// Advances the lease clock.
    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }
}

impl Default for LeaseHarness {
    fn default() -> Self {
        Self::new()
    }
}
