//! # roster-lease
//!
//! Cooperative edit locks for shared roster entries stored in an eventually
//! consistent document store.
//!
//! While one editor modifies an entry, other editors see who holds it and
//! cannot start a conflicting edit. Locks are time-bounded leases so a crashed
//! device never blocks an entry for longer than the lease duration.
//!
//! - **Coordinator**: acquire, release, query and force-release with retry,
//!   deadlines and fail-open on permission errors
//! - **Watches**: shared per-collection subscriptions fanned out to many
//!   callbacks
//! - **Sweeper**: atomic batch deletion of stale leases
//! - **Offline mode**: every operation falls back to a device-local store
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use roster_lease::prelude::*;
//!
//! # async fn demo() -> roster_lease::Result<()> {
//! let coordinator = LeaseCoordinator::new(
//!     Arc::new(MemoryLeaseStore::new()),
//!     Arc::new(MemoryLocalLeaseStore::default()),
//!     Arc::new(SystemClock),
//!     LeaseConfig::from_env()?,
//! )?;
//!
//! let watch = coordinator.watch("roster-1", |leases| {
//!     for (entry_id, editor_name) in leases {
//!         println!("{entry_id} is being edited by {editor_name}");
//!     }
//! });
//!
//! let me = EditorIdentity::anonymous("Ana");
//! coordinator.acquire("roster-1", "7", &me).await.into_result()?;
//! coordinator.release("roster-1", "7", &me.editor_id).await;
//! watch.cancel();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

pub mod classify;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod lease;
pub mod local;
pub mod metrics;
pub mod observability;
pub mod remote;
pub mod sweeper;
pub mod watch;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use roster_lease::prelude::*;
/// ```
pub mod prelude {
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::config::LeaseConfig;
    pub use crate::coordinator::{AcquireOutcome, LeaseCoordinator, LockStatus, ReleaseOutcome};
    pub use crate::error::{LeaseError, Result};
    pub use crate::lease::{EditorIdentity, Lease, LeaseKey, LeaseSnapshot, LockState};
    pub use crate::local::{LocalLeaseStore, LocalStoreEvent, MemoryLocalLeaseStore};
    pub use crate::remote::{MemoryLeaseStore, RemoteError, RemoteErrorCode, RemoteLeaseStore};
    pub use crate::sweeper::SweeperHandle;
    pub use crate::watch::WatchHandle;
}

pub use classify::{FailureClass, classify};
pub use coordinator::{AcquireOutcome, LeaseCoordinator, LockStatus, ReleaseOutcome};
pub use error::{LeaseError, Result};
pub use lease::{EditorIdentity, Lease, LeaseClaim, LeaseKey, LeaseSnapshot, LockState};
pub use sweeper::SweeperHandle;
pub use watch::{WatchCallback, WatchHandle};
