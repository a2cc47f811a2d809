//! Shared test utilities for roster-lease tests.
//!
//! This crate provides:
//! - [`FlakyLeaseStore`]: In-memory remote store with operation recording,
//!   scripted failures and latency
//! - [`LeaseHarness`]: Coordinator wired to a manual clock and both stores
//! - Editor fixtures and custom assertion helpers
//!
//! # Example
//!
//! ```rust,ignore
//! use roster_lease_test_utils::{LeaseHarness, ana, assert_granted};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     let harness = LeaseHarness::new();
//!     assert_granted(&harness.coordinator.acquire("r", "7", &ana()).await);
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod assertions;
pub mod fixtures;
pub mod storage;

pub use assertions::*;
pub use fixtures::*;
pub use storage::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{EnvFilter, fmt};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("roster_lease=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
