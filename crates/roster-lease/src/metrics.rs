//! Lease coordinator metrics.
//!
//! Recorded through the `metrics` facade; with no recorder installed every
//! call is a no-op.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `roster_lease_acquire_total` | Counter | `outcome` |
//! | `roster_lease_release_total` | Counter | `outcome` |
//! | `roster_lease_query_total` | Counter | `held` |
//! | `roster_lease_retries_total` | Counter | `operation` |
//! | `roster_lease_fail_open_total` | Counter | `operation` |
//! | `roster_lease_timeouts_total` | Counter | `operation` |
//! | `roster_lease_swept_total` | Counter | - |
//! | `roster_lease_operation_duration_seconds` | Histogram | `operation` |
//! | `roster_lease_watch_callbacks` | Gauge | - |

use std::time::{Duration, Instant};

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Counter: acquire outcomes.
    pub const ACQUIRE_TOTAL: &str = "roster_lease_acquire_total";
    /// Counter: release outcomes.
    pub const RELEASE_TOTAL: &str = "roster_lease_release_total";
    /// Counter: query results.
    pub const QUERY_TOTAL: &str = "roster_lease_query_total";
    /// Counter: retries after transient failures.
    pub const RETRIES_TOTAL: &str = "roster_lease_retries_total";
    /// Counter: permission failures absorbed as fail-open.
    pub const FAIL_OPEN_TOTAL: &str = "roster_lease_fail_open_total";
    /// Counter: local deadlines that fired.
    pub const TIMEOUTS_TOTAL: &str = "roster_lease_timeouts_total";
    /// Counter: leases deleted by the sweeper.
    pub const SWEPT_TOTAL: &str = "roster_lease_swept_total";
    /// Histogram: end-to-end operation latency.
    pub const OPERATION_DURATION_SECONDS: &str = "roster_lease_operation_duration_seconds";
    /// Gauge: registered watch callbacks across all collections.
    pub const WATCH_CALLBACKS: &str = "roster_lease_watch_callbacks";
}

/// Label keys.
pub mod labels {
    /// Operation outcome.
    pub const OUTCOME: &str = "outcome";
    /// Lease operation name.
    pub const OPERATION: &str = "operation";
    /// Whether a query found the entry held.
    pub const HELD: &str = "held";
}

/// Records an acquire outcome.
pub fn record_acquire(outcome: &'static str) {
    counter!(names::ACQUIRE_TOTAL, labels::OUTCOME => outcome).increment(1);
}

/// Records a release outcome.
pub fn record_release(outcome: &'static str) {
    counter!(names::RELEASE_TOTAL, labels::OUTCOME => outcome).increment(1);
}

/// Records a query result.
pub fn record_query(held: bool) {
    let held = if held { "true" } else { "false" };
    counter!(names::QUERY_TOTAL, labels::HELD => held).increment(1);
}

/// Records a retry.
pub fn record_retry(operation: &'static str) {
    counter!(names::RETRIES_TOTAL, labels::OPERATION => operation).increment(1);
}

/// Records a permission failure absorbed as fail-open.
pub fn record_fail_open(operation: &'static str) {
    counter!(names::FAIL_OPEN_TOTAL, labels::OPERATION => operation).increment(1);
}

/// Records a fired deadline.
pub fn record_timeout(operation: &'static str) {
    counter!(names::TIMEOUTS_TOTAL, labels::OPERATION => operation).increment(1);
}

/// Records swept leases.
pub fn record_swept(count: usize) {
    counter!(names::SWEPT_TOTAL).increment(u64::try_from(count).unwrap_or(u64::MAX));
}

/// Sets the number of registered watch callbacks.
///
/// One series in total: collection ids are unbounded and stay out of labels.
#[allow(clippy::cast_precision_loss)]
pub fn set_watch_callbacks(count: usize) {
    gauge!(names::WATCH_CALLBACKS).set(count as f64);
}

/// Measures one lease operation; records on drop.
#[derive(Debug)]
pub struct OperationTimer {
    operation: &'static str,
    start: Instant,
}

impl OperationTimer {
    /// Starts timing `operation`.
    #[must_use]
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            start: Instant::now(),
        }
    }

    /// Returns the time elapsed so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for OperationTimer {
    fn drop(&mut self) {
        histogram!(
            names::OPERATION_DURATION_SECONDS,
            labels::OPERATION => self.operation,
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}
