//! Custom assertion helpers for lease tests.

use std::time::Duration;

use roster_lease::{AcquireOutcome, LeaseError, ReleaseOutcome};

use crate::storage::StoreOp;

/// Asserts that an acquire was granted.
///
/// # Panics
///
/// Panics if the outcome is not `Granted`.
pub fn assert_granted(outcome: &AcquireOutcome) {
    assert!(
        outcome.is_granted(),
        "Expected acquire to be granted, but got {outcome:?}"
    );
}

/// Asserts that an acquire was denied because `holder_name` holds the entry.
///
/// # Panics
///
/// Panics on any other outcome or holder.
pub fn assert_denied_by(outcome: &AcquireOutcome, holder_name: &str) {
    match outcome {
        AcquireOutcome::Denied { holder_name: actual } => assert_eq!(
            actual, holder_name,
            "Expected denial by {holder_name}, but holder was {actual}"
        ),
        other => panic!("Expected denial by {holder_name}, but got {other:?}"),
    }
}

/// Asserts that an acquire failed and returns the error.
///
/// # Panics
///
/// Panics if the outcome is not `Failed`.
pub fn assert_acquire_failed(outcome: &AcquireOutcome) -> &LeaseError {
    match outcome {
        AcquireOutcome::Failed(error) => error,
        other => panic!("Expected acquire to fail, but got {other:?}"),
    }
}

/// Asserts that a release failed and returns the error.
///
/// # Panics
///
/// Panics if the outcome is not `Failed`.
pub fn assert_release_failed(outcome: &ReleaseOutcome) -> &LeaseError {
    match outcome {
        ReleaseOutcome::Failed(error) => error,
        other => panic!("Expected release to fail, but got {other:?}"),
    }
}

/// Asserts the pauses between consecutive operations.
///
/// # Panics
///
/// Panics if the number of gaps or any gap differs from `expected`.
pub fn assert_gaps(ops: &[StoreOp], expected: &[Duration]) {
    let gaps: Vec<Duration> = ops
        .windows(2)
        .map(|pair| pair[1].at.duration_since(pair[0].at))
        .collect();
    assert_eq!(
        gaps, expected,
        "Expected gaps {expected:?} between operations, but got {gaps:?}"
    );
}

/// Asserts that no remote call was made.
///
/// # Panics
///
/// Panics if `ops` is non-empty.
pub fn assert_no_remote_calls(ops: &[StoreOp]) {
    assert!(
        ops.is_empty(),
        "Expected no remote calls, but got {:?}",
        ops.iter().map(|op| op.kind).collect::<Vec<_>>()
    );
}
