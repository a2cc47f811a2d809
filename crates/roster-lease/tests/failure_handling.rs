//! Failure classification, retry, deadlines and fail-open behavior.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::time::Duration;

use roster_lease::config::LeaseConfig;
use roster_lease::remote::{RemoteError, RemoteErrorCode};
use roster_lease::{AcquireOutcome, LeaseError, LockStatus, ReleaseOutcome};
use roster_lease_test_utils::{
    LeaseHarness, ROSTER, StoreOpKind, ana, assert_acquire_failed, assert_gaps, assert_granted,
    assert_release_failed, ben,
};

#[tokio::test(start_paused = true)]
async fn persistent_network_failure_gives_up_after_three_attempts() {
    let harness = LeaseHarness::new();
    harness
        .remote
        .fail_always(StoreOpKind::Get, RemoteError::unavailable("network offline"));

    let outcome = harness.coordinator.acquire(ROSTER, "7", &ana()).await;

    let error = assert_acquire_failed(&outcome);
    assert!(
        matches!(error, LeaseError::NetworkTransient { attempts: 3, .. }),
        "unexpected error: {error:?}"
    );
    assert!(outcome.is_retryable());
    assert_gaps(
        &harness.remote.operations_of(StoreOpKind::Get),
        &[Duration::from_secs(1), Duration::from_secs(2)],
    );
    assert_eq!(harness.remote.count(StoreOpKind::Put), 0);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_recovers_on_retry() {
    let harness = LeaseHarness::new();
    harness.remote.fail_next_n(
        StoreOpKind::Get,
        2,
        RemoteError::new(RemoteErrorCode::Unknown, "The operation timed out."),
    );

    assert_granted(&harness.coordinator.acquire(ROSTER, "7", &ana()).await);
    assert_eq!(harness.remote.count(StoreOpKind::Get), 3);
    assert_eq!(harness.remote.inner().len(ROSTER), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_write_retries_from_the_read() {
    let harness = LeaseHarness::new();
    harness
        .remote
        .fail_next(StoreOpKind::Put, RemoteError::unavailable("connection reset"));

    assert_granted(&harness.coordinator.acquire(ROSTER, "7", &ana()).await);
    assert_eq!(harness.remote.count(StoreOpKind::Get), 2);
    assert_eq!(harness.remote.count(StoreOpKind::Put), 2);
}

#[tokio::test(start_paused = true)]
async fn release_makes_two_attempts() {
    let harness = LeaseHarness::new();
    harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    harness.remote.clear_operations();
    harness
        .remote
        .fail_always(StoreOpKind::Delete, RemoteError::unavailable("unreachable"));

    let outcome = harness
        .coordinator
        .release(ROSTER, "7", &ana().editor_id)
        .await;

    let error = assert_release_failed(&outcome);
    assert!(matches!(
        error,
        LeaseError::NetworkTransient { attempts: 2, .. }
    ));
    assert_gaps(
        &harness.remote.operations_of(StoreOpKind::Delete),
        &[Duration::from_secs(1)],
    );
}

#[tokio::test]
async fn permission_failures_fail_open() {
    let harness = LeaseHarness::new();
    harness.seed_lease(ROSTER, "7", &ben(), Duration::from_secs(5));
    harness
        .remote
        .fail_always(StoreOpKind::Get, RemoteError::permission_denied("rules"));

    assert_granted(&harness.coordinator.acquire(ROSTER, "7", &ana()).await);
    assert_eq!(
        harness
            .coordinator
            .release(ROSTER, "7", &ana().editor_id)
            .await,
        ReleaseOutcome::Released
    );
    assert_eq!(
        harness.coordinator.query(ROSTER, "7").await.expect("query"),
        LockStatus::unlocked()
    );
    // Fail-open never retries.
    assert_eq!(harness.remote.count(StoreOpKind::Get), 3);
}

#[tokio::test]
async fn permission_is_recognised_from_message_alone() {
    let harness = LeaseHarness::new();
    harness.remote.fail_always(
        StoreOpKind::Put,
        RemoteError::new(
            RemoteErrorCode::Unknown,
            "Missing or insufficient permissions.",
        ),
    );

    assert_granted(&harness.coordinator.acquire(ROSTER, "7", &ana()).await);
    assert!(harness.remote.inner().is_empty(ROSTER));
}

#[tokio::test]
async fn unclassified_failures_surface_without_retry() {
    let harness = LeaseHarness::new();
    harness
        .remote
        .fail_always(StoreOpKind::Get, RemoteError::internal("document corrupted"));

    let outcome = harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    assert!(matches!(
        assert_acquire_failed(&outcome),
        LeaseError::Unclassified { .. }
    ));
    assert_eq!(harness.remote.count(StoreOpKind::Get), 1);

    let query = harness.coordinator.query(ROSTER, "7").await;
    assert!(matches!(query, Err(LeaseError::Unclassified { .. })));
}

#[tokio::test]
async fn transport_failure_on_query_reports_unlocked() {
    let harness = LeaseHarness::new();
    harness.seed_lease(ROSTER, "7", &ben(), Duration::ZERO);
    harness
        .remote
        .fail_always(StoreOpKind::Get, RemoteError::unavailable("dns"));

    assert_eq!(
        harness.coordinator.query(ROSTER, "7").await.expect("query"),
        LockStatus::unlocked()
    );
}

#[tokio::test(start_paused = true)]
async fn acquire_deadline_discards_late_result() {
    let harness = LeaseHarness::new();
    harness.remote.set_latency(Some(Duration::from_secs(15)));

    let outcome = harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    assert_eq!(
        outcome,
        AcquireOutcome::Failed(LeaseError::Timeout {
            operation: "acquire",
            after: Duration::from_secs(10),
        })
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.remote.count(StoreOpKind::Put), 0);
    assert!(harness.remote.inner().is_empty(ROSTER));
}

#[tokio::test(start_paused = true)]
async fn retries_count_against_the_acquire_deadline() {
    let config = LeaseConfig {
        backoff_step_ms: 6_000,
        ..LeaseConfig::default()
    };
    let harness = LeaseHarness::with_config(config, true);
    harness
        .remote
        .fail_always(StoreOpKind::Get, RemoteError::unavailable("offline"));

    let outcome = harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    assert!(matches!(
        assert_acquire_failed(&outcome),
        LeaseError::Timeout { .. }
    ));
    assert_eq!(harness.remote.count(StoreOpKind::Get), 2);
}

#[tokio::test(start_paused = true)]
async fn query_deadline_reports_unlocked() {
    let harness = LeaseHarness::new();
    harness.seed_lease(ROSTER, "7", &ben(), Duration::ZERO);
    harness.remote.set_latency(Some(Duration::from_secs(9)));

    assert_eq!(
        harness.coordinator.query(ROSTER, "7").await.expect("query"),
        LockStatus::unlocked()
    );
}

#[tokio::test(start_paused = true)]
async fn release_deadline_reports_failure() {
    let harness = LeaseHarness::new();
    harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    harness.remote.set_latency(Some(Duration::from_secs(11)));

    let outcome = harness
        .coordinator
        .release(ROSTER, "7", &ana().editor_id)
        .await;
    assert!(matches!(
        assert_release_failed(&outcome),
        LeaseError::Timeout {
            operation: "release",
            ..
        }
    ));
    assert_eq!(harness.remote.inner().len(ROSTER), 1);
}

#[tokio::test]
async fn force_release_surfaces_permission_failures() {
    let harness = LeaseHarness::new();
    harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    harness
        .remote
        .fail_always(StoreOpKind::Delete, RemoteError::permission_denied("admin only"));

    let result = harness.coordinator.force_release(ROSTER, "7").await;
    assert!(matches!(result, Err(LeaseError::PermissionDenied { .. })));
    assert_eq!(harness.remote.inner().len(ROSTER), 1);
}

#[tokio::test]
async fn not_found_on_delete_counts_as_released() {
    let harness = LeaseHarness::new();
    harness.coordinator.acquire(ROSTER, "7", &ana()).await;
    harness.remote.fail_next(
        StoreOpKind::Delete,
        RemoteError::new(RemoteErrorCode::NotFound, "no document to delete"),
    );

    harness
        .coordinator
        .force_release(ROSTER, "7")
        .await
        .expect("absent record is fine");
}
