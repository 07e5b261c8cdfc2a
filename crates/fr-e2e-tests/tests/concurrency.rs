//! E2E tests for bounded concurrency, cancellation and streaming.

mod helpers;

use std::time::Duration;

use fr_protocol::{Phase, RunStatus, Selection};
use fr_runner::FleetPlan;
use fr_session::MockConnector;

use helpers::{TestHarness, benchmark_job, prepare_job};

/// At concurrency n no more than n sessions are ever open at once.
#[tokio::test]
async fn e2e_concurrency_bound_respected() {
    let mock = MockConnector::new().with_delay(Duration::from_millis(25));
    let h = TestHarness::with_hosts(mock, 8);
    let plan = FleetPlan::new(Selection::All, prepare_job()).with_concurrency(3);

    let report = h.run(&plan).await.unwrap();

    assert_eq!(report.workers.len(), 8);
    assert!(h.mock.max_open_sessions() <= 3);
    assert!(h.mock.max_open_sessions() >= 2);
    let indices: Vec<u32> = report.workers.iter().map(|r| r.index).collect();
    assert_eq!(indices, (1..=8).collect::<Vec<_>>());
}

/// Concurrency above the target count is fine.
#[tokio::test]
async fn e2e_concurrency_wider_than_fleet() {
    let h = TestHarness::new(MockConnector::new());
    let plan = FleetPlan::new(Selection::All, prepare_job()).with_concurrency(16);

    let report = h.run(&plan).await.unwrap();

    assert!(report.all_succeeded());
    assert_eq!(h.mock.open_sessions(), 0);
}

/// Cancelling before the run starts opens no session at all.
#[tokio::test]
async fn e2e_cancel_before_start() {
    let h = TestHarness::new(MockConnector::new());
    h.runner.cancel_token().cancel();
    let plan = FleetPlan::new(Selection::All, prepare_job()).with_leader(2, benchmark_job(None));

    let report = h.run(&plan).await.unwrap();

    assert_eq!(report.results().count(), 4);
    assert!(report.results().all(|r| r.status == RunStatus::Cancelled));
    assert!(h.mock.connects().is_empty());
    assert_eq!(report.exit_code(), 130);
}

/// Cancelling mid-run lets the running target finish and skips the rest.
#[tokio::test]
async fn e2e_cancel_mid_run() {
    let mock = MockConnector::new().with_delay(Duration::from_millis(200));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::All, prepare_job());

    let cancel = h.runner.cancel_token();
    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        cancel.cancel();
    });

    let report = h.run(&plan).await.unwrap();
    trigger.await.unwrap();

    assert_eq!(report.workers[0].status, RunStatus::Succeeded);
    assert_eq!(report.workers[1].status, RunStatus::Cancelled);
    assert_eq!(report.workers[2].status, RunStatus::Cancelled);
    assert_eq!(h.mock.connects(), vec!["10.0.0.1"]);
    assert_eq!(h.mock.dropped_without_close(), 0);
}

/// Streaming delivers every worker result, then the leader, then closes.
#[tokio::test]
async fn e2e_streaming_delivers_all_results() {
    let mock = MockConnector::new().with_delay(Duration::from_millis(10));
    let h = TestHarness::with_hosts(mock, 5);
    let plan = FleetPlan::new(Selection::All, prepare_job())
        .with_concurrency(2)
        .with_leader(5, benchmark_job(None));

    let mut rx = h.runner.run_fleet_streaming(&h.roster, &plan).unwrap();

    let mut results = Vec::new();
    while let Some(result) = rx.recv().await {
        results.push(result);
    }

    assert_eq!(results.len(), 6);
    let (leader, workers) = results.split_last().unwrap();
    assert_eq!(leader.phase, Phase::Leader);
    assert_eq!(leader.index, 5);
    let mut indices: Vec<u32> = workers.iter().map(|r| r.index).collect();
    indices.sort_unstable();
    assert_eq!(indices, vec![1, 2, 3, 4, 5]);
    assert!(results.iter().all(|r| r.succeeded()));
}

/// Configuration errors surface before the stream is created.
#[tokio::test]
async fn e2e_streaming_rejects_bad_plan() {
    let h = TestHarness::new(MockConnector::new());
    let plan = FleetPlan::new(Selection::All, prepare_job()).with_concurrency(0);

    assert!(h.runner.run_fleet_streaming(&h.roster, &plan).is_err());
    assert!(h.mock.connects().is_empty());
}
