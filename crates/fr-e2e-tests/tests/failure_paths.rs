//! E2E tests for per-target failures, leader policy and session cleanup.

mod helpers;

use fr_protocol::{RunError, RunStatus, Selection};
use fr_runner::{FleetError, FleetPlan};
use fr_session::{MockBehavior, MockConnector};

use helpers::{TestHarness, benchmark_job, prepare_job};

/// A failing target is reported with its exit code; the rest still run.
#[tokio::test]
async fn e2e_failing_worker_keeps_others_running() {
    let mock = MockConnector::new()
        .with_host("10.0.0.2", MockBehavior::exit(3, "test.sh: missing jar\n"));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::All, prepare_job());

    let report = h.run(&plan).await.unwrap();

    assert_eq!(report.workers.len(), 3);
    assert_eq!(report.workers[0].status, RunStatus::Succeeded);
    assert_eq!(report.workers[2].status, RunStatus::Succeeded);

    let failed = &report.workers[1];
    assert_eq!(failed.exit_code, Some(3));
    match failed.error.as_ref().unwrap() {
        RunError::RemoteExecution {
            exit_code,
            output_tail,
            ..
        } => {
            assert_eq!(*exit_code, 3);
            assert!(output_tail.contains("missing jar"));
        }
        other => panic!("expected RemoteExecution, got {other:?}"),
    }
    assert_eq!(report.exit_code(), 3);
}

/// Unreachable and timed-out hosts are connection failures (exit 255).
#[tokio::test]
async fn e2e_connection_failures_map_to_255() {
    let mock = MockConnector::new()
        .with_host("10.0.0.1", MockBehavior::Refuse("Permission denied (publickey)".into()))
        .with_host("10.0.0.3", MockBehavior::Timeout);
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::All, prepare_job());

    let report = h.run(&plan).await.unwrap();

    assert!(matches!(
        report.workers[0].error,
        Some(RunError::Connection { ref reason, .. }) if reason.contains("publickey")
    ));
    assert!(report.workers[1].succeeded());
    assert!(matches!(report.workers[2].error, Some(RunError::Connection { .. })));
    assert_eq!(report.exit_code(), 255);
    assert_eq!(report.failed_count(), 2);
}

/// Sessions are closed after success, remote failure and lost transport.
#[tokio::test]
async fn e2e_sessions_closed_on_every_path() {
    let mock = MockConnector::new()
        .with_host("10.0.0.2", MockBehavior::exit(1, "boom"))
        .with_host("10.0.0.3", MockBehavior::DropConnection("broken pipe".into()));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::All, prepare_job());

    h.run(&plan).await.unwrap();

    assert_eq!(h.mock.closes(), vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    assert_eq!(h.mock.open_sessions(), 0);
    assert_eq!(h.mock.dropped_without_close(), 0);
}

/// By default a failed leader aborts with `LeaderFailed`, carrying the
/// whole report, and its code.
#[tokio::test]
async fn e2e_leader_failure_is_fatal() {
    let mock = MockConnector::new().with_command(
        "10.0.0.2",
        "NNThroughputBenchmark",
        MockBehavior::exit(137, "Killed\n"),
    );
    let h = TestHarness::new(mock);
    let out = h.capture_path("out.txt");
    let plan = FleetPlan::new(Selection::below(2), prepare_job())
        .with_leader(2, benchmark_job(Some(out.clone())));

    let err = h.run(&plan).await.unwrap_err();

    match &err {
        FleetError::LeaderFailed(report) => {
            let leader = report.leader.as_ref().unwrap();
            assert_eq!(leader.address, "10.0.0.2");
            assert_eq!(leader.exit_code, Some(137));
            assert!(report.workers[0].succeeded());
        }
        other => panic!("expected LeaderFailed, got {other:?}"),
    }
    assert_eq!(err.exit_code(), 137);
    // The failing leader's output is still captured.
    assert_eq!(std::fs::read_to_string(&out).unwrap(), "Killed\n");
}

/// When a worker and the leader both fail, the worker's code is surfaced.
#[tokio::test]
async fn e2e_first_failure_code_wins_over_fatal_leader() {
    let mock = MockConnector::new()
        .with_host("10.0.0.1", MockBehavior::exit(3, "prep failed\n"))
        .with_host("10.0.0.2", MockBehavior::exit(4, "bench failed\n"));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::below(2), prepare_job())
        .with_leader(2, benchmark_job(None));

    let err = h.run(&plan).await.unwrap_err();

    assert!(matches!(err, FleetError::LeaderFailed(_)));
    assert_eq!(err.exit_code(), 3);
}

/// With `leader_fatal` off, the failed leader is part of the report.
#[tokio::test]
async fn e2e_leader_failure_reported() {
    let mock = MockConnector::new().with_host("10.0.0.3", MockBehavior::exit(2, ""));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::below(3), prepare_job())
        .with_leader(3, benchmark_job(None))
        .with_leader_fatal(false);

    let report = h.run(&plan).await.unwrap();

    assert!(report.workers.iter().all(|r| r.succeeded()));
    assert_eq!(report.leader.as_ref().unwrap().status, RunStatus::Failed);
    assert_eq!(report.exit_code(), 2);
}

/// `strict_workers` skips the leader when a worker failed.
#[tokio::test]
async fn e2e_strict_workers_skip_leader() {
    let mock = MockConnector::new().with_host("10.0.0.1", MockBehavior::exit(1, "no space"));
    let h = TestHarness::new(mock);
    let plan = FleetPlan::new(Selection::below(3), prepare_job())
        .with_leader(3, benchmark_job(None))
        .with_strict_workers(true);

    let report = h.run(&plan).await.unwrap();

    assert_eq!(report.leader.as_ref().unwrap().status, RunStatus::Cancelled);
    assert!(!h.mock.connects().contains(&"10.0.0.3".to_string()));
    assert_eq!(report.exit_code(), 1);
}
