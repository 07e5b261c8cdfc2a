//! E2E tests for leader output capture.

mod helpers;

use fr_protocol::{RemoteOutput, RunError, Selection};
use fr_runner::{FleetError, FleetPlan};
use fr_session::{MockBehavior, MockConnector};

use helpers::{TestHarness, benchmark_job, prepare_job};

/// The capture file holds exactly stdout followed by stderr.
#[tokio::test]
async fn e2e_capture_is_stdout_then_stderr() {
    let mock = MockConnector::new().with_host(
        "10.0.0.2",
        MockBehavior::output("line one\nline two\n", "stderr tail\n"),
    );
    let h = TestHarness::new(mock);
    let out = h.capture_path("bench.log");
    let plan = FleetPlan::new(Selection::None, prepare_job())
        .with_leader(2, benchmark_job(Some(out.clone())));

    h.run(&plan).await.unwrap();

    assert_eq!(
        std::fs::read(&out).unwrap(),
        b"line one\nline two\nstderr tail\n"
    );
}

/// Capture truncates output from a previous run.
#[tokio::test]
async fn e2e_capture_truncates_previous_run() {
    let mock = MockConnector::new().with_host("10.0.0.2", MockBehavior::output("fresh\n", ""));
    let h = TestHarness::new(mock);
    let out = h.capture_path("out.txt");
    std::fs::write(&out, "stale results from an older benchmark\n").unwrap();
    let plan = FleetPlan::new(Selection::None, prepare_job())
        .with_leader(2, benchmark_job(Some(out.clone())));

    h.run(&plan).await.unwrap();

    assert_eq!(std::fs::read_to_string(&out).unwrap(), "fresh\n");
}

/// Without a capture policy nothing is written.
#[tokio::test]
async fn e2e_no_capture_creates_no_file() {
    let mock = MockConnector::new().with_default(MockBehavior::output("ops/sec: 1\n", ""));
    let h = TestHarness::new(mock);
    let plan =
        FleetPlan::new(Selection::below(2), prepare_job()).with_leader(2, benchmark_job(None));

    let report = h.run(&plan).await.unwrap();

    assert!(report.leader.unwrap().capture_path.is_none());
    assert_eq!(std::fs::read_dir(h.dir.path()).unwrap().count(), 0);
}

/// An unwritable capture path fails the leader before the benchmark starts.
#[tokio::test]
async fn e2e_unwritable_capture_fails_leader() {
    let h = TestHarness::new(MockConnector::new());
    let out = h.capture_path("no-such-dir/out.txt");
    let plan = FleetPlan::new(Selection::None, prepare_job())
        .with_leader(2, benchmark_job(Some(out)))
        .with_leader_fatal(false);

    let report = h.run(&plan).await.unwrap();

    let leader = report.leader.as_ref().unwrap();
    assert!(matches!(leader.error, Some(RunError::Capture { .. })));
    assert!(h.mock.runs().is_empty());
    assert_eq!(h.mock.open_sessions(), 0);
}

/// Output produced before a lost connection survives in the capture file.
#[tokio::test]
async fn e2e_capture_keeps_output_before_transport_drop() {
    let mock = MockConnector::new().with_host(
        "10.0.0.2",
        MockBehavior::drop_after("ops/sec: 4000\n", "lease expired\n", "reset"),
    );
    let h = TestHarness::new(mock);
    let out = h.capture_path("out.txt");
    let plan = FleetPlan::new(Selection::None, prepare_job())
        .with_leader(2, benchmark_job(Some(out.clone())))
        .with_leader_fatal(false);

    let report = h.run(&plan).await.unwrap();

    let leader = report.leader.unwrap();
    assert!(matches!(leader.error, Some(RunError::Connection { .. })));
    assert_eq!(leader.capture_path.as_deref(), Some(out.as_path()));
    assert_eq!(
        std::fs::read(&out).unwrap(),
        b"ops/sec: 4000\nlease expired\n"
    );
}

/// A benchmark exiting 255 on a healthy session is a remote failure with
/// its output captured, not a connection error.
#[tokio::test]
async fn e2e_remote_exit_255_is_captured() {
    let mock = MockConnector::new().with_command(
        "10.0.0.2",
        "NNThroughputBenchmark",
        MockBehavior::Exit {
            code: 255,
            output: RemoteOutput::new(
                b"ops/sec: 4000\n".to_vec(),
                b"Exception: benchmark aborted\n".to_vec(),
            ),
        },
    );
    let h = TestHarness::new(mock);
    let out = h.capture_path("out.txt");
    let plan = FleetPlan::new(Selection::below(2), prepare_job())
        .with_leader(2, benchmark_job(Some(out.clone())));

    let err = h.run(&plan).await.unwrap_err();

    assert_eq!(err.exit_code(), 255);
    match &err {
        FleetError::LeaderFailed(report) => assert!(matches!(
            report.leader.as_ref().unwrap().error,
            Some(RunError::RemoteExecution { exit_code: 255, .. })
        )),
        other => panic!("expected LeaderFailed, got {other:?}"),
    }
    assert_eq!(
        std::fs::read(&out).unwrap(),
        b"ops/sec: 4000\nException: benchmark aborted\n"
    );
}
