//! Shared harness for end-to-end fleet scenarios.
//!
//! Wires a real `FleetRunner` to the scripted `MockConnector`, so every
//! scenario goes through selection, validation, the executor, capture and
//! reporting exactly as the binary does.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;

use fr_protocol::{
    CapturePolicy, CommandJob, CommandTemplate, Credentials, FleetReport, HostRoster,
};
use fr_runner::{FleetError, FleetPlan, FleetRunner};
use fr_session::{MockConnector, SessionConnector};

pub const WORKDIR: &str = "/home/ec2-user/voltfs/hadoop-3.3.0-SNAPSHOT";
pub const ENV_STEP: &str = "source etc/hadoop/hadoop-env.sh";
pub const BENCHMARK: &str =
    "./bin/hadoop org.apache.hadoop.hdfs.server.namenode.NNThroughputBenchmark -op create";

pub struct TestHarness {
    /// Scripted connector shared with the runner, for inspection.
    pub mock: Arc<MockConnector>,
    pub runner: FleetRunner,
    pub roster: HostRoster,
    /// Scratch directory for capture files.
    pub dir: TempDir,
}

impl TestHarness {
    /// Three hosts, 10.0.0.1 to 10.0.0.3.
    pub fn new(mock: MockConnector) -> Self {
        Self::with_hosts(mock, 3)
    }

    pub fn with_hosts(mock: MockConnector, hosts: u32) -> Self {
        let mock = Arc::new(mock);
        let connector: Arc<dyn SessionConnector> = mock.clone();
        Self {
            runner: FleetRunner::new(connector, Credentials::default()),
            mock,
            roster: roster(hosts),
            dir: TempDir::new().unwrap(),
        }
    }

    pub fn capture_path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub async fn run(&self, plan: &FleetPlan) -> Result<FleetReport, FleetError> {
        self.runner.run_fleet(&self.roster, plan).await
    }

    /// Addresses that received a command containing `needle`.
    pub fn hosts_running(&self, needle: &str) -> Vec<String> {
        self.mock
            .runs()
            .into_iter()
            .filter(|r| r.command.contains(needle))
            .map(|r| r.address)
            .collect()
    }
}

pub fn roster(hosts: u32) -> HostRoster {
    HostRoster::from_addresses((1..=hosts).map(|i| format!("10.0.0.{i}"))).unwrap()
}

/// Worker preparation: cd, source the environment, run the test script.
pub fn prepare_job() -> CommandJob {
    CommandJob::new(
        "prepare",
        CommandTemplate::new("bash test.sh")
            .with_workdir(WORKDIR)
            .with_setup(ENV_STEP),
    )
}

/// Leader benchmark, optionally captured.
pub fn benchmark_job(capture: Option<PathBuf>) -> CommandJob {
    CommandJob::new(
        "benchmark",
        CommandTemplate::new(BENCHMARK)
            .with_workdir(WORKDIR)
            .with_setup(ENV_STEP),
    )
    .with_capture(CapturePolicy::from(capture))
}
