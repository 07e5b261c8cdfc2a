//! Per-target outcomes and the fleet-level report built from them.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::roster::RemoteTarget;

/// Lines of remote output kept in a `RemoteExecution` error.
pub const OUTPUT_TAIL_LINES: usize = 20;

/// Exit code reported for a failed SSH connection (matches the OpenSSH client).
pub const CONNECTION_EXIT_CODE: i32 = 255;

/// Exit code reported for targets skipped by cancellation.
pub const CANCELLED_EXIT_CODE: i32 = 130;

/// Which half of a fleet run produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Worker,
    Leader,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Worker => write!(f, "worker"),
            Self::Leader => write!(f, "leader"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Succeeded,
    Failed,
    Cancelled,
}

/// Why a single target did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunError {
    /// The session could not be established or was lost.
    #[error("connection to {address} failed: {reason}")]
    Connection { address: String, reason: String },

    /// The session worked but the remote command exited non-zero.
    #[error("remote command on {address} exited with status {exit_code}")]
    RemoteExecution {
        address: String,
        exit_code: i32,
        output_tail: String,
    },

    /// The remote run finished but its output could not be written locally.
    #[error("cannot write capture file {path}: {reason}")]
    Capture { path: String, reason: String },

    /// The run was cancelled before this target started.
    #[error("cancelled before {address} started")]
    Cancelled { address: String },
}

impl RunError {
    /// Process exit code this failure maps to.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Connection { .. } => CONNECTION_EXIT_CODE,
            Self::RemoteExecution { exit_code, .. } => match *exit_code {
                0 => 1,
                code => code,
            },
            Self::Capture { .. } => 1,
            Self::Cancelled { .. } => CANCELLED_EXIT_CODE,
        }
    }
}

/// Raw bytes produced by one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoteOutput {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl RemoteOutput {
    pub fn new(stdout: impl Into<Vec<u8>>, stderr: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, byte for byte.
    pub fn combined(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.stdout.len() + self.stderr.len());
        out.extend_from_slice(&self.stdout);
        out.extend_from_slice(&self.stderr);
        out
    }

    /// The last `lines` lines of the combined output, lossily decoded.
    pub fn tail(&self, lines: usize) -> String {
        let text = String::from_utf8_lossy(&self.combined()).into_owned();
        let all: Vec<&str> = text.lines().collect();
        let start = all.len().saturating_sub(lines);
        all[start..].join("\n")
    }

    pub fn is_empty(&self) -> bool {
        self.stdout.is_empty() && self.stderr.is_empty()
    }
}

/// Outcome for one target. Built once by the executor, then only read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub phase: Phase,
    pub index: u32,
    pub address: String,
    pub job: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RunError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_path: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    #[serde(skip)]
    pub output: Option<RemoteOutput>,
}

impl RunResult {
    /// Result for a target that never started.
    pub fn cancelled(phase: Phase, target: &RemoteTarget, job: &str) -> Self {
        Self {
            phase,
            index: target.index,
            address: target.address.clone(),
            job: job.to_string(),
            status: RunStatus::Cancelled,
            exit_code: None,
            error: Some(RunError::Cancelled {
                address: target.address.clone(),
            }),
            capture_path: None,
            started_at: Utc::now(),
            duration_ms: 0,
            output: None,
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    /// Process exit code for this result, `0` on success.
    pub fn exit_code_for_process(&self) -> i32 {
        match &self.error {
            Some(err) => err.exit_code(),
            None if self.succeeded() => 0,
            None => 1,
        }
    }
}

/// Everything a fleet run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Worker results in roster order.
    pub workers: Vec<RunResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader: Option<RunResult>,
}

impl FleetReport {
    pub fn new(workers: Vec<RunResult>, leader: Option<RunResult>) -> Self {
        Self {
            run_id: Uuid::now_v7(),
            started_at: Utc::now(),
            workers,
            leader,
        }
    }

    /// Workers first, then the leader.
    pub fn results(&self) -> impl Iterator<Item = &RunResult> {
        self.workers.iter().chain(self.leader.iter())
    }

    pub fn all_succeeded(&self) -> bool {
        self.results().all(RunResult::succeeded)
    }

    pub fn first_failure(&self) -> Option<&RunResult> {
        self.results().find(|r| !r.succeeded())
    }

    pub fn failed_count(&self) -> usize {
        self.results().filter(|r| !r.succeeded()).count()
    }

    /// `0` when everything succeeded, else the first failure's code.
    pub fn exit_code(&self) -> i32 {
        self.first_failure()
            .map_or(0, RunResult::exit_code_for_process)
    }
}
