use fr_protocol::{ConfigError, FleetReport};
use thiserror::Error;

/// Errors that end a fleet run as a whole.
#[derive(Debug, Error)]
pub enum FleetError {
    /// Raised before any session is opened.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The leader phase failed while `leader_fatal` was set. The report
    /// still holds every worker result alongside the failed leader.
    #[error("{}", leader_failure(.0))]
    LeaderFailed(Box<FleetReport>),
}

impl FleetError {
    /// Process exit code for this error: the first failing target's code,
    /// workers in roster order before the leader.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::LeaderFailed(report) => report.exit_code(),
        }
    }
}

fn leader_failure(report: &FleetReport) -> String {
    match &report.leader {
        Some(leader) => match &leader.error {
            Some(err) => format!("leader #{} failed: {err}", leader.index),
            None => format!("leader #{} failed", leader.index),
        },
        None => "leader failed".to_string(),
    }
}
