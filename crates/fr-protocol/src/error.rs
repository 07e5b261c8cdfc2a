//! Configuration error types.

use thiserror::Error;

/// Errors detected while building a fleet run, before any session opens.
///
/// Every variant is fatal: the runner refuses to contact any host once
/// one of these has been raised.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("roster is empty")]
    EmptyRoster,

    #[error("roster index must be 1-based, got 0 for {address}")]
    ZeroIndex { address: String },

    #[error("duplicate roster index {0}")]
    DuplicateIndex(u32),

    #[error("roster index {0} has an empty address")]
    EmptyAddress(u32),

    #[error("leader index {0} is not in the roster")]
    LeaderNotInRoster(u32),

    #[error("leader index {0} has no leader job")]
    LeaderWithoutJob(u32),

    #[error("leader job given without a leader index")]
    JobWithoutLeader,

    #[error("capture to {0} requires a leader phase")]
    CaptureWithoutLeader(String),

    #[error("invalid selection {input:?}: {reason}")]
    InvalidSelection { input: String, reason: String },

    #[error("invalid command template: {0}")]
    InvalidTemplate(String),

    #[error("unknown job {0:?}")]
    UnknownJob(String),

    #[error("no worker job given")]
    MissingJob,

    #[error("concurrency must be at least 1")]
    ZeroConcurrency,

    #[error("cannot read roster {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("cannot parse roster {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// Convenience alias for configuration results.
pub type ConfigResult<T> = Result<T, ConfigError>;
