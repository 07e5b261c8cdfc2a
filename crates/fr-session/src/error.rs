//! Session error types.

use thiserror::Error;

use fr_protocol::RemoteOutput;

/// Errors raised while opening, using or closing a remote session.
///
/// A remote command exiting non-zero is *not* an error at this layer; it is
/// reported through `CommandOutcome::exit_code`.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("cannot connect to {address}: {reason}")]
    Connect { address: String, reason: String },

    #[error("{address}: timed out after {timeout_ms}ms")]
    Timeout { address: String, timeout_ms: u64 },

    #[error("cannot start ssh client: {0}")]
    Spawn(String),

    /// `output` holds whatever arrived before the connection went away.
    #[error("{address}: connection lost: {reason}")]
    Transport {
        address: String,
        reason: String,
        output: RemoteOutput,
    },

    #[error("session already closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for session results.
pub type SessionResult<T> = Result<T, SessionError>;
