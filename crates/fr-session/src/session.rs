//! Remote session abstraction.
//!
//! `SessionConnector` opens sessions, `RemoteSession` runs one shell string
//! at a time. Two impls:
//! - `SshConnector`: OpenSSH client with a multiplexed master connection
//! - `MockConnector`: scripted per-address behaviour (in `mock.rs`)

use async_trait::async_trait;

use fr_protocol::{RemoteOutput, RemoteTarget};

use crate::error::SessionResult;

/// What a remote command produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutcome {
    pub exit_code: i32,
    pub output: RemoteOutput,
}

impl CommandOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Which remote stream a chunk of output came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Receives remote output while the command is still running.
///
/// Chunks from one stream arrive in order; chunks from the two streams may
/// interleave. Sinks cannot fail the run: a sink that hits an error keeps
/// it and reports it to its owner afterwards.
#[async_trait]
pub trait OutputSink: Send {
    async fn chunk(&mut self, stream: OutputStream, bytes: &[u8]);
}

/// Sink that drops every chunk.
#[derive(Debug, Clone, Copy, Default)]
pub struct Discard;

#[async_trait]
impl OutputSink for Discard {
    async fn chunk(&mut self, _stream: OutputStream, _bytes: &[u8]) {}
}

/// Opens sessions to remote targets.
#[async_trait]
pub trait SessionConnector: Send + Sync {
    /// Establish a session, failing with `Connect`/`Timeout` on auth or
    /// network problems.
    async fn connect(&self, target: &RemoteTarget) -> SessionResult<Box<dyn RemoteSession>>;
}

/// An open session to one host.
///
/// Callers must `close` on every path. Implementations also release local
/// resources on drop, but dropping a session mid-command only tears down
/// the local side: the remote process is not guaranteed to be killed.
#[async_trait]
pub trait RemoteSession: Send {
    fn target(&self) -> &RemoteTarget;

    /// Run one shell command string and wait for it to finish. Output is
    /// forwarded to `sink` as it arrives and also returned in full.
    async fn run(
        &mut self,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> SessionResult<CommandOutcome>;

    /// Close the session. Closing twice is a no-op.
    async fn close(&mut self) -> SessionResult<()>;
}
