//! Remote session layer for FleetRun.
//!
//! Provides the `SessionConnector` / `RemoteSession` seam, an OpenSSH
//! implementation that multiplexes every command of a session over one
//! authenticated master connection, and a scripted `MockConnector` for tests.

pub mod config;
pub mod error;
pub mod mock;
pub mod session;
pub mod ssh;

pub use config::SshOptions;
pub use error::{SessionError, SessionResult};
pub use mock::{MockBehavior, MockConnector, RecordedRun};
pub use session::{
    CommandOutcome, Discard, OutputSink, OutputStream, RemoteSession, SessionConnector,
};
pub use ssh::{SshConnector, SshSession};
