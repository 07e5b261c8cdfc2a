//! Mock session layer for testing.
//!
//! Supports scripted per-host (and per-command) behaviour plus recording of
//! every connect, run and close. All runner tests use this instead of real
//! hosts so the suite runs in CI without network access.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;

use fr_protocol::{RemoteOutput, RemoteTarget};

use crate::error::{SessionError, SessionResult};
use crate::session::{CommandOutcome, OutputSink, OutputStream, RemoteSession, SessionConnector};

/// What a mocked host does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBehavior {
    /// Connect and exit 0 with the given output.
    Succeed(RemoteOutput),
    /// Connect and exit with `code`.
    Exit { code: i32, output: RemoteOutput },
    /// Refuse the connection (auth failure, unreachable).
    Refuse(String),
    /// Connection attempt times out.
    Timeout,
    /// Connect fine, then lose the transport during `run`.
    DropConnection(String),
    /// Stream `output`, then lose the transport.
    DropAfter { output: RemoteOutput, reason: String },
}

impl MockBehavior {
    pub fn ok() -> Self {
        Self::Succeed(RemoteOutput::default())
    }

    pub fn output(stdout: &str, stderr: &str) -> Self {
        Self::Succeed(RemoteOutput::new(stdout.as_bytes(), stderr.as_bytes()))
    }

    pub fn drop_after(stdout: &str, stderr: &str, reason: &str) -> Self {
        Self::DropAfter {
            output: RemoteOutput::new(stdout.as_bytes(), stderr.as_bytes()),
            reason: reason.to_string(),
        }
    }

    pub fn exit(code: i32, stderr: &str) -> Self {
        Self::Exit {
            code,
            output: RemoteOutput::new(Vec::<u8>::new(), stderr.as_bytes()),
        }
    }
}

/// One recorded `run` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRun {
    pub address: String,
    pub command: String,
}

#[derive(Default)]
struct Recorder {
    connects: Mutex<Vec<String>>,
    runs: Mutex<Vec<RecordedRun>>,
    closes: Mutex<Vec<String>>,
    dropped_open: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
}

impl Recorder {
    fn opened(&self) {
        let now = self.open.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_open.fetch_max(now, Ordering::SeqCst);
    }

    fn released(&self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Mock connector with scripted behaviour and call recording.
pub struct MockConnector {
    default: MockBehavior,
    hosts: HashMap<String, MockBehavior>,
    /// `(address, needle, behaviour)`: applies when the command contains `needle`.
    commands: Vec<(String, String, MockBehavior)>,
    delay: Option<Duration>,
    recorder: Arc<Recorder>,
}

impl MockConnector {
    /// Every host connects and every command exits 0 with no output.
    pub fn new() -> Self {
        Self {
            default: MockBehavior::ok(),
            hosts: HashMap::new(),
            commands: Vec::new(),
            delay: None,
            recorder: Arc::new(Recorder::default()),
        }
    }

    pub fn with_default(mut self, behavior: MockBehavior) -> Self {
        self.default = behavior;
        self
    }

    pub fn with_host(mut self, address: &str, behavior: MockBehavior) -> Self {
        self.hosts.insert(address.to_string(), behavior);
        self
    }

    /// Override behaviour for commands on `address` that contain `needle`.
    /// Only affects `run`; connection behaviour still comes from the host.
    pub fn with_command(mut self, address: &str, needle: &str, behavior: MockBehavior) -> Self {
        self.commands
            .push((address.to_string(), needle.to_string(), behavior));
        self
    }

    /// Make every `run` take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Addresses passed to `connect`, in call order.
    pub fn connects(&self) -> Vec<String> {
        self.recorder.connects.lock().unwrap().clone()
    }

    /// Every `run` call, in call order.
    pub fn runs(&self) -> Vec<RecordedRun> {
        self.recorder.runs.lock().unwrap().clone()
    }

    /// Addresses whose session was closed, in call order.
    pub fn closes(&self) -> Vec<String> {
        self.recorder.closes.lock().unwrap().clone()
    }

    /// Sessions currently open.
    pub fn open_sessions(&self) -> usize {
        self.recorder.open.load(Ordering::SeqCst)
    }

    /// Highest number of sessions that were open at the same time.
    pub fn max_open_sessions(&self) -> usize {
        self.recorder.max_open.load(Ordering::SeqCst)
    }

    /// Sessions dropped without `close` being called.
    pub fn dropped_without_close(&self) -> usize {
        self.recorder.dropped_open.load(Ordering::SeqCst)
    }

    fn behavior_for(&self, address: &str) -> &MockBehavior {
        self.hosts.get(address).unwrap_or(&self.default)
    }
}

impl Default for MockConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, target: &RemoteTarget) -> SessionResult<Box<dyn RemoteSession>> {
        self.recorder
            .connects
            .lock()
            .unwrap()
            .push(target.address.clone());

        match self.behavior_for(&target.address) {
            MockBehavior::Refuse(reason) => {
                return Err(SessionError::Connect {
                    address: target.address.clone(),
                    reason: reason.clone(),
                });
            }
            MockBehavior::Timeout => {
                return Err(SessionError::Timeout {
                    address: target.address.clone(),
                    timeout_ms: 10_000,
                });
            }
            _ => {}
        }

        let commands = self
            .commands
            .iter()
            .filter(|(address, _, _)| *address == target.address)
            .map(|(_, needle, behavior)| (needle.clone(), behavior.clone()))
            .collect();

        self.recorder.opened();
        Ok(Box::new(MockSession {
            target: target.clone(),
            behavior: self.behavior_for(&target.address).clone(),
            commands,
            delay: self.delay,
            recorder: Arc::clone(&self.recorder),
            closed: false,
        }))
    }
}

struct MockSession {
    target: RemoteTarget,
    behavior: MockBehavior,
    commands: Vec<(String, MockBehavior)>,
    delay: Option<Duration>,
    recorder: Arc<Recorder>,
    closed: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn run(
        &mut self,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> SessionResult<CommandOutcome> {
        if self.closed {
            return Err(SessionError::Closed);
        }
        self.recorder.runs.lock().unwrap().push(RecordedRun {
            address: self.target.address.clone(),
            command: command.to_string(),
        });

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let behavior = self
            .commands
            .iter()
            .find(|(needle, _)| command.contains(needle.as_str()))
            .map(|(_, b)| b)
            .unwrap_or(&self.behavior);

        match behavior {
            MockBehavior::Succeed(output) => {
                replay(sink, output).await;
                Ok(CommandOutcome {
                    exit_code: 0,
                    output: output.clone(),
                })
            }
            MockBehavior::Exit { code, output } => {
                replay(sink, output).await;
                Ok(CommandOutcome {
                    exit_code: *code,
                    output: output.clone(),
                })
            }
            MockBehavior::DropConnection(reason) => Err(SessionError::Transport {
                address: self.target.address.clone(),
                reason: reason.clone(),
                output: RemoteOutput::default(),
            }),
            MockBehavior::DropAfter { output, reason } => {
                replay(sink, output).await;
                Err(SessionError::Transport {
                    address: self.target.address.clone(),
                    reason: reason.clone(),
                    output: output.clone(),
                })
            }
            // Connection-level behaviours never reach an open session.
            MockBehavior::Refuse(_) | MockBehavior::Timeout => Ok(CommandOutcome {
                exit_code: 0,
                output: RemoteOutput::default(),
            }),
        }
    }

    async fn close(&mut self) -> SessionResult<()> {
        if !self.closed {
            self.closed = true;
            self.recorder.released();
            self.recorder
                .closes
                .lock()
                .unwrap()
                .push(self.target.address.clone());
        }
        Ok(())
    }
}

/// Stdout first, then stderr, one chunk each.
async fn replay(sink: &mut dyn OutputSink, output: &RemoteOutput) {
    if !output.stdout.is_empty() {
        sink.chunk(OutputStream::Stdout, &output.stdout).await;
    }
    if !output.stderr.is_empty() {
        sink.chunk(OutputStream::Stderr, &output.stderr).await;
    }
}

impl Drop for MockSession {
    fn drop(&mut self) {
        if !self.closed {
            self.recorder.released();
            self.recorder.dropped_open.fetch_add(1, Ordering::SeqCst);
        }
    }
}
