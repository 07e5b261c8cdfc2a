//! Single-target executor: one session, one rendered command, one result.
//!
//! The session is closed on every path that opened it. Connection-level
//! failures (refused, timed out, transport lost mid-run) become
//! `RunError::Connection`; a non-zero remote exit becomes
//! `RunError::RemoteExecution` with the tail of the combined output.
//!
//! Remote output is teed while the command runs: optionally echoed to the
//! local console, and mirrored into the capture file. The file receives
//! stdout live and stderr once the command is over, so it always holds
//! stdout followed by stderr, even when the transport drops mid-run.

use std::path::{Path, PathBuf};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use fr_protocol::{
    CommandJob, OUTPUT_TAIL_LINES, Phase, RemoteOutput, RemoteTarget, RunError, RunResult,
    RunStatus,
};
use fr_session::{OutputSink, OutputStream, RemoteSession, SessionConnector, SessionError};

use crate::capture::CaptureSink;

/// Run `job` on `target` without echoing its output.
pub async fn execute(
    connector: &dyn SessionConnector,
    target: &RemoteTarget,
    job: &CommandJob,
    phase: Phase,
) -> RunResult {
    execute_with(connector, target, job, phase, false).await
}

/// Run `job` on `target` and report the outcome. With `echo`, remote
/// stdout and stderr are copied to the local ones as they arrive. Never
/// panics and never returns early without a result.
pub async fn execute_with(
    connector: &dyn SessionConnector,
    target: &RemoteTarget,
    job: &CommandJob,
    phase: Phase,
    echo: bool,
) -> RunResult {
    let run = Attempt::start(phase, target, job);
    let command = job.template.render(target);

    tracing::info!(
        phase = %phase,
        index = target.index,
        address = %target.address,
        job = %job.name,
        "run starting"
    );
    tracing::debug!(address = %target.address, command = %command, "rendered command");

    let mut session = match connector.connect(target).await {
        Ok(session) => session,
        Err(e) => return run.failed(connection_error(target, &e), None),
    };

    let capture = match job.capture.path() {
        Some(path) => match CaptureSink::create(path).await {
            Ok(sink) => Some(sink),
            Err(e) => {
                close(session.as_mut()).await;
                return run.failed(capture_error(path, &e), None);
            }
        },
        None => None,
    };

    let mut tee = Tee::new(capture, echo);
    let outcome = session.run(&command, &mut tee).await;
    close(session.as_mut()).await;
    let capture_path = tee.finish().await;

    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(e) => {
            let output = match &e {
                SessionError::Transport { output, .. } => Some(output.clone()),
                _ => None,
            };
            let mut result = run.failed(connection_error(target, &e), output);
            result.capture_path = capture_path.ok().flatten();
            return result;
        }
    };

    let capture_path = match capture_path {
        Ok(path) => path,
        Err(error) => return run.failed(error, Some(outcome.output)),
    };

    if outcome.success() {
        run.succeeded(outcome.output, capture_path)
    } else {
        let error = RunError::RemoteExecution {
            address: target.address.clone(),
            exit_code: outcome.exit_code,
            output_tail: outcome.output.tail(OUTPUT_TAIL_LINES),
        };
        let mut result = run.failed(error, Some(outcome.output));
        result.capture_path = capture_path;
        result
    }
}

/// Fans remote output out to the console and the capture file.
struct Tee {
    capture: Option<CaptureSink>,
    echo: bool,
    /// Stderr waiting to follow stdout in the capture file.
    held_stderr: Vec<u8>,
    write_error: Option<std::io::Error>,
}

impl Tee {
    fn new(capture: Option<CaptureSink>, echo: bool) -> Self {
        Self {
            capture,
            echo,
            held_stderr: Vec::new(),
            write_error: None,
        }
    }

    /// Complete the capture file. `Ok(None)` when there is none.
    async fn finish(mut self) -> Result<Option<PathBuf>, RunError> {
        let Some(mut sink) = self.capture.take() else {
            return Ok(None);
        };
        if self.write_error.is_none() && !self.held_stderr.is_empty() {
            if let Err(e) = sink.write(&self.held_stderr).await {
                self.write_error = Some(e);
            }
        }
        if let Some(e) = self.write_error {
            return Err(capture_error(sink.path(), &e));
        }
        let path = sink.path().to_path_buf();
        sink.finish()
            .await
            .map(Some)
            .map_err(|e| capture_error(&path, &e))
    }
}

#[async_trait]
impl OutputSink for Tee {
    async fn chunk(&mut self, stream: OutputStream, bytes: &[u8]) {
        if self.echo {
            let echoed = match stream {
                OutputStream::Stdout => echo_to(tokio::io::stdout(), bytes).await,
                OutputStream::Stderr => echo_to(tokio::io::stderr(), bytes).await,
            };
            if let Err(e) = echoed {
                tracing::debug!(error = %e, "console echo failed");
            }
        }

        let Some(sink) = self.capture.as_mut() else {
            return;
        };
        match stream {
            OutputStream::Stdout if self.write_error.is_none() => {
                if let Err(e) = sink.write(bytes).await {
                    tracing::warn!(
                        path = %sink.path().display(),
                        error = %e,
                        "capture write failed"
                    );
                    self.write_error = Some(e);
                }
            }
            OutputStream::Stdout => {}
            OutputStream::Stderr => self.held_stderr.extend_from_slice(bytes),
        }
    }
}

async fn echo_to<W>(mut out: W, bytes: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + Send,
{
    out.write_all(bytes).await?;
    out.flush().await
}

async fn close(session: &mut dyn RemoteSession) {
    if let Err(e) = session.close().await {
        tracing::warn!(address = %session.target().address, error = %e, "session close failed");
    }
}

fn connection_error(target: &RemoteTarget, err: &SessionError) -> RunError {
    let reason = match err {
        SessionError::Connect { reason, .. } | SessionError::Transport { reason, .. } => {
            reason.clone()
        }
        other => other.to_string(),
    };
    RunError::Connection {
        address: target.address.clone(),
        reason,
    }
}

fn capture_error(path: &Path, err: &std::io::Error) -> RunError {
    RunError::Capture {
        path: path.display().to_string(),
        reason: err.to_string(),
    }
}

/// Bookkeeping for one attempt, turned into a `RunResult` exactly once.
struct Attempt<'a> {
    phase: Phase,
    target: &'a RemoteTarget,
    job: &'a str,
    started_at: DateTime<Utc>,
    clock: Instant,
}

impl<'a> Attempt<'a> {
    fn start(phase: Phase, target: &'a RemoteTarget, job: &'a CommandJob) -> Self {
        Self {
            phase,
            target,
            job: &job.name,
            started_at: Utc::now(),
            clock: Instant::now(),
        }
    }

    fn succeeded(self, output: RemoteOutput, capture_path: Option<PathBuf>) -> RunResult {
        let result = self.finish(RunStatus::Succeeded, Some(0), None, Some(output));
        tracing::info!(
            phase = %result.phase,
            index = result.index,
            address = %result.address,
            exit_code = 0,
            duration_ms = result.duration_ms,
            "run succeeded"
        );
        RunResult {
            capture_path,
            ..result
        }
    }

    fn failed(self, error: RunError, output: Option<RemoteOutput>) -> RunResult {
        let exit_code = match &error {
            RunError::RemoteExecution { exit_code, .. } => Some(*exit_code),
            _ => None,
        };
        tracing::warn!(
            phase = %self.phase,
            index = self.target.index,
            address = %self.target.address,
            exit_code = error.exit_code(),
            duration_ms = self.clock.elapsed().as_millis() as u64,
            error = %error,
            "run failed"
        );
        self.finish(RunStatus::Failed, exit_code, Some(error), output)
    }

    fn finish(
        self,
        status: RunStatus,
        exit_code: Option<i32>,
        error: Option<RunError>,
        output: Option<RemoteOutput>,
    ) -> RunResult {
        RunResult {
            phase: self.phase,
            index: self.target.index,
            address: self.target.address.clone(),
            job: self.job.to_string(),
            status,
            exit_code,
            error,
            capture_path: None,
            started_at: self.started_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
            output,
        }
    }
}
