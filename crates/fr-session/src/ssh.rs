//! OpenSSH-backed sessions.
//!
//! `connect` starts a master connection (`ssh -M -N`) bound to a private
//! control socket and waits until it answers `-O check`. Each `run` is a
//! multiplexed `ssh -S <socket>` client, so authentication happens once per
//! session. `close` asks the master to exit; dropping the session kills the
//! local master process and removes the socket.
//!
//! Known limitation: tearing down the local side while a command runs does
//! not guarantee the remote process is killed.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time::Instant;

use fr_protocol::{RemoteOutput, RemoteTarget};

use crate::config::SshOptions;
use crate::error::{SessionError, SessionResult};
use crate::session::{CommandOutcome, OutputSink, OutputStream, RemoteSession, SessionConnector};

/// Exit status the OpenSSH client uses for its own failures.
const SSH_ERROR_STATUS: i32 = 255;

/// Delay between control-socket readiness checks.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Extra time past `ConnectTimeout` before giving up on the master.
const CONNECT_GRACE: Duration = Duration::from_secs(5);

/// Pipe read size while streaming remote output.
const READ_CHUNK: usize = 8 * 1024;

static SOCKET_SEQ: AtomicU64 = AtomicU64::new(0);

/// Connector that shells out to the OpenSSH client.
#[derive(Debug, Clone, Default)]
pub struct SshConnector {
    options: SshOptions,
}

impl SshConnector {
    pub fn new(options: SshOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &SshOptions {
        &self.options
    }

    /// Arguments shared by the master connection.
    fn master_args(&self, target: &RemoteTarget, socket: &Path) -> Vec<String> {
        let opts = &self.options;
        let mut args = vec![
            "-M".to_string(),
            "-N".to_string(),
            "-S".to_string(),
            socket.display().to_string(),
            "-p".to_string(),
            target.port.to_string(),
            "-o".to_string(),
            "ControlPersist=no".to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", opts.connect_timeout_secs),
            "-o".to_string(),
            format!("StrictHostKeyChecking={}", opts.strict_host_key_checking),
            "-o".to_string(),
            format!("ServerAliveInterval={}", opts.server_alive_interval_secs),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
        ];
        if let Some(key) = &target.key_file {
            args.push("-i".to_string());
            args.push(key.display().to_string());
            args.push("-o".to_string());
            args.push("IdentitiesOnly=yes".to_string());
        }
        args.extend(opts.extra_args.iter().cloned());
        args.push(target.destination());
        args
    }

    fn control_path(&self, target: &RemoteTarget) -> PathBuf {
        let seq = SOCKET_SEQ.fetch_add(1, Ordering::Relaxed);
        self.options.control_dir().join(format!(
            "fr-{}-{}-{seq}.sock",
            std::process::id(),
            target.index
        ))
    }
}

#[async_trait]
impl SessionConnector for SshConnector {
    async fn connect(&self, target: &RemoteTarget) -> SessionResult<Box<dyn RemoteSession>> {
        let socket = self.control_path(target);
        let program = self.options.program.clone();

        tracing::debug!(
            address = %target.address,
            socket = %socket.display(),
            "starting ssh master"
        );

        let mut master = Command::new(&program)
            .args(self.master_args(target, &socket))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Spawn(format!("{program}: {e}")))?;

        let timeout = self.options.connect_timeout() + CONNECT_GRACE;
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(status) = master.try_wait()? {
                let reason = read_stderr(&mut master).await;
                let reason = if reason.is_empty() {
                    format!("ssh master exited with {status}")
                } else {
                    reason
                };
                remove_socket(&socket);
                return Err(SessionError::Connect {
                    address: target.address.clone(),
                    reason,
                });
            }

            if control_check(&program, &socket, target).await {
                break;
            }

            if Instant::now() >= deadline {
                let _ = master.kill().await;
                remove_socket(&socket);
                return Err(SessionError::Timeout {
                    address: target.address.clone(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }

        tracing::debug!(address = %target.address, "ssh master ready");

        Ok(Box::new(SshSession {
            target: target.clone(),
            program,
            socket,
            command_timeout: self.options.command_timeout(),
            master: Some(master),
        }))
    }
}

/// An open multiplexed OpenSSH session.
pub struct SshSession {
    target: RemoteTarget,
    program: String,
    socket: PathBuf,
    command_timeout: Option<Duration>,
    master: Option<Child>,
}

impl SshSession {
    /// A client riding the master connection. `control` lands before the
    /// destination; anything after it would be sent as the remote command.
    fn client(&self, control: &[&str]) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.arg("-S")
            .arg(&self.socket)
            .arg("-o")
            .arg("ControlMaster=no")
            .arg("-o")
            .arg("BatchMode=yes")
            .arg("-T")
            .args(control)
            .arg(self.target.destination());
        cmd
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn target(&self) -> &RemoteTarget {
        &self.target
    }

    async fn run(
        &mut self,
        command: &str,
        sink: &mut dyn OutputSink,
    ) -> SessionResult<CommandOutcome> {
        if self.master.is_none() {
            return Err(SessionError::Closed);
        }

        let mut child = self
            .client(&[])
            .arg(command)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Spawn(format!("{}: {e}", self.program)))?;

        let (status, output) = match self.command_timeout {
            Some(limit) => tokio::time::timeout(limit, pump(&mut child, sink))
                .await
                .map_err(|_| SessionError::Timeout {
                    address: self.target.address.clone(),
                    timeout_ms: limit.as_millis() as u64,
                })??,
            None => pump(&mut child, sink).await?,
        };

        match status.code() {
            // 255 is also the client's own failure status. The remote command
            // owns it only while the master still answers.
            Some(SSH_ERROR_STATUS) => {
                if control_check(&self.program, &self.socket, &self.target).await {
                    Ok(CommandOutcome {
                        exit_code: SSH_ERROR_STATUS,
                        output,
                    })
                } else {
                    Err(SessionError::Transport {
                        address: self.target.address.clone(),
                        reason: lost_reason(&output),
                        output,
                    })
                }
            }
            Some(exit_code) => Ok(CommandOutcome { exit_code, output }),
            None => Err(SessionError::Transport {
                address: self.target.address.clone(),
                reason: "ssh client terminated by signal".into(),
                output,
            }),
        }
    }

    async fn close(&mut self) -> SessionResult<()> {
        let Some(mut master) = self.master.take() else {
            return Ok(());
        };

        let exit = self
            .client(&["-O", "exit"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;
        if let Err(e) = exit {
            tracing::warn!(address = %self.target.address, error = %e, "ssh -O exit failed");
        }

        match tokio::time::timeout(Duration::from_secs(2), master.wait()).await {
            Ok(_) => {}
            Err(_) => {
                let _ = master.kill().await;
            }
        }
        remove_socket(&self.socket);
        tracing::debug!(address = %self.target.address, "ssh session closed");
        Ok(())
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if let Some(mut master) = self.master.take() {
            let _ = master.start_kill();
            remove_socket(&self.socket);
        }
    }
}

async fn control_check(program: &str, socket: &Path, target: &RemoteTarget) -> bool {
    Command::new(program)
        .arg("-S")
        .arg(socket)
        .arg("-O")
        .arg("check")
        .arg(target.destination())
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Forward both pipes of `child` to `sink` until they close, then reap it.
async fn pump(
    child: &mut Child,
    sink: &mut dyn OutputSink,
) -> std::io::Result<(ExitStatus, RemoteOutput)> {
    let (Some(mut stdout), Some(mut stderr)) = (child.stdout.take(), child.stderr.take()) else {
        return Err(std::io::Error::other("ssh client pipes not captured"));
    };

    let mut output = RemoteOutput::default();
    let mut out_buf = vec![0u8; READ_CHUNK];
    let mut err_buf = vec![0u8; READ_CHUNK];
    let (mut out_open, mut err_open) = (true, true);

    while out_open || err_open {
        tokio::select! {
            n = stdout.read(&mut out_buf), if out_open => match n? {
                0 => out_open = false,
                n => {
                    sink.chunk(OutputStream::Stdout, &out_buf[..n]).await;
                    output.stdout.extend_from_slice(&out_buf[..n]);
                }
            },
            n = stderr.read(&mut err_buf), if err_open => match n? {
                0 => err_open = false,
                n => {
                    sink.chunk(OutputStream::Stderr, &err_buf[..n]).await;
                    output.stderr.extend_from_slice(&err_buf[..n]);
                }
            },
        }
    }

    let status = child.wait().await?;
    Ok((status, output))
}

fn lost_reason(output: &RemoteOutput) -> String {
    let tail = output.tail(3);
    if tail.is_empty() {
        "ssh exited with status 255 and the master is gone".into()
    } else {
        tail
    }
}

async fn read_stderr(child: &mut Child) -> String {
    let mut text = String::new();
    if let Some(mut stderr) = child.stderr.take() {
        let _ = stderr.read_to_string(&mut text).await;
    }
    text.trim().to_string()
}

fn remove_socket(socket: &Path) {
    if socket.exists() {
        let _ = std::fs::remove_file(socket);
    }
}
