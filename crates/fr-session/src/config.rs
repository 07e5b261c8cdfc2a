use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// OpenSSH client settings, loadable from the `[ssh]` table of a roster file.
#[derive(Debug, Clone, Deserialize)]
pub struct SshOptions {
    /// Client binary to invoke.
    #[serde(default = "default_program")]
    pub program: String,
    /// Seconds allowed for TCP connect plus authentication.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Optional cap on a single remote command. Benchmarks are long-lived, so
    /// unset by default.
    #[serde(default)]
    pub command_timeout_secs: Option<u64>,
    /// Value for `StrictHostKeyChecking` (`yes`, `accept-new`, `no`).
    #[serde(default = "default_host_key_checking")]
    pub strict_host_key_checking: String,
    /// Seconds between keep-alive messages on the master connection.
    #[serde(default = "default_server_alive")]
    pub server_alive_interval_secs: u64,
    /// Directory for control sockets. Defaults to the system temp dir.
    #[serde(default)]
    pub control_dir: Option<PathBuf>,
    /// Extra arguments passed verbatim before the destination.
    #[serde(default)]
    pub extra_args: Vec<String>,
}

fn default_program() -> String {
    "ssh".to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_host_key_checking() -> String {
    "accept-new".to_string()
}

fn default_server_alive() -> u64 {
    30
}

impl Default for SshOptions {
    fn default() -> Self {
        Self {
            program: default_program(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: None,
            strict_host_key_checking: default_host_key_checking(),
            server_alive_interval_secs: default_server_alive(),
            control_dir: None,
            extra_args: Vec::new(),
        }
    }
}

impl SshOptions {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        self.command_timeout_secs.map(Duration::from_secs)
    }

    pub fn control_dir(&self) -> PathBuf {
        self.control_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}
