//! Host roster and the per-run targets resolved from it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Login used when neither the credentials nor the host override one.
pub const DEFAULT_USER: &str = "ec2-user";

/// Default SSH port.
pub const DEFAULT_PORT: u16 = 22;

/// One roster line: a 1-based position and the address behind it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntry {
    /// 1-based position in the roster.
    pub index: u32,
    /// Hostname or IP address.
    pub address: String,
    /// Per-host login override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Per-host key file override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
    /// Per-host port override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl HostEntry {
    pub fn new(index: u32, address: impl Into<String>) -> Self {
        Self {
            index,
            address: address.into(),
            user: None,
            key_file: None,
            port: None,
        }
    }
}

/// Fleet-wide login material. Read-only for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    /// Remote login identity.
    #[serde(default = "default_user")]
    pub user: String,
    /// Private key used for authentication. `None` defers to the SSH agent
    /// and the client's own configuration.
    #[serde(default)]
    pub key_file: Option<PathBuf>,
    /// Remote SSH port.
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_user() -> String {
    DEFAULT_USER.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

impl Default for Credentials {
    fn default() -> Self {
        Self {
            user: default_user(),
            key_file: None,
            port: default_port(),
        }
    }
}

/// Ordered, immutable mapping from roster index to host.
///
/// Indices are unique and 1-based; iteration is always ascending by index
/// regardless of the order entries were supplied in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostRoster {
    entries: BTreeMap<u32, HostEntry>,
}

impl HostRoster {
    /// Build a roster, rejecting empty, zero-indexed, duplicate or blank entries.
    pub fn new(entries: impl IntoIterator<Item = HostEntry>) -> ConfigResult<Self> {
        let mut map = BTreeMap::new();
        for entry in entries {
            if entry.index == 0 {
                return Err(ConfigError::ZeroIndex {
                    address: entry.address,
                });
            }
            if entry.address.trim().is_empty() {
                return Err(ConfigError::EmptyAddress(entry.index));
            }
            if map.contains_key(&entry.index) {
                return Err(ConfigError::DuplicateIndex(entry.index));
            }
            map.insert(entry.index, entry);
        }
        if map.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        Ok(Self { entries: map })
    }

    /// Build a roster from bare addresses, numbered from 1 in the given order.
    pub fn from_addresses<I, S>(addresses: I) -> ConfigResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(
            addresses
                .into_iter()
                .zip(1u32..)
                .map(|(address, index)| HostEntry::new(index, address)),
        )
    }

    /// Parse the inline `--hosts` form: `1=10.0.0.1,2=10.0.0.2`.
    ///
    /// Entries without `=` are numbered by position.
    pub fn parse_inline(input: &str) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::Parse {
            path: "--hosts".to_string(),
            reason,
        };

        let mut entries = Vec::new();
        for (position, item) in input
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .enumerate()
        {
            let entry = match item.split_once('=') {
                Some((index, address)) => {
                    let index = index
                        .trim()
                        .parse::<u32>()
                        .map_err(|e| invalid(format!("bad index in {item:?}: {e}")))?;
                    HostEntry::new(index, address.trim())
                }
                None => HostEntry::new(position as u32 + 1, item),
            };
            entries.push(entry);
        }
        Self::new(entries)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, index: u32) -> bool {
        self.entries.contains_key(&index)
    }

    pub fn get(&self, index: u32) -> Option<&HostEntry> {
        self.entries.get(&index)
    }

    /// Entries in ascending index order.
    pub fn iter(&self) -> impl Iterator<Item = &HostEntry> {
        self.entries.values()
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.keys().copied()
    }

    /// Resolve the entry at `index` into a target using `credentials` for
    /// anything the entry does not override.
    pub fn target(&self, index: u32, credentials: &Credentials) -> Option<RemoteTarget> {
        self.get(index)
            .map(|entry| RemoteTarget::resolve(entry, credentials))
    }
}

/// A single host ready to be contacted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTarget {
    pub index: u32,
    pub address: String,
    pub user: String,
    pub key_file: Option<PathBuf>,
    pub port: u16,
}

impl RemoteTarget {
    pub fn resolve(entry: &HostEntry, credentials: &Credentials) -> Self {
        Self {
            index: entry.index,
            address: entry.address.clone(),
            user: entry.user.clone().unwrap_or_else(|| credentials.user.clone()),
            key_file: entry
                .key_file
                .clone()
                .or_else(|| credentials.key_file.clone()),
            port: entry.port.unwrap_or(credentials.port),
        }
    }

    /// `user@address`, as passed to the SSH client.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.address)
    }
}

impl fmt::Display for RemoteTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{} {}", self.index, self.destination())
    }
}
