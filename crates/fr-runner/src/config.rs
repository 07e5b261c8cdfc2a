//! Roster file configuration, loadable from TOML.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use fr_protocol::{
    CommandTemplate, ConfigError, ConfigResult, Credentials, HostEntry, HostRoster, Selection,
};
use fr_session::SshOptions;

/// Everything a roster file can carry.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RosterFile {
    /// Fleet-wide login material.
    #[serde(default)]
    pub credentials: Credentials,
    /// OpenSSH client settings.
    #[serde(default)]
    pub ssh: SshOptions,
    /// Enumerated hosts.
    #[serde(default)]
    pub hosts: Vec<HostEntry>,
    /// Named command templates, referenced as `@name`.
    #[serde(default)]
    pub jobs: BTreeMap<String, CommandTemplate>,
    /// Defaults for flags not given on the command line.
    #[serde(default)]
    pub run: RunDefaults,
}

/// `[run]` table: fallbacks for the CLI flags of the same name.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RunDefaults {
    #[serde(default)]
    pub select: Option<Selection>,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub leader: Option<u32>,
    #[serde(default)]
    pub leader_job: Option<String>,
    #[serde(default)]
    pub capture: Option<PathBuf>,
    #[serde(default)]
    pub concurrency: Option<usize>,
}

impl RosterFile {
    /// Load a roster file from disk.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            reason: e.message().to_string(),
        })
    }

    /// A roster built from the inline `--hosts` list.
    pub fn inline(hosts: &str) -> ConfigResult<Self> {
        let roster = HostRoster::parse_inline(hosts)?;
        Ok(Self {
            hosts: roster.iter().cloned().collect(),
            ..Default::default()
        })
    }

    pub fn roster(&self) -> ConfigResult<HostRoster> {
        HostRoster::new(self.hosts.iter().cloned())
    }

    /// Resolve `@name` against `[jobs]`, or treat `job_ref` as a literal
    /// command named `fallback_name`.
    pub fn resolve_job(
        &self,
        job_ref: &str,
        fallback_name: &str,
    ) -> ConfigResult<(String, CommandTemplate)> {
        match job_ref.strip_prefix('@') {
            Some(name) => self
                .jobs
                .get(name)
                .map(|template| (name.to_string(), template.clone()))
                .ok_or_else(|| ConfigError::UnknownJob(name.to_string())),
            None => Ok((fallback_name.to_string(), CommandTemplate::new(job_ref))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"
[credentials]
user = "ec2-user"
key_file = "/home/ops/.ssh/voltfs.pem"

[ssh]
connect_timeout_secs = 5

[[hosts]]
index = 1
address = "3.95.218.253"

[[hosts]]
index = 2
address = "54.80.12.7"
user = "ubuntu"

[jobs.prepare]
workdir = "/home/ec2-user/voltfs/hadoop-3.3.0-SNAPSHOT"
setup = ["source etc/hadoop/hadoop-env.sh"]
command = "bash test.sh"

[jobs.benchmark]
workdir = "/home/ec2-user/voltfs/hadoop-3.3.0-SNAPSHOT"
command = "./bin/hadoop org.apache.hadoop.hdfs.server.namenode.NNThroughputBenchmark -op create"

[run]
select = "index < 2"
leader = 2
leader_job = "@benchmark"
capture = "out.txt"
"#;

    #[test]
    fn deserialize_minimal_roster() {
        let toml = r#"
[[hosts]]
index = 1
address = "10.0.0.1"
"#;
        let file: RosterFile = toml::from_str(toml).unwrap();
        assert_eq!(file.credentials.user, "ec2-user"); // default
        assert_eq!(file.credentials.port, 22); // default
        assert_eq!(file.ssh.connect_timeout_secs, 10); // default
        assert!(file.jobs.is_empty());
        assert!(file.run.leader.is_none());
        assert_eq!(file.roster().unwrap().len(), 1);
    }

    #[test]
    fn deserialize_full_roster() {
        let file: RosterFile = toml::from_str(FULL).unwrap();
        assert_eq!(
            file.credentials.key_file.as_deref(),
            Some(Path::new("/home/ops/.ssh/voltfs.pem"))
        );
        assert_eq!(file.ssh.connect_timeout_secs, 5);
        assert_eq!(file.hosts[1].user.as_deref(), Some("ubuntu"));
        assert_eq!(file.jobs["prepare"].setup.len(), 1);
        assert_eq!(file.run.select, Some(Selection::below(2)));
        assert_eq!(file.run.leader, Some(2));
        assert_eq!(file.run.capture.as_deref(), Some(Path::new("out.txt")));
    }

    #[test]
    fn bad_selection_fails_to_parse() {
        let toml = r#"
[run]
select = "index ~ 2"
"#;
        assert!(toml::from_str::<RosterFile>(toml).is_err());
    }

    #[test]
    fn empty_hosts_is_empty_roster() {
        let file: RosterFile = toml::from_str("").unwrap();
        assert_eq!(file.roster().unwrap_err(), ConfigError::EmptyRoster);
    }

    #[test]
    fn resolve_named_and_literal_jobs() {
        let file: RosterFile = toml::from_str(FULL).unwrap();

        let (name, template) = file.resolve_job("@prepare", "job").unwrap();
        assert_eq!(name, "prepare");
        assert_eq!(template.command, "bash test.sh");

        let (name, template) = file.resolve_job("uptime", "job").unwrap();
        assert_eq!(name, "job");
        assert_eq!(template, CommandTemplate::new("uptime"));

        assert_eq!(
            file.resolve_job("@missing", "job").unwrap_err(),
            ConfigError::UnknownJob("missing".into())
        );
    }

    #[test]
    fn from_file_reports_io_and_parse_errors() {
        let dir = tempfile::TempDir::new().unwrap();

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            RosterFile::from_file(&missing),
            Err(ConfigError::Io { .. })
        ));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[[hosts]\nindex = ").unwrap();
        assert!(matches!(
            RosterFile::from_file(&broken),
            Err(ConfigError::Parse { .. })
        ));

        let good = dir.path().join("fleet.toml");
        std::fs::write(&good, FULL).unwrap();
        let file = RosterFile::from_file(&good).unwrap();
        assert_eq!(file.hosts.len(), 2);
    }

    #[test]
    fn inline_roster() {
        let file = RosterFile::inline("1=10.0.0.1,2=10.0.0.2").unwrap();
        assert_eq!(file.hosts.len(), 2);
        assert_eq!(file.hosts[1].address, "10.0.0.2");
        assert!(RosterFile::inline("").is_err());
    }
}
