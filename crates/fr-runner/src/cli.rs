//! Command-line interface and its translation into a `FleetPlan`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use fr_protocol::{
    CapturePolicy, CommandJob, CommandTemplate, ConfigError, ConfigResult, Credentials,
    HostRoster, Selection,
};
use fr_session::SshOptions;

use crate::config::RosterFile;
use crate::fleet::FleetPlan;

#[derive(Debug, Parser)]
#[command(
    name = "fleetrun",
    version,
    about = "Run a prepared command across a roster of SSH hosts, then a leader benchmark"
)]
pub struct Cli {
    /// Emit logs as JSON lines on stderr.
    #[arg(long, global = true)]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the worker phase and the optional leader phase.
    Run(RunArgs),
    /// Print targets and rendered commands without connecting.
    Plan(RunArgs),
}

#[derive(Debug, Clone, Args)]
pub struct RunArgs {
    /// TOML roster file.
    #[arg(long, value_name = "FILE", required_unless_present = "hosts", conflicts_with = "hosts")]
    pub roster: Option<PathBuf>,

    /// Inline roster, e.g. `1=10.0.0.1,2=10.0.0.2`.
    #[arg(long, value_name = "LIST")]
    pub hosts: Option<String>,

    /// Login user for every host.
    #[arg(long)]
    pub user: Option<String>,

    /// Private key file.
    #[arg(long, value_name = "PATH")]
    pub key: Option<PathBuf>,

    /// SSH port.
    #[arg(long)]
    pub port: Option<u16>,

    /// Which roster indices run the worker job: `all`, `index < 2`, `1..3`, `1,3`.
    #[arg(long, value_name = "PREDICATE")]
    pub select: Option<String>,

    /// Worker command, or `@name` for a job from the roster file.
    #[arg(long, value_name = "TEMPLATE|@NAME")]
    pub job: Option<String>,

    /// Remote working directory for both the worker and the leader job,
    /// replacing theirs, including that of `@name` jobs.
    #[arg(long, value_name = "DIR")]
    pub workdir: Option<String>,

    /// Setup step run before the command; repeatable. Replaces the setup of
    /// both the worker and the leader job, including `@name` jobs.
    #[arg(long = "setup", value_name = "STEP")]
    pub setup: Vec<String>,

    /// Roster index of the leader.
    #[arg(long, value_name = "INDEX")]
    pub leader: Option<u32>,

    /// Leader command, or `@name`.
    #[arg(long, value_name = "TEMPLATE|@NAME")]
    pub leader_job: Option<String>,

    /// Write the leader's stdout and stderr to this file.
    #[arg(long, value_name = "PATH")]
    pub capture: Option<PathBuf>,

    /// Worker sessions allowed at once.
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Report a failed leader instead of aborting with its exit code.
    #[arg(long)]
    pub no_leader_fatal: bool,

    /// Skip the leader if any worker failed.
    #[arg(long)]
    pub strict_workers: bool,

    /// SSH connect timeout in seconds.
    #[arg(long, value_name = "SECS")]
    pub connect_timeout: Option<u64>,

    /// Print the report as JSON instead of the summary. Remote output is
    /// not echoed, so stdout stays parseable.
    #[arg(long)]
    pub json: bool,

    /// Do not echo remote output while it runs.
    #[arg(long)]
    pub quiet: bool,
}

/// Everything needed to start a run.
#[derive(Debug, Clone)]
pub struct Invocation {
    pub roster: HostRoster,
    pub credentials: Credentials,
    pub ssh: SshOptions,
    pub plan: FleetPlan,
}

impl RunArgs {
    /// Merge the roster file (or inline hosts) with the flags and validate
    /// the resulting plan.
    pub fn load(&self) -> ConfigResult<Invocation> {
        let file = match (&self.roster, &self.hosts) {
            (Some(path), _) => RosterFile::from_file(path)?,
            (None, Some(hosts)) => RosterFile::inline(hosts)?,
            (None, None) => return Err(ConfigError::EmptyRoster),
        };
        self.resolve(file)
    }

    fn resolve(&self, file: RosterFile) -> ConfigResult<Invocation> {
        let roster = file.roster()?;

        let mut credentials = file.credentials.clone();
        if let Some(user) = &self.user {
            credentials.user = user.clone();
        }
        if let Some(key) = &self.key {
            credentials.key_file = Some(key.clone());
        }
        if let Some(port) = self.port {
            credentials.port = port;
        }

        let mut ssh = file.ssh.clone();
        if let Some(secs) = self.connect_timeout {
            ssh.connect_timeout_secs = secs;
        }

        let selection = match &self.select {
            Some(text) => text.parse::<Selection>()?,
            None => file.run.select.clone().unwrap_or_default(),
        };

        let job_ref = self
            .job
            .as_deref()
            .or(file.run.job.as_deref())
            .ok_or(ConfigError::MissingJob)?;
        let (name, template) = file.resolve_job(job_ref, "job")?;
        let job = CommandJob::new(name, self.apply_overrides(template));

        let leader_index = self.leader.or(file.run.leader);
        let leader_ref = self.leader_job.as_deref().or(file.run.leader_job.as_deref());
        let capture = self.capture.clone().or_else(|| file.run.capture.clone());

        let mut plan = FleetPlan::new(selection, job)
            .with_concurrency(self.concurrency.or(file.run.concurrency).unwrap_or(1))
            .with_leader_fatal(!self.no_leader_fatal)
            .with_strict_workers(self.strict_workers);

        match (leader_index, leader_ref) {
            (Some(index), Some(job_ref)) => {
                let (name, template) = file.resolve_job(job_ref, "leader")?;
                let job = CommandJob::new(name, self.apply_overrides(template))
                    .with_capture(CapturePolicy::from(capture));
                plan = plan.with_leader(index, job);
            }
            (Some(index), None) => return Err(ConfigError::LeaderWithoutJob(index)),
            (None, Some(_)) => return Err(ConfigError::JobWithoutLeader),
            (None, None) => {
                if let Some(path) = capture {
                    return Err(ConfigError::CaptureWithoutLeader(
                        path.display().to_string(),
                    ));
                }
            }
        }

        plan.validate(&roster)?;
        Ok(Invocation {
            roster,
            credentials,
            ssh,
            plan,
        })
    }

    /// `--workdir` and `--setup` apply to the worker and the leader job alike.
    fn apply_overrides(&self, mut template: CommandTemplate) -> CommandTemplate {
        if let Some(dir) = &self.workdir {
            template.workdir = Some(dir.clone());
        }
        if !self.setup.is_empty() {
            template.setup = self.setup.clone();
        }
        template
    }
}
