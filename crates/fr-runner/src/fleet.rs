//! Fleet orchestration: worker phase over the selected targets, then an
//! optional leader phase.
//!
//! Per-target failures never abort the fleet. Every selected target yields
//! exactly one `RunResult`, and `run_fleet` returns worker results in
//! roster order whatever order they completed in. Cancellation is checked
//! before each target starts; anything not started is reported as
//! `cancelled` without opening a session.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use fr_protocol::{
    CommandJob, ConfigError, ConfigResult, Credentials, FleetReport, HostRoster, Phase,
    RemoteTarget, RunError, RunResult, RunStatus, Selection,
};
use fr_session::SessionConnector;

use crate::cancel::CancelToken;
use crate::error::FleetError;
use crate::executor;

/// Channel depth for `run_fleet_streaming`.
const STREAM_CAPACITY: usize = 64;

/// Worker targets plus the resolved leader target and job.
type Resolved = (Vec<RemoteTarget>, Option<(RemoteTarget, CommandJob)>);

/// The distinguished measured run.
#[derive(Debug, Clone)]
pub struct LeaderPhase {
    pub index: u32,
    pub job: CommandJob,
}

/// What to run, where, and how failures are treated.
#[derive(Debug, Clone)]
pub struct FleetPlan {
    pub selection: Selection,
    /// Worker job. Capture is only honoured on the leader.
    pub job: CommandJob,
    pub leader: Option<LeaderPhase>,
    /// Maximum sessions open at once during the worker phase.
    pub concurrency: usize,
    /// A failed leader run ends the fleet with `FleetError::LeaderFailed`,
    /// which still carries the full report.
    pub leader_fatal: bool,
    /// Skip the leader (reported as cancelled) if any worker failed.
    pub strict_workers: bool,
}

impl FleetPlan {
    pub fn new(selection: Selection, job: CommandJob) -> Self {
        Self {
            selection,
            job,
            leader: None,
            concurrency: 1,
            leader_fatal: true,
            strict_workers: false,
        }
    }

    pub fn with_leader(mut self, index: u32, job: CommandJob) -> Self {
        self.leader = Some(LeaderPhase { index, job });
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    pub fn with_leader_fatal(mut self, leader_fatal: bool) -> Self {
        self.leader_fatal = leader_fatal;
        self
    }

    pub fn with_strict_workers(mut self, strict_workers: bool) -> Self {
        self.strict_workers = strict_workers;
        self
    }

    /// Reject the plan before any host is contacted.
    pub fn validate(&self, roster: &HostRoster) -> ConfigResult<()> {
        if roster.is_empty() {
            return Err(ConfigError::EmptyRoster);
        }
        if self.concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        self.job.template.validate()?;
        if let Some(path) = self.job.capture.path() {
            return Err(ConfigError::CaptureWithoutLeader(path.display().to_string()));
        }
        if let Some(leader) = &self.leader {
            if !roster.contains(leader.index) {
                return Err(ConfigError::LeaderNotInRoster(leader.index));
            }
            leader.job.template.validate()?;
        }
        Ok(())
    }
}

/// A run `plan` would perform, without performing it.
#[derive(Debug, Clone)]
pub struct PlannedRun {
    pub phase: Phase,
    pub target: RemoteTarget,
    pub job: String,
    pub command: String,
    pub capture: Option<std::path::PathBuf>,
}

/// Targets matching `selection`, in roster order.
pub fn select_targets(
    roster: &HostRoster,
    selection: &Selection,
    credentials: &Credentials,
) -> Vec<RemoteTarget> {
    roster
        .iter()
        .filter(|entry| selection.matches(entry.index))
        .map(|entry| RemoteTarget::resolve(entry, credentials))
        .collect()
}

/// Runs plans against a roster through an injected connector.
#[derive(Clone)]
pub struct FleetRunner {
    connector: Arc<dyn SessionConnector>,
    credentials: Arc<Credentials>,
    cancel: CancelToken,
    echo: bool,
}

impl FleetRunner {
    pub fn new(connector: Arc<dyn SessionConnector>, credentials: Credentials) -> Self {
        Self {
            connector,
            credentials: Arc::new(credentials),
            cancel: CancelToken::new(),
            echo: false,
        }
    }

    /// Use an externally owned token, e.g. one wired to Ctrl-C.
    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Copy remote output to the local stdout/stderr while targets run.
    pub fn with_echo(mut self, echo: bool) -> Self {
        self.echo = echo;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn select_targets(&self, roster: &HostRoster, selection: &Selection) -> Vec<RemoteTarget> {
        select_targets(roster, selection, &self.credentials)
    }

    /// Validate `plan` and list the commands it would run. Opens nothing.
    pub fn plan(
        &self,
        roster: &HostRoster,
        plan: &FleetPlan,
    ) -> Result<Vec<PlannedRun>, FleetError> {
        let (workers, leader) = self.prepare(roster, plan)?;
        let mut runs: Vec<PlannedRun> = workers
            .into_iter()
            .map(|target| PlannedRun {
                phase: Phase::Worker,
                command: plan.job.template.render(&target),
                job: plan.job.name.clone(),
                capture: None,
                target,
            })
            .collect();
        if let Some((target, job)) = leader {
            runs.push(PlannedRun {
                phase: Phase::Leader,
                command: job.template.render(&target),
                job: job.name.clone(),
                capture: job.capture.path().map(|p| p.to_path_buf()),
                target,
            });
        }
        Ok(runs)
    }

    /// Run the worker phase, then the leader phase, and report everything.
    pub async fn run_fleet(
        &self,
        roster: &HostRoster,
        plan: &FleetPlan,
    ) -> Result<FleetReport, FleetError> {
        let (workers, leader) = self.prepare(roster, plan)?;
        self.run_phases(workers, leader, plan, None).await
    }

    /// Same as `run_fleet`, but each result is sent as soon as it is known:
    /// workers in completion order, the leader last. The channel closes when
    /// the run is over. Configuration errors are returned before anything
    /// starts. Dropping the receiver stops new targets from starting; the
    /// runner's own token is left alone.
    pub fn run_fleet_streaming(
        &self,
        roster: &HostRoster,
        plan: &FleetPlan,
    ) -> Result<mpsc::Receiver<RunResult>, FleetError> {
        let (workers, leader) = self.prepare(roster, plan)?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);

        let runner = self.clone().with_cancel(self.cancel.child());
        let plan = plan.clone();
        tokio::spawn(async move {
            match runner.run_phases(workers, leader, &plan, Some(&tx)).await {
                Ok(report) => tracing::debug!(run_id = %report.run_id, "stream finished"),
                Err(e) => tracing::debug!(error = %e, "stream finished with error"),
            }
        });

        Ok(rx)
    }

    fn prepare(
        &self,
        roster: &HostRoster,
        plan: &FleetPlan,
    ) -> Result<Resolved, FleetError> {
        plan.validate(roster)?;
        let workers = self.select_targets(roster, &plan.selection);
        let leader = match &plan.leader {
            Some(leader) => {
                let target = roster
                    .target(leader.index, &self.credentials)
                    .ok_or(ConfigError::LeaderNotInRoster(leader.index))?;
                Some((target, leader.job.clone()))
            }
            None => None,
        };
        Ok((workers, leader))
    }

    async fn run_phases(
        &self,
        workers: Vec<RemoteTarget>,
        leader: Option<(RemoteTarget, CommandJob)>,
        plan: &FleetPlan,
        tx: Option<&mpsc::Sender<RunResult>>,
    ) -> Result<FleetReport, FleetError> {
        let started_at = Utc::now();
        tracing::info!(
            selection = %plan.selection,
            workers = workers.len(),
            leader = ?leader.as_ref().map(|(t, _)| t.index),
            concurrency = plan.concurrency,
            "fleet run starting"
        );

        let worker_results = self
            .run_workers(workers, &plan.job, plan.concurrency, tx)
            .await;

        let leader_result = match leader {
            Some((target, job)) => {
                let result = if self.cancel.is_cancelled() {
                    RunResult::cancelled(Phase::Leader, &target, &job.name)
                } else if plan.strict_workers && worker_results.iter().any(|r| !r.succeeded()) {
                    tracing::warn!(
                        index = target.index,
                        address = %target.address,
                        "worker phase had failures, skipping leader"
                    );
                    RunResult::cancelled(Phase::Leader, &target, &job.name)
                } else {
                    executor::execute_with(
                        self.connector.as_ref(),
                        &target,
                        &job,
                        Phase::Leader,
                        self.echo,
                    )
                    .await
                };
                emit(tx, &self.cancel, &result).await;
                Some(result)
            }
            None => None,
        };

        let leader_failed = leader_result
            .as_ref()
            .is_some_and(|r| r.status == RunStatus::Failed);
        let mut report = FleetReport::new(worker_results, leader_result);
        report.started_at = started_at;

        if leader_failed && plan.leader_fatal {
            tracing::error!(
                run_id = %report.run_id,
                exit_code = report.exit_code(),
                "leader failed, fleet run aborted"
            );
            return Err(FleetError::LeaderFailed(Box::new(report)));
        }
        tracing::info!(
            run_id = %report.run_id,
            failed = report.failed_count(),
            exit_code = report.exit_code(),
            "fleet run finished"
        );
        Ok(report)
    }

    /// At most `concurrency` targets in flight; a new one starts only when a
    /// slot frees up, so `concurrency = 1` is strictly sequential.
    async fn run_workers(
        &self,
        targets: Vec<RemoteTarget>,
        job: &CommandJob,
        concurrency: usize,
        tx: Option<&mpsc::Sender<RunResult>>,
    ) -> Vec<RunResult> {
        let job = Arc::new(job.clone());
        let mut slots: Vec<Option<RunResult>> = vec![None; targets.len()];
        let mut tasks = JoinSet::new();

        for (slot, target) in targets.iter().enumerate() {
            while tasks.len() >= concurrency.max(1) {
                if let Some(joined) = tasks.join_next().await {
                    collect(joined, &mut slots, tx, &self.cancel).await;
                }
            }

            if self.cancel.is_cancelled() {
                let result = RunResult::cancelled(Phase::Worker, target, &job.name);
                emit(tx, &self.cancel, &result).await;
                slots[slot] = Some(result);
                continue;
            }

            let connector = Arc::clone(&self.connector);
            let job = Arc::clone(&job);
            let target = target.clone();
            let echo = self.echo;
            tasks.spawn(async move {
                let result =
                    executor::execute_with(connector.as_ref(), &target, &job, Phase::Worker, echo)
                        .await;
                (slot, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            collect(joined, &mut slots, tx, &self.cancel).await;
        }

        slots
            .into_iter()
            .zip(&targets)
            .map(|(result, target)| result.unwrap_or_else(|| aborted(target, &job.name)))
            .collect()
    }
}

async fn collect(
    joined: Result<(usize, RunResult), tokio::task::JoinError>,
    slots: &mut [Option<RunResult>],
    tx: Option<&mpsc::Sender<RunResult>>,
    cancel: &CancelToken,
) {
    match joined {
        Ok((slot, result)) => {
            emit(tx, cancel, &result).await;
            slots[slot] = Some(result);
        }
        Err(e) => tracing::error!(error = %e, "worker task aborted"),
    }
}

/// Send `result` to the stream, if any. Once the receiver is gone nobody is
/// listening, so `cancel` fires and no further target starts.
async fn emit(tx: Option<&mpsc::Sender<RunResult>>, cancel: &CancelToken, result: &RunResult) {
    if let Some(tx) = tx {
        if tx.send(result.clone()).await.is_err() && !cancel.is_cancelled() {
            tracing::warn!(index = result.index, "stream receiver dropped, stopping run");
            cancel.cancel();
        }
    }
}

/// Result for a worker whose task died without reporting.
fn aborted(target: &RemoteTarget, job: &str) -> RunResult {
    RunResult {
        phase: Phase::Worker,
        index: target.index,
        address: target.address.clone(),
        job: job.to_string(),
        status: RunStatus::Failed,
        exit_code: None,
        error: Some(RunError::Connection {
            address: target.address.clone(),
            reason: "worker task aborted".into(),
        }),
        capture_path: None,
        started_at: Utc::now(),
        duration_ms: 0,
        output: None,
    }
}
