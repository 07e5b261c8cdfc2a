//! FleetRun: prepare a roster of SSH hosts, then run the measured
//! benchmark on the leader and capture its output.

use std::io::Write;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use fr_protocol::ConfigError;
use fr_runner::cli::{Cli, Command, RunArgs};
use fr_runner::{CancelToken, FleetError, FleetRunner, report};
use fr_session::{SessionConnector, SshConnector};

#[tokio::main]
async fn main() -> ExitCode {
    // ── Parse args and init tracing ─────────────────────────────
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    tracing::debug!(version = env!("CARGO_PKG_VERSION"), "fleetrun starting");

    // ── Dispatch ────────────────────────────────────────────────
    let code = match dispatch(cli.command).await {
        Ok(code) => code,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "fleetrun failed");
            if err.downcast_ref::<ConfigError>().is_some() {
                2
            } else {
                1
            }
        }
    };
    ExitCode::from(report::process_exit_code(code))
}

/// Logs go to stderr; stdout is reserved for remote output and reports.
fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn dispatch(command: Command) -> anyhow::Result<i32> {
    match command {
        Command::Plan(args) => plan(&args),
        Command::Run(args) => run(&args).await,
    }
}

fn plan(args: &RunArgs) -> anyhow::Result<i32> {
    let inv = args.load()?;
    let connector: Arc<dyn SessionConnector> = Arc::new(SshConnector::new(inv.ssh));
    let runner = FleetRunner::new(connector, inv.credentials);
    let runs = runner.plan(&inv.roster, &inv.plan).map_err(config_or_other)?;

    let mut out = std::io::stdout().lock();
    report::write_plan(&mut out, &runs)?;
    Ok(0)
}

async fn run(args: &RunArgs) -> anyhow::Result<i32> {
    // ── Load roster ─────────────────────────────────────────────
    let inv = args.load()?;
    tracing::info!(
        hosts = inv.roster.len(),
        user = %inv.credentials.user,
        selection = %inv.plan.selection,
        "roster loaded"
    );

    // ── Interrupt handling ──────────────────────────────────────
    let cancel = CancelToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupt received, no further targets will start");
            on_interrupt.cancel();
        }
    });

    // ── Run fleet ───────────────────────────────────────────────
    let connector: Arc<dyn SessionConnector> = Arc::new(SshConnector::new(inv.ssh));
    let runner = FleetRunner::new(connector, inv.credentials)
        .with_cancel(cancel)
        .with_echo(!args.quiet && !args.json);

    let (fleet, leader_failed) = match runner.run_fleet(&inv.roster, &inv.plan).await {
        Ok(fleet) => (fleet, false),
        Err(FleetError::LeaderFailed(fleet)) => (*fleet, true),
        Err(e) => return Err(config_or_other(e)),
    };

    // ── Report ──────────────────────────────────────────────────
    let mut out = std::io::stdout().lock();
    if args.json {
        report::write_json(&mut out, &fleet)?;
    } else {
        report::write_summary(&mut out, &fleet)?;
    }
    out.flush()?;

    if leader_failed {
        if let Some(leader) = &fleet.leader {
            writeln!(std::io::stderr().lock(), "{}", report::describe(leader))?;
        }
    }
    Ok(fleet.exit_code())
}

fn config_or_other(err: FleetError) -> anyhow::Error {
    match err {
        FleetError::Config(e) => e.into(),
        other => other.into(),
    }
}
