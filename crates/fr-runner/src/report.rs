//! Human and JSON rendering of plans and fleet reports.

use std::io::{self, Write};

use fr_protocol::{FleetReport, RunResult, RunStatus};

use crate::fleet::PlannedRun;

/// One line per planned run, with the fully rendered command.
pub fn write_plan(out: &mut dyn Write, runs: &[PlannedRun]) -> io::Result<()> {
    if runs.is_empty() {
        writeln!(out, "no targets selected")?;
    }
    for run in runs {
        write!(out, "{} {} [{}]: {}", run.phase, run.target, run.job, run.command)?;
        if let Some(path) = &run.capture {
            write!(out, "  > {}", path.display())?;
        }
        writeln!(out)?;
    }
    Ok(())
}

pub fn write_summary(out: &mut dyn Write, report: &FleetReport) -> io::Result<()> {
    let total = report.results().count();
    let failed = report.failed_count();
    writeln!(
        out,
        "run {}: {} of {} succeeded",
        report.run_id,
        total - failed,
        total
    )?;
    for result in report.results() {
        writeln!(out, "  {}", describe(result))?;
    }
    Ok(())
}

pub fn write_json(out: &mut dyn Write, report: &FleetReport) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut *out, report).map_err(io::Error::from)?;
    writeln!(out)
}

/// `worker #1 10.0.0.1 [prepare] succeeded in 1204 ms`
pub fn describe(result: &RunResult) -> String {
    let head = format!(
        "{} #{} {} [{}]",
        result.phase, result.index, result.address, result.job
    );
    match (&result.status, &result.error) {
        (RunStatus::Succeeded, _) => {
            let mut line = format!("{head} succeeded in {} ms", result.duration_ms);
            if let Some(path) = &result.capture_path {
                line.push_str(&format!(", output in {}", path.display()));
            }
            line
        }
        (RunStatus::Cancelled, _) => format!("{head} cancelled"),
        (RunStatus::Failed, Some(err)) => format!("{head} failed: {err}"),
        (RunStatus::Failed, None) => format!("{head} failed"),
    }
}

/// Clamp a result code into a process exit status. Codes that would wrap
/// to 0 become 1.
pub fn process_exit_code(code: i32) -> u8 {
    match code {
        0 => 0,
        1..=255 => code as u8,
        _ => 1,
    }
}
