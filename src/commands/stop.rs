//! `tms-deploy stop`

use std::io::Write;
use std::time::Duration;

use serde::Serialize;

use tms_deploy::DeployConfig;
use tms_deploy::Result;
use tms_deploy::pid::{self, StopOutcome};

use crate::cli::StopArgs;
use crate::output::{OutputWriter, Render};

/// Extra time over the supervisor's own grace so it can stop the app first.
const SUPERVISOR_MARGIN_SECS: u64 = 5;

#[derive(Debug, Serialize)]
struct StopReport {
    pid_file: String,
    outcome: StopOutcome,
}

impl Render for StopReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        let message = match self.outcome {
            StopOutcome::NotRunning => "not running",
            StopOutcome::StalePidRemoved => "not running (stale PID file removed)",
            StopOutcome::Stopped => "stopped",
            StopOutcome::Killed => "killed",
            StopOutcome::StillRunning => "still running",
        };
        writeln!(w, "{} ({})", message, self.pid_file)
    }
}

pub async fn execute(args: StopArgs, config: &DeployConfig, writer: &OutputWriter) -> Result<i32> {
    let grace = Duration::from_secs(
        args.grace_secs
            .unwrap_or(config.app.shutdown_grace_secs + SUPERVISOR_MARGIN_SECS),
    );
    let outcome = pid::stop_recorded(&config.app.pid_file, grace, args.force).await?;

    writer.render(&StopReport {
        pid_file: config.app.pid_file.display().to_string(),
        outcome,
    })?;

    Ok(match outcome {
        StopOutcome::StillRunning => 1,
        _ => 0,
    })
}
