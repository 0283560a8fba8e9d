//! `tms-deploy status`

use std::io::Write;

use serde::Serialize;
use tracing::debug;

use tms_deploy::DeployConfig;
use tms_deploy::Result;
use tms_deploy::env;
use tms_deploy::health::{HealthProbe, HealthStatus};
use tms_deploy::pid;

use crate::output::{OutputWriter, Render};

#[derive(Debug, Serialize)]
struct StatusReport {
    pid_file: String,
    pid: Option<u32>,
    running: bool,
    health_url: Option<String>,
    health: Option<HealthStatus>,
    /// Why no probe was made.
    #[serde(skip_serializing_if = "Option::is_none")]
    health_error: Option<String>,
}

impl Render for StatusReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        match (self.pid, self.running) {
            (Some(pid), true) => writeln!(w, "Supervisor: running (PID {})", pid)?,
            (Some(pid), false) => writeln!(w, "Supervisor: not running (stale PID {})", pid)?,
            (None, _) => writeln!(w, "Supervisor: not running")?,
        }
        match (&self.health_url, &self.health) {
            (Some(url), Some(HealthStatus::Healthy)) => writeln!(w, "Health:     healthy ({})", url)?,
            (Some(url), Some(HealthStatus::Unhealthy(reason))) => {
                writeln!(w, "Health:     unhealthy ({}): {}", url, reason)?
            }
            _ => writeln!(
                w,
                "Health:     unknown ({})",
                self.health_error.as_deref().unwrap_or("not probed")
            )?,
        }
        Ok(())
    }
}

pub async fn execute(config: &DeployConfig, writer: &OutputWriter) -> Result<i32> {
    let pid = pid::read_pid(&config.app.pid_file)?;
    let running = pid.map(pid::is_process_alive).unwrap_or(false);

    // Only PORT matters for probing; a bad or missing one is reported, not fatal.
    let (health_url, health, health_error) = match env::port_from_lookup(&super::process_env) {
        Ok(port) => {
            let probe = HealthProbe::for_app(&config.health, port)?;
            let status = probe.check().await;
            (Some(probe.url().to_string()), Some(status), None)
        }
        Err(e) => {
            debug!("Skipping health probe: {}", e);
            (None, None, Some(e.to_string()))
        }
    };

    let healthy = health.as_ref().map(|h| h.is_healthy()).unwrap_or(false);
    writer.render(&StatusReport {
        pid_file: config.app.pid_file.display().to_string(),
        pid,
        running,
        health_url,
        health,
        health_error,
    })?;

    Ok(if running && healthy { 0 } else { 1 })
}
