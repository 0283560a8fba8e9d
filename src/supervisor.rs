//! Application supervisor.
//!
//! # Startup order
//!
//! 1. PID file (refuses a second instance)
//! 2. Spawn the application with `NODE_ENV`/`PORT` exported
//! 3. Poll the health endpoint until it answers or attempts run out
//! 4. Background health monitor
//!
//! # Shutdown
//!
//! Triggered by SIGTERM/SIGINT, application exit, or the monitor giving up.
//! The application gets SIGTERM and `shutdown_grace_secs` to exit before it
//! is killed; the PID file is released last.

use std::fs::OpenOptions;
use std::future::Future;
use std::process::{ExitStatus, Stdio};
use tokio::process::{Child, Command};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::config::DeployConfig;
use crate::env::RuntimeEnv;
use crate::error::{Result, TmsError};
use crate::health::{self, HealthProbe, MonitorOutcome};
use crate::pid::PidFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorExit {
    /// Stopped by a signal or the caller's shutdown future.
    Shutdown,
    /// The application exited on its own.
    AppExited(Option<i32>),
    /// The monitor saw this many consecutive failed health checks.
    Unhealthy(u32),
}

impl SupervisorExit {
    pub fn exit_code(&self) -> i32 {
        match self {
            SupervisorExit::Shutdown => 0,
            SupervisorExit::AppExited(Some(code)) => *code,
            SupervisorExit::AppExited(None) => 1,
            SupervisorExit::Unhealthy(_) => 3,
        }
    }
}

pub struct Supervisor {
    config: DeployConfig,
    env: RuntimeEnv,
}

impl Supervisor {
    pub fn new(config: DeployConfig, env: RuntimeEnv) -> Self {
        Self { config, env }
    }

    /// Runs until SIGTERM or SIGINT. The handlers are in place before the
    /// PID file exists, so a `stop` can never hit the default action.
    pub async fn run(self) -> Result<SupervisorExit> {
        let shutdown = shutdown_signal()?;
        self.run_until(shutdown).await
    }

    pub async fn run_until<F>(self, shutdown: F) -> Result<SupervisorExit>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        let _pid_file = PidFile::acquire(&self.config.app.pid_file)?;
        let mut child = self.spawn_app()?;
        let child_pid = child.id();
        info!(
            pid = child_pid,
            node_env = %self.env.node_env,
            port = self.env.port,
            "Application started"
        );

        let probe = HealthProbe::for_app(&self.config.health, self.env.port)?;
        info!(
            url = probe.url(),
            attempts = self.config.health.startup_attempts,
            "Waiting for application to become healthy"
        );

        tokio::select! {
            result = probe.wait_until_healthy(
                self.config.health.startup_attempts,
                self.config.health.startup_interval(),
            ) => {
                if let Err(e) = result {
                    error!("Application failed to become healthy: {}", e);
                    self.terminate(&mut child).await;
                    return Err(e);
                }
            }
            status = child.wait() => {
                let code = status?.code();
                error!(exit_code = ?code, "Application exited during startup");
                return Err(TmsError::AppExitedDuringStartup(code));
            }
            _ = &mut shutdown => {
                info!("Shutdown requested during startup");
                self.terminate(&mut child).await;
                return Ok(SupervisorExit::Shutdown);
            }
        }

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let mut monitor = health::spawn_monitor(
            probe,
            self.config.health.monitor_interval(),
            self.config.health.failure_threshold,
            self.config.health.exit_on_unhealthy,
            shutdown_rx,
        );
        info!("Application running, health monitor active");

        let exit = tokio::select! {
            status = child.wait() => {
                let code = status?.code();
                warn!(exit_code = ?code, "Application exited");
                SupervisorExit::AppExited(code)
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received");
                self.terminate(&mut child).await;
                SupervisorExit::Shutdown
            }
            outcome = &mut monitor => {
                let failures = match outcome {
                    Ok(MonitorOutcome::Unhealthy(failures)) => failures,
                    Ok(MonitorOutcome::Shutdown) => 0,
                    Err(e) => {
                        error!("Health monitor task failed: {}", e);
                        0
                    }
                };
                self.terminate(&mut child).await;
                SupervisorExit::Unhealthy(failures)
            }
        };

        // Monitor may already be gone
        let _ = shutdown_tx.send(());
        if !monitor.is_finished() {
            let _ = monitor.await;
        }

        info!(?exit, "Supervisor stopped");
        Ok(exit)
    }

    fn spawn_app(&self) -> Result<Child> {
        let app = &self.config.app;
        std::fs::create_dir_all(&app.log_dir)?;
        let log_path = app.app_log_path();
        let log_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)?;
        let stderr_file = log_file.try_clone()?;

        info!(
            command = %app.command,
            args = ?app.args,
            log = %log_path.display(),
            "Spawning application"
        );

        Command::new(&app.command)
            .args(&app.args)
            .current_dir(&app.working_dir)
            .envs(self.env.as_vars())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file))
            .stderr(Stdio::from(stderr_file))
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| TmsError::SpawnFailed(format!("'{}': {}", app.command, e)))
    }

    /// SIGTERM, then SIGKILL once the grace period is over.
    async fn terminate(&self, child: &mut Child) {
        let grace = self.config.app.shutdown_grace();

        if let Ok(Some(status)) = child.try_wait() {
            log_exit(status);
            return;
        }

        #[cfg(unix)]
        {
            if let Some(pid) = child.id() {
                info!(pid, ?grace, "Sending SIGTERM to application");
                if let Err(e) = crate::pid::send_signal(pid, libc::SIGTERM) {
                    warn!(pid, "Failed to send SIGTERM: {}", e);
                }
            }
        }

        match tokio::time::timeout(grace, child.wait()).await {
            Ok(Ok(status)) => log_exit(status),
            Ok(Err(e)) => error!("Failed to wait for application: {}", e),
            Err(_) => {
                warn!("Application did not exit within {:?}, killing", grace);
                if let Err(e) = child.kill().await {
                    error!("Failed to kill application: {}", e);
                }
            }
        }
    }
}

fn log_exit(status: ExitStatus) {
    info!(exit_code = ?status.code(), "Application stopped");
}

/// Installs SIGTERM and SIGINT handlers immediately and returns a future
/// that resolves on the first of them.
#[cfg(unix)]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    Ok(async move {
        tokio::select! {
            _ = sigterm.recv() => info!("SIGTERM received"),
            _ = sigint.recv() => info!("SIGINT received"),
        }
    })
}

#[cfg(not(unix))]
pub fn shutdown_signal() -> Result<impl Future<Output = ()>> {
    Ok(async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for Ctrl-C: {}", e);
        }
    })
}
