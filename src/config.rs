//! `tms_deploy.toml` configuration

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::checklist::CheckItem;
use crate::error::{Result, TmsError};

pub const DEFAULT_CONFIG_PATH: &str = "tms_deploy.toml";
pub const CONFIG_PATH_ENV: &str = "TMS_DEPLOY_CONFIG";

const DEFAULT_HEALTH_PATH: &str = "/api/health";
const DEFAULT_STARTUP_ATTEMPTS: u32 = 30;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
#[serde(default)]
pub struct DeployConfig {
    pub app: AppConfig,
    pub health: HealthConfig,
    pub webhook: WebhookConfig,
    #[serde(rename = "check")]
    pub checks: Vec<CheckItem>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct AppConfig {
    pub command: String,
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub pid_file: PathBuf,
    pub log_dir: PathBuf,
    pub shutdown_grace_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            command: "node".to_string(),
            args: vec!["server.js".to_string()],
            working_dir: PathBuf::from("."),
            pid_file: PathBuf::from("tms.pid"),
            log_dir: PathBuf::from("logs"),
            shutdown_grace_secs: 10,
        }
    }
}

impl AppConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Log file receiving the supervised process' stdout and stderr.
    pub fn app_log_path(&self) -> PathBuf {
        self.log_dir.join("app.log")
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct HealthConfig {
    pub host: String,
    pub path: String,
    pub startup_attempts: u32,
    pub startup_interval_secs: u64,
    pub request_timeout_secs: u64,
    pub monitor_interval_secs: u64,
    pub failure_threshold: u32,
    pub exit_on_unhealthy: bool,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            path: DEFAULT_HEALTH_PATH.to_string(),
            startup_attempts: DEFAULT_STARTUP_ATTEMPTS,
            startup_interval_secs: 1,
            request_timeout_secs: 2,
            monitor_interval_secs: 30,
            failure_threshold: 3,
            exit_on_unhealthy: true,
        }
    }
}

impl HealthConfig {
    pub fn url_for_port(&self, port: u16) -> String {
        format!("http://{}:{}{}", self.host, port, self.path)
    }

    pub fn startup_interval(&self) -> Duration {
        Duration::from_secs(self.startup_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: Option<String>,
    pub secret: Option<String>,
    pub timeout_secs: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: None,
            secret: None,
            timeout_secs: 10,
            max_retries: 3,
            retry_backoff_ms: 500,
        }
    }
}

impl WebhookConfig {
    /// Returns true if a valid (non-empty) secret is set.
    pub fn has_valid_secret(&self) -> bool {
        self.secret.as_ref().map(|s| !s.is_empty()).unwrap_or(false)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl DeployConfig {
    /// Load and parse the configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(path).map_err(|e| {
            TmsError::ConfigError(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: DeployConfig = toml::from_str(&config_str).map_err(|e| {
            TmsError::ConfigError(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        Ok(config)
    }

    /// Resolves the config source: an explicit path must exist, otherwise
    /// `TMS_DEPLOY_CONFIG`, then `tms_deploy.toml` if present, then defaults.
    pub fn resolve<F>(explicit: Option<&Path>, lookup: F) -> Result<(Self, Option<PathBuf>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        let candidate = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => match lookup(CONFIG_PATH_ENV) {
                Some(path) if !path.is_empty() => Some(PathBuf::from(path)),
                _ => {
                    let default = PathBuf::from(DEFAULT_CONFIG_PATH);
                    default.exists().then_some(default)
                }
            },
        };

        // Runs before logging is set up; callers report the source.
        let mut config = match &candidate {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides(lookup);
        config.validate()?;
        Ok((config, candidate))
    }

    /// Environment variables take precedence over the file.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(url) = non_empty("TMS_WEBHOOK_URL") {
            self.webhook.url = Some(url);
        }
        if let Some(secret) = non_empty("TMS_WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(pid_file) = non_empty("TMS_PID_FILE") {
            self.app.pid_file = PathBuf::from(pid_file);
        }
        if let Some(log_dir) = non_empty("TMS_LOG_DIR") {
            self.app.log_dir = PathBuf::from(log_dir);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.app.command.trim().is_empty() {
            return Err(TmsError::ConfigError("app.command must not be empty".into()));
        }
        if self.health.startup_attempts == 0 {
            return Err(TmsError::ConfigError(
                "health.startup_attempts must be at least 1".into(),
            ));
        }
        if self.health.startup_interval_secs == 0 || self.health.monitor_interval_secs == 0 {
            return Err(TmsError::ConfigError(
                "health intervals must be greater than zero".into(),
            ));
        }
        if self.health.failure_threshold == 0 {
            return Err(TmsError::ConfigError(
                "health.failure_threshold must be at least 1".into(),
            ));
        }
        if !self.health.path.starts_with('/') {
            return Err(TmsError::ConfigError(format!(
                "health.path must start with '/', got '{}'",
                self.health.path
            )));
        }
        if let Some(url) = &self.webhook.url {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                return Err(TmsError::ConfigError(format!(
                    "webhook.url must be an http(s) URL, got '{}'",
                    url
                )));
            }
        }
        Ok(())
    }
}
