use std::io;

/// Custom error type for tms_deploy operations
#[derive(Debug, thiserror::Error)]
pub enum TmsError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Missing required environment variable: {0}")]
    MissingEnv(String),

    #[error("Invalid environment variable {name}: {message}")]
    InvalidEnv { name: String, message: String },

    #[error("Application already running with PID {0}")]
    AlreadyRunning(u32),

    #[error("Invalid PID file '{path}': {message}")]
    InvalidPidFile { path: String, message: String },

    #[error("Failed to start application: {0}")]
    SpawnFailed(String),

    #[error("Application exited during startup (exit code: {0:?})")]
    AppExitedDuringStartup(Option<i32>),

    #[error("Health check did not pass after {attempts} attempts: {last}")]
    HealthCheckTimeout { attempts: u32, last: String },

    #[error("Invalid execution report: {0}")]
    InvalidReport(String),

    #[error("Webhook delivery failed: {0}")]
    WebhookFailed(String),

    #[error("Webhook rejected with HTTP {status}: {body}")]
    WebhookRejected { status: u16, body: String },

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl TmsError {
    /// Map the error to a process exit code.
    ///
    /// | Code | Meaning                          |
    /// |------|----------------------------------|
    /// | 1    | General failure                  |
    /// | 2    | Configuration or environment     |
    /// | 3    | Application never became healthy |
    /// | 4    | Already running                  |
    /// | 5    | Webhook delivery                 |
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConfigError(_)
            | Self::MissingEnv(_)
            | Self::InvalidEnv { .. }
            | Self::TomlParseError(_) => 2,
            Self::HealthCheckTimeout { .. } | Self::AppExitedDuringStartup(_) => 3,
            Self::AlreadyRunning(_) => 4,
            Self::WebhookFailed(_) | Self::WebhookRejected { .. } | Self::InvalidReport(_) => 5,
            Self::InvalidPidFile { .. }
            | Self::SpawnFailed(_)
            | Self::IoError(_)
            | Self::JsonError(_) => 1,
        }
    }
}

/// Helper type for Results that use TmsError
pub type Result<T> = std::result::Result<T, TmsError>;
