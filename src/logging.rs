use std::path::PathBuf;
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{Result, TmsError};

const DEFAULT_MAX_LOG_FILES: usize = 5;
const LOG_FILE_PREFIX: &str = "tms_deploy";
const DEFAULT_LOG_LEVEL: &str = "info";

pub struct FileLogger {
    log_directory: PathBuf,
    max_files: usize,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            max_files: DEFAULT_MAX_LOG_FILES,
            rotation: Rotation::DAILY,
        }
    }

    pub fn with_max_files(mut self, max_files: usize) -> Self {
        self.max_files = max_files;
        self
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            TmsError::ConfigError(format!(
                "Failed to create log directory '{}': {}",
                self.log_directory.display(),
                e
            ))
        })?;

        let file_appender = RollingFileAppender::builder()
            .rotation(self.rotation.clone())
            .filename_prefix(LOG_FILE_PREFIX)
            .filename_suffix("log")
            .max_log_files(self.max_files)
            .build(&self.log_directory)
            .map_err(|e| TmsError::ConfigError(format!("Failed to create log file: {}", e)))?;

        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Console logging only; used by short-lived commands.
pub fn setup_logging(level: Option<&str>) -> Result<()> {
    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| TmsError::ConfigError(format!("Failed to initialize logging: {}", e)))
}

/// Console plus rolling file logging. The returned guard flushes the file
/// writer on drop and must be held until exit.
pub fn setup_logging_with_file(level: Option<&str>, file_logger: &FileLogger) -> Result<WorkerGuard> {
    let (file_writer, guard) = file_logger.setup_file_logging()?;

    tracing_subscriber::registry()
        .with(env_filter(level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false), // Disable ANSI colors for file logs
        )
        .try_init()
        .map_err(|e| TmsError::ConfigError(format!("Failed to initialize logging: {}", e)))?;

    Ok(guard)
}

/// `RUST_LOG` wins over the command-line level.
fn env_filter(level: Option<&str>) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.unwrap_or(DEFAULT_LOG_LEVEL)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_logging_creates_directory() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("nested/logs");
        let logger = FileLogger::new(log_dir.clone())
            .with_max_files(2)
            .with_rotation(Rotation::NEVER);
        let (_writer, _guard) = logger.setup_file_logging().unwrap();
        assert!(log_dir.is_dir());
    }
}
