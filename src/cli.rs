//! Command-line definitions (clap derive).

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// TMS deployment tool: supervise the application, validate a deployment,
/// and report test executions to the TMS webhook.
#[derive(Parser, Debug)]
#[command(name = "tms-deploy", version, about, long_about = None)]
pub struct Cli {
    /// Path to tms_deploy.toml (falls back to TMS_DEPLOY_CONFIG, then ./tms_deploy.toml).
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error). RUST_LOG takes precedence.
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    /// Output format.
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start and supervise the application in the foreground.
    Start,

    /// Stop a running supervisor via its PID file.
    Stop(StopArgs),

    /// Show PID file state and application health.
    Status,

    /// Validate configuration and run the deployment checklist.
    Validate,

    /// Send an execution report to the TMS webhook.
    Notify(NotifyArgs),
}

#[derive(Args, Debug)]
pub struct StopArgs {
    /// Send SIGKILL if the process outlives the grace period.
    #[arg(long)]
    pub force: bool,

    /// Seconds to wait after SIGTERM (defaults to app.shutdown_grace_secs + 5).
    #[arg(long)]
    pub grace_secs: Option<u64>,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Print the payload instead of sending it.
    #[arg(long, global = true)]
    pub dry_run: bool,

    #[command(subcommand)]
    pub event: NotifyEvent,
}

#[derive(Subcommand, Debug)]
pub enum NotifyEvent {
    /// Announce a new execution. Prints the execution id.
    Start {
        /// Execution id; a new one is generated when omitted.
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Report one completed shard.
    Shard {
        #[arg(long)]
        execution_id: String,

        /// Zero-based shard index.
        #[arg(long)]
        index: u32,

        /// Number of shards in the execution.
        #[arg(long)]
        total: u32,

        #[command(flatten)]
        results: ResultsArgs,

        /// Artifact link as name=url (repeatable).
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
    },

    /// Report the final result of an execution.
    Final {
        #[arg(long)]
        execution_id: String,

        /// Shard report JSON files to aggregate into the final result.
        #[arg(long = "shard-report", conflicts_with_all = ["results", "passed", "failed", "skipped"])]
        shard_reports: Vec<PathBuf>,

        #[command(flatten)]
        results: ResultsArgs,

        /// Mark the execution as cancelled.
        #[arg(long)]
        cancelled: bool,

        /// Artifact link as name=url (repeatable).
        #[arg(long = "artifact")]
        artifacts: Vec<String>,
    },
}

/// Test counts, either from a results file or given directly.
#[derive(Args, Debug)]
pub struct ResultsArgs {
    /// Results JSON: {"total","passed","failed","skipped","failedTests":[...]}
    #[arg(long, conflicts_with_all = ["passed", "failed", "skipped"])]
    pub results: Option<PathBuf>,

    #[arg(long)]
    pub passed: Option<u32>,

    #[arg(long)]
    pub failed: Option<u32>,

    #[arg(long)]
    pub skipped: Option<u32>,
}
