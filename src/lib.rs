//! Deployment tooling for the Test Management System (TMS).
//!
//! - [`supervisor`]: starts the application behind a PID file, waits for
//!   `/api/health`, monitors it and shuts it down on SIGTERM/SIGINT.
//! - [`checklist`]: pre-deployment file and environment checks.
//! - [`report`] and [`notify`]: the webhook contract for execution start,
//!   shard completion and final results, plus a signed, retrying sender.

pub mod checklist;
pub mod config;
pub mod env;
pub mod error;
pub mod health;
pub mod logging;
pub mod notify;
pub mod pid;
pub mod report;
pub mod signature;
pub mod supervisor;

pub use config::DeployConfig;
pub use error::{Result, TmsError};
pub use report::{ExecutionReport, ExecutionStatus, TestCounts};
