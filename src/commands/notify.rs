//! `tms-deploy notify start|shard|final`

use std::io::Write;
use std::path::Path;

use serde::Serialize;
use uuid::Uuid;

use tms_deploy::DeployConfig;
use tms_deploy::error::{Result, TmsError};
use tms_deploy::notify::{DeliveryReceipt, WebhookClient};
use tms_deploy::report::{
    Artifact, ExecutionReport, ResultSummary, RunMetadata, ShardInfo, TestCounts,
};

use crate::cli::{NotifyArgs, NotifyEvent, ResultsArgs};
use crate::output::{OutputWriter, Render};

#[derive(Debug, Serialize)]
struct NotifyOutput {
    execution_id: String,
    event: &'static str,
    dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    delivery: Option<DeliveryReceipt>,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<ExecutionReport>,
}

impl Render for NotifyOutput {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        if let Some(payload) = &self.payload {
            let json = serde_json::to_string_pretty(payload).map_err(std::io::Error::other)?;
            writeln!(w, "{}", json)?;
        }
        // The bare id on stdout lets a workflow step capture it.
        if !self.dry_run {
            writeln!(w, "{}", self.execution_id)?;
        }
        Ok(())
    }
}

pub async fn execute(args: NotifyArgs, config: &DeployConfig, writer: &OutputWriter) -> Result<i32> {
    let report = build_report(args.event)?
        .with_metadata(RunMetadata::from_github_env(super::process_env));
    report.validate()?;

    let output = if args.dry_run {
        NotifyOutput {
            execution_id: report.execution_id.clone(),
            event: report.event_name(),
            dry_run: true,
            delivery: None,
            payload: Some(report),
        }
    } else {
        let client = WebhookClient::new(&config.webhook)?;
        let receipt = client.send(&report).await?;
        NotifyOutput {
            execution_id: report.execution_id.clone(),
            event: report.event_name(),
            dry_run: false,
            delivery: Some(receipt),
            payload: None,
        }
    };

    writer.render(&output)?;
    Ok(0)
}

fn build_report(event: NotifyEvent) -> Result<ExecutionReport> {
    match event {
        NotifyEvent::Start { execution_id } => {
            let execution_id = execution_id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::now_v7().to_string());
            Ok(ExecutionReport::started(execution_id))
        }
        NotifyEvent::Shard {
            execution_id,
            index,
            total,
            results,
            artifacts,
        } => {
            let summary = load_summary(&results)?;
            Ok(
                ExecutionReport::shard_complete(execution_id, ShardInfo { index, total }, summary)
                    .with_artifacts(parse_artifacts(&artifacts)?),
            )
        }
        NotifyEvent::Final {
            execution_id,
            shard_reports,
            results,
            cancelled,
            artifacts,
        } => {
            let report = if shard_reports.is_empty() {
                let summary = load_summary(&results)?;
                if cancelled {
                    ExecutionReport::cancelled(execution_id, summary)
                } else {
                    ExecutionReport::final_result(execution_id, summary)
                }
            } else {
                let shards = shard_reports
                    .iter()
                    .map(|p| read_json::<ExecutionReport>(p))
                    .collect::<Result<Vec<_>>>()?;
                let mut report = ExecutionReport::aggregate_shards(execution_id, &shards)?;
                if cancelled {
                    report.status = tms_deploy::ExecutionStatus::Cancelled;
                }
                report
            };
            Ok(report.with_artifacts(parse_artifacts(&artifacts)?))
        }
    }
}

fn load_summary(args: &ResultsArgs) -> Result<ResultSummary> {
    if let Some(path) = &args.results {
        return read_json(path);
    }
    match (args.passed, args.failed, args.skipped) {
        (None, None, None) => Err(TmsError::InvalidReport(
            "provide --results FILE or at least one of --passed/--failed/--skipped".into(),
        )),
        (passed, failed, skipped) => Ok(ResultSummary {
            counts: TestCounts::new(
                passed.unwrap_or(0),
                failed.unwrap_or(0),
                skipped.unwrap_or(0),
            ),
            failed_tests: Vec::new(),
        }),
    }
}

fn parse_artifacts(raw: &[String]) -> Result<Vec<Artifact>> {
    raw.iter().map(|a| Artifact::parse(a)).collect()
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        TmsError::InvalidReport(format!("Failed to read '{}': {}", path.display(), e))
    })?;
    serde_json::from_str(&content).map_err(|e| {
        TmsError::InvalidReport(format!("Failed to parse '{}': {}", path.display(), e))
    })
}
