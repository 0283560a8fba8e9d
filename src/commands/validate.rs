//! `tms-deploy validate`

use std::io::Write;

use serde::Serialize;
use tracing::info;

use tms_deploy::DeployConfig;
use tms_deploy::Result;
use tms_deploy::checklist::{Checklist, ChecklistReport};

use crate::output::{OutputWriter, Render};

#[derive(Debug, Serialize)]
struct ValidationReport {
    config_source: Option<String>,
    checklist: ChecklistReport,
    passed: bool,
}

impl Render for ValidationReport {
    fn render_text(&self, w: &mut dyn Write) -> std::io::Result<()> {
        writeln!(
            w,
            "Config: {}",
            self.config_source.as_deref().unwrap_or("(defaults)")
        )?;
        for outcome in &self.checklist.outcomes {
            let mark = if outcome.passed { "✓" } else { "✗" };
            let description = outcome
                .item
                .description
                .as_deref()
                .map(|d| format!(" - {}", d))
                .unwrap_or_default();
            writeln!(
                w,
                "{} [{:?}] {}{}: {}",
                mark, outcome.item.kind, outcome.item.path, description, outcome.detail
            )?;
        }
        let failures = self.checklist.failures().len();
        if failures == 0 {
            writeln!(w, "All {} checks passed", self.checklist.outcomes.len())
        } else {
            writeln!(w, "{} of {} checks failed", failures, self.checklist.outcomes.len())
        }
    }
}

/// Configuration errors surface before this point through `DeployConfig::resolve`.
pub fn execute(
    config: &DeployConfig,
    config_source: Option<String>,
    writer: &OutputWriter,
) -> Result<i32> {
    let checklist = Checklist::new(config.checks.clone(), &config.app.working_dir);
    let report = checklist.run(super::process_env);
    let passed = report.passed();
    info!(checks = report.outcomes.len(), passed, "Deployment checklist finished");

    writer.render(&ValidationReport {
        config_source,
        checklist: report,
        passed,
    })?;

    Ok(if passed { 0 } else { 1 })
}
