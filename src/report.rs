//! Execution reports sent to the TMS webhook.
//!
//! Three message kinds share one shape, told apart by `status`:
//! `running` opens an execution, `shard-complete` reports one shard, and
//! `passed` / `failed` / `cancelled` carry the final aggregated result.

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use serde::{Deserialize, Serialize};

use crate::error::{Result, TmsError};

const MAX_LISTED_MISSING: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionStatus {
    Running,
    ShardComplete,
    Passed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Passed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }

    /// Value of the `X-TMS-Event` header.
    pub fn event_name(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "execution.started",
            ExecutionStatus::ShardComplete => "execution.shard_completed",
            _ => "execution.completed",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCounts {
    pub total: u32,
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
}

impl TestCounts {
    /// A total that does not fit in `u32` saturates, which `is_consistent`
    /// then rejects.
    pub fn new(passed: u32, failed: u32, skipped: u32) -> Self {
        Self {
            total: passed.saturating_add(failed).saturating_add(skipped),
            passed,
            failed,
            skipped,
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.passed
            .checked_add(self.failed)
            .and_then(|n| n.checked_add(self.skipped))
            == Some(self.total)
    }

    pub fn merge(&self, other: &TestCounts) -> TestCounts {
        TestCounts {
            total: self.total.saturating_add(other.total),
            passed: self.passed.saturating_add(other.passed),
            failed: self.failed.saturating_add(other.failed),
            skipped: self.skipped.saturating_add(other.skipped),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedTest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub url: String,
}

impl Artifact {
    /// Parses `name=url`.
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.split_once('=') {
            Some((name, url)) if !name.trim().is_empty() && !url.trim().is_empty() => Ok(Self {
                name: name.trim().to_string(),
                url: url.trim().to_string(),
            }),
            _ => Err(TmsError::InvalidReport(format!(
                "artifact '{}' is not in name=url form",
                raw
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardInfo {
    pub index: u32,
    pub total: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trigger: Option<String>,
}

impl RunMetadata {
    /// Populates metadata from the variables GitHub Actions sets on every job.
    pub fn from_github_env<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        let repository = get("GITHUB_REPOSITORY");
        let run_id = get("GITHUB_RUN_ID");
        let run_url = match (get("GITHUB_SERVER_URL"), &repository, &run_id) {
            (Some(server), Some(repo), Some(id)) => Some(format!(
                "{}/{}/actions/runs/{}",
                server.trim_end_matches('/'),
                repo,
                id
            )),
            _ => None,
        };

        Self {
            repository,
            branch: get("GITHUB_REF_NAME"),
            commit: get("GITHUB_SHA"),
            workflow: get("GITHUB_WORKFLOW"),
            run_id,
            run_url,
            actor: get("GITHUB_ACTOR"),
            trigger: get("GITHUB_EVENT_NAME"),
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == RunMetadata::default()
    }
}

/// Test outcome summary as written by a test runner, before it is attached
/// to a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultSummary {
    #[serde(flatten)]
    pub counts: TestCounts,
    #[serde(default)]
    pub failed_tests: Vec<FailedTest>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionReport {
    pub execution_id: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shard: Option<ShardInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub results: Option<TestCounts>,
    #[serde(default)]
    pub failed_tests: Vec<FailedTest>,
    #[serde(default)]
    pub artifacts: Vec<Artifact>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<RunMetadata>,
    pub timestamp: DateTime<Utc>,
}

impl ExecutionReport {
    fn base(execution_id: String, status: ExecutionStatus) -> Self {
        Self {
            execution_id,
            status,
            shard: None,
            results: None,
            failed_tests: Vec::new(),
            artifacts: Vec::new(),
            metadata: None,
            timestamp: Utc::now(),
        }
    }

    pub fn started(execution_id: impl Into<String>) -> Self {
        Self::base(execution_id.into(), ExecutionStatus::Running)
    }

    pub fn shard_complete(
        execution_id: impl Into<String>,
        shard: ShardInfo,
        summary: ResultSummary,
    ) -> Self {
        let mut report = Self::base(execution_id.into(), ExecutionStatus::ShardComplete);
        report.shard = Some(shard);
        report.results = Some(summary.counts);
        report.failed_tests = summary
            .failed_tests
            .into_iter()
            .map(|mut t| {
                t.shard.get_or_insert(shard.index);
                t
            })
            .collect();
        report
    }

    /// Final result; `passed` or `failed` is derived from the counts.
    pub fn final_result(execution_id: impl Into<String>, summary: ResultSummary) -> Self {
        let status = if summary.counts.failed > 0 {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Passed
        };
        let mut report = Self::base(execution_id.into(), status);
        report.results = Some(summary.counts);
        report.failed_tests = summary.failed_tests;
        report
    }

    pub fn cancelled(execution_id: impl Into<String>, summary: ResultSummary) -> Self {
        let mut report = Self::final_result(execution_id, summary);
        report.status = ExecutionStatus::Cancelled;
        report
    }

    pub fn with_metadata(mut self, metadata: RunMetadata) -> Self {
        self.metadata = (!metadata.is_empty()).then_some(metadata);
        self
    }

    pub fn with_artifacts(mut self, artifacts: Vec<Artifact>) -> Self {
        self.artifacts.extend(artifacts);
        self
    }

    /// Folds shard reports of one execution into its final report.
    ///
    /// Every shard `0..total` must be present exactly once. Failed tests and
    /// artifacts are concatenated in shard order.
    pub fn aggregate_shards(
        execution_id: impl Into<String>,
        shards: &[ExecutionReport],
    ) -> Result<Self> {
        let execution_id = execution_id.into();
        let first = shards
            .first()
            .ok_or_else(|| TmsError::InvalidReport("no shard reports to aggregate".into()))?;
        let expected = first
            .shard
            .map(|s| s.total)
            .ok_or_else(|| TmsError::InvalidReport("shard report without shard info".into()))?;

        if shards.len() != expected as usize {
            return Err(TmsError::InvalidReport(format!(
                "expected {} shard reports, got {}{}",
                expected,
                shards.len(),
                describe_missing(shards, expected)
            )));
        }

        let mut ordered: Vec<Option<&ExecutionReport>> = vec![None; shards.len()];
        for report in shards {
            report.validate()?;
            if report.status != ExecutionStatus::ShardComplete {
                return Err(TmsError::InvalidReport(format!(
                    "expected shard-complete report, got {:?}",
                    report.status
                )));
            }
            if report.execution_id != execution_id {
                return Err(TmsError::InvalidReport(format!(
                    "shard belongs to execution '{}', not '{}'",
                    report.execution_id, execution_id
                )));
            }
            // validate() guarantees shard info on shard-complete reports
            let Some(shard) = report.shard else { continue };
            if shard.total != expected {
                return Err(TmsError::InvalidReport(format!(
                    "shard {} reports {} shards, expected {}",
                    shard.index, shard.total, expected
                )));
            }
            let slot = &mut ordered[shard.index as usize];
            if slot.is_some() {
                return Err(TmsError::InvalidReport(format!(
                    "shard {} reported more than once",
                    shard.index
                )));
            }
            *slot = Some(report);
        }

        // n distinct in-range indices fill all n slots
        let mut summary = ResultSummary::default();
        let mut artifacts = Vec::new();
        for report in ordered.into_iter().flatten() {
            if let Some(counts) = &report.results {
                summary.counts = summary.counts.merge(counts);
            }
            summary.failed_tests.extend(report.failed_tests.iter().cloned());
            artifacts.extend(report.artifacts.iter().cloned());
        }

        let mut final_report = Self::final_result(execution_id, summary).with_artifacts(artifacts);
        final_report.metadata = first.metadata.clone();
        Ok(final_report)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(TmsError::InvalidReport(msg));

        if self.execution_id.trim().is_empty() {
            return invalid("executionId must not be empty".into());
        }

        match self.status {
            ExecutionStatus::Running => {
                if self.results.is_some() || self.shard.is_some() {
                    return invalid("a running report carries no results or shard".into());
                }
            }
            ExecutionStatus::ShardComplete => {
                let Some(shard) = self.shard else {
                    return invalid("shard-complete report requires shard info".into());
                };
                if shard.total == 0 || shard.index >= shard.total {
                    return invalid(format!(
                        "shard index {} out of range for {} shards",
                        shard.index, shard.total
                    ));
                }
                if self.results.is_none() {
                    return invalid("shard-complete report requires results".into());
                }
            }
            _ => {
                if self.shard.is_some() {
                    return invalid("a final report carries no shard info".into());
                }
                if self.results.is_none() {
                    return invalid("a final report requires results".into());
                }
            }
        }

        if let Some(counts) = &self.results {
            if !counts.is_consistent() {
                return invalid(format!(
                    "passed ({}) + failed ({}) + skipped ({}) != total ({})",
                    counts.passed, counts.failed, counts.skipped, counts.total
                ));
            }
            if self.status == ExecutionStatus::Passed && counts.failed > 0 {
                return invalid("status passed with failed tests".into());
            }
            if self.failed_tests.len() > counts.failed as usize {
                return invalid(format!(
                    "{} failed tests listed but only {} failed",
                    self.failed_tests.len(),
                    counts.failed
                ));
            }
        }

        Ok(())
    }

    pub fn event_name(&self) -> &'static str {
        self.status.event_name()
    }
}

/// `" (missing: 1, 4)"`, listing at most `MAX_LISTED_MISSING` indices.
fn describe_missing(shards: &[ExecutionReport], expected: u32) -> String {
    let present: BTreeSet<u32> = shards
        .iter()
        .filter_map(|r| r.shard)
        .map(|s| s.index)
        .filter(|&i| i < expected)
        .collect();
    let missing_count = expected as usize - present.len();
    if missing_count == 0 {
        return String::new();
    }

    let mut listed: Vec<String> = (0..expected)
        .filter(|i| !present.contains(i))
        .take(MAX_LISTED_MISSING)
        .map(|i| i.to_string())
        .collect();
    if missing_count > MAX_LISTED_MISSING {
        listed.push(format!("and {} more", missing_count - MAX_LISTED_MISSING));
    }
    format!(" (missing: {})", listed.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(passed: u32, failed: u32, skipped: u32, failures: &[&str]) -> ResultSummary {
        ResultSummary {
            counts: TestCounts::new(passed, failed, skipped),
            failed_tests: failures
                .iter()
                .map(|name| FailedTest {
                    name: name.to_string(),
                    file: None,
                    error: None,
                    shard: None,
                })
                .collect(),
        }
    }

    fn shard(index: u32, total: u32, s: ResultSummary) -> ExecutionReport {
        ExecutionReport::shard_complete("exec-1", ShardInfo { index, total }, s)
    }

    #[test]
    fn serializes_with_camel_case_and_kebab_status() {
        let report = shard(0, 2, summary(3, 1, 0, &["login works"]));
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["executionId"], "exec-1");
        assert_eq!(json["status"], "shard-complete");
        assert_eq!(json["results"]["total"], 4);
        assert_eq!(json["failedTests"][0]["name"], "login works");
        assert_eq!(json["failedTests"][0]["shard"], 0);
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn parses_results_summary_file_shape() {
        let raw = r#"{"total": 5, "passed": 3, "failed": 1, "skipped": 1,
                      "failedTests": [{"name": "checkout", "file": "cart.spec.ts"}]}"#;
        let summary: ResultSummary = serde_json::from_str(raw).unwrap();
        assert_eq!(summary.counts, TestCounts::new(3, 1, 1));
        assert_eq!(summary.failed_tests[0].file.as_deref(), Some("cart.spec.ts"));
    }

    #[test]
    fn final_status_follows_failures() {
        let ok = ExecutionReport::final_result("e", summary(10, 0, 2, &[]));
        assert_eq!(ok.status, ExecutionStatus::Passed);
        let bad = ExecutionReport::final_result("e", summary(9, 1, 2, &[]));
        assert_eq!(bad.status, ExecutionStatus::Failed);
        assert_eq!(bad.event_name(), "execution.completed");
        ok.validate().unwrap();
        bad.validate().unwrap();
    }

    #[test]
    fn validate_rejects_inconsistent_reports() {
        let mut report = ExecutionReport::final_result("e", summary(1, 0, 0, &[]));
        report.results = Some(TestCounts {
            total: 5,
            passed: 1,
            failed: 0,
            skipped: 0,
        });
        assert!(report.validate().is_err());

        let mut report = ExecutionReport::started("e");
        report.results = Some(TestCounts::default());
        assert!(report.validate().is_err());

        let report = shard(2, 2, summary(1, 0, 0, &[]));
        assert!(report.validate().is_err());

        let report = ExecutionReport::started("  ");
        assert!(report.validate().is_err());

        let report = ExecutionReport::final_result("e", summary(1, 1, 0, &["a", "b"]));
        assert!(report.validate().is_err());

        let mut report = ExecutionReport::final_result("e", summary(1, 1, 0, &[]));
        report.status = ExecutionStatus::Passed;
        assert!(report.validate().is_err());
    }

    #[test]
    fn aggregates_out_of_order_shards() {
        let shards = vec![
            shard(1, 3, summary(4, 1, 0, &["b"])),
            shard(0, 3, summary(5, 0, 1, &[])),
            shard(2, 3, summary(2, 1, 0, &["c"]))
                .with_artifacts(vec![Artifact::parse("report=https://x/2").unwrap()]),
        ];
        let report = ExecutionReport::aggregate_shards("exec-1", &shards).unwrap();
        assert_eq!(report.status, ExecutionStatus::Failed);
        assert_eq!(report.results, Some(TestCounts::new(11, 2, 1)));
        let names: Vec<_> = report.failed_tests.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
        assert_eq!(report.artifacts.len(), 1);
        report.validate().unwrap();
    }

    #[test]
    fn aggregate_rejects_missing_and_duplicate_shards() {
        let missing = vec![shard(0, 3, summary(1, 0, 0, &[])), shard(2, 3, summary(1, 0, 0, &[]))];
        let err = ExecutionReport::aggregate_shards("exec-1", &missing).unwrap_err();
        assert!(err.to_string().contains("expected 3 shard reports, got 2 (missing: 1)"));

        let dup = vec![shard(0, 2, summary(1, 0, 0, &[])), shard(0, 2, summary(1, 0, 0, &[]))];
        assert!(ExecutionReport::aggregate_shards("exec-1", &dup).is_err());

        let other = vec![ExecutionReport::shard_complete(
            "exec-2",
            ShardInfo { index: 0, total: 1 },
            summary(1, 0, 0, &[]),
        )];
        assert!(ExecutionReport::aggregate_shards("exec-1", &other).is_err());
    }

    #[test]
    fn aggregate_rejects_absurd_shard_total_without_allocating() {
        let shards = vec![shard(0, 50_000_000, summary(1, 0, 0, &[]))];
        let started = std::time::Instant::now();

        let err = ExecutionReport::aggregate_shards("exec-1", &shards).unwrap_err();

        assert!(started.elapsed() < std::time::Duration::from_secs(1));
        let message = err.to_string();
        assert!(message.contains("expected 50000000 shard reports, got 1"));
        assert!(message.contains("1, 2, 3"));
        assert!(message.contains("and 49999989 more"));
        assert!(message.len() < 200, "message too long: {} bytes", message.len());
    }

    #[test]
    fn counts_overflowing_u32_are_rejected() {
        let counts = TestCounts::new(u32::MAX, 1, 0);
        assert_eq!(counts.total, u32::MAX);
        assert!(!counts.is_consistent());

        let report = ExecutionReport::final_result(
            "e",
            ResultSummary {
                counts,
                failed_tests: Vec::new(),
            },
        );
        assert!(matches!(report.validate(), Err(TmsError::InvalidReport(_))));
    }

    #[test]
    fn cancelled_report_is_final_and_validates() {
        let report = ExecutionReport::cancelled("e", summary(3, 1, 6, &["checkout"]));
        assert_eq!(report.status, ExecutionStatus::Cancelled);
        assert!(report.status.is_final());
        assert_eq!(report.event_name(), "execution.completed");
        report.validate().unwrap();

        let mut no_results = report.clone();
        no_results.results = None;
        assert!(no_results.validate().is_err());

        let mut with_shard = report;
        with_shard.shard = Some(ShardInfo { index: 0, total: 1 });
        assert!(with_shard.validate().is_err());
    }

    #[test]
    fn metadata_from_github_env_builds_run_url() {
        let meta = RunMetadata::from_github_env(|name| {
            match name {
                "GITHUB_REPOSITORY" => Some("acme/web"),
                "GITHUB_RUN_ID" => Some("991"),
                "GITHUB_SERVER_URL" => Some("https://github.com/"),
                "GITHUB_REF_NAME" => Some("main"),
                "GITHUB_ACTOR" => Some(""),
                _ => None,
            }
            .map(String::from)
        });
        assert_eq!(
            meta.run_url.as_deref(),
            Some("https://github.com/acme/web/actions/runs/991")
        );
        assert_eq!(meta.branch.as_deref(), Some("main"));
        assert_eq!(meta.actor, None);

        let report = ExecutionReport::started("e").with_metadata(RunMetadata::default());
        assert!(report.metadata.is_none());
    }

    #[test]
    fn artifact_parse_requires_name_and_url() {
        let a = Artifact::parse("playwright-report=https://ci/a.zip").unwrap();
        assert_eq!(a.name, "playwright-report");
        assert_eq!(a.url, "https://ci/a.zip");
        assert!(Artifact::parse("no-separator").is_err());
        assert!(Artifact::parse("=https://ci").is_err());
    }
}
