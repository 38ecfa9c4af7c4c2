//! Scenario result models
//!
//! Defines scenario outcomes and the summary of a full run.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::scenario::{Scenario, Tier};

/// Scenario execution status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    Pass,
    Fail,
    Skip,
    Error,
}

impl TestStatus {
    pub fn symbol(&self) -> &'static str {
        match self {
            TestStatus::Pass => "✓",
            TestStatus::Fail => "✗",
            TestStatus::Skip => "○",
            TestStatus::Error => "!",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TestStatus::Pass)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Pass => write!(f, "PASS"),
            TestStatus::Fail => write!(f, "FAIL"),
            TestStatus::Skip => write!(f, "SKIP"),
            TestStatus::Error => write!(f, "ERROR"),
        }
    }
}

/// Result of a single scenario
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub scenario: Scenario,
    pub tracking_id: String,
    pub tier: Tier,
    pub vm_name: Option<String>,
    pub status: TestStatus,
    pub duration_ms: u64,
    pub message: Option<String>,
}

impl ScenarioResult {
    fn new(scenario: Scenario, status: TestStatus, duration_ms: u64) -> Self {
        Self {
            scenario,
            tracking_id: scenario.tracking_id().to_string(),
            tier: scenario.tier(),
            vm_name: None,
            status,
            duration_ms,
            message: None,
        }
    }

    pub fn pass(scenario: Scenario, duration_ms: u64) -> Self {
        Self::new(scenario, TestStatus::Pass, duration_ms)
    }

    pub fn fail(scenario: Scenario, duration_ms: u64, message: impl Into<String>) -> Self {
        Self::new(scenario, TestStatus::Fail, duration_ms).with_message(message)
    }

    pub fn skip(scenario: Scenario, reason: impl Into<String>) -> Self {
        Self::new(scenario, TestStatus::Skip, 0).with_message(reason)
    }

    pub fn error(scenario: Scenario, duration_ms: u64, error: impl Into<String>) -> Self {
        Self::new(scenario, TestStatus::Error, duration_ms).with_message(error)
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn with_vm(mut self, vm_name: impl Into<String>) -> Self {
        self.vm_name = Some(vm_name.into());
        self
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} [{}ms]",
            self.status.symbol(),
            self.scenario,
            self.duration_ms
        )?;
        if let Some(msg) = &self.message {
            write!(f, " - {msg}")?;
        }
        Ok(())
    }
}

/// Summary of one harness run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: String,
    pub provider: String,
    pub vm_name: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub total_duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl RunSummary {
    pub fn new(
        provider: impl Into<String>,
        vm_name: impl Into<String>,
        started_at: DateTime<Utc>,
        results: Vec<ScenarioResult>,
    ) -> Self {
        let count = |status: TestStatus| results.iter().filter(|r| r.status == status).count();

        Self {
            run_id: generate_run_id(&started_at),
            provider: provider.into(),
            vm_name: vm_name.into(),
            started_at,
            completed_at: Utc::now(),
            total: results.len(),
            passed: results.iter().filter(|r| r.status.is_success()).count(),
            failed: count(TestStatus::Fail),
            skipped: count(TestStatus::Skip),
            errors: count(TestStatus::Error),
            total_duration_ms: results.iter().map(|r| r.duration_ms).sum(),
            results,
        }
    }

    pub fn pass_rate(&self) -> f64 {
        if self.total == 0 {
            0.0
        } else {
            (self.passed as f64 / self.total as f64) * 100.0
        }
    }

    /// True when nothing failed or errored; skipped scenarios do not count
    pub fn is_all_passed(&self) -> bool {
        self.failed == 0 && self.errors == 0
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Run {} - {} provider, VM {}",
            self.run_id, self.provider, self.vm_name
        )?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for result in &self.results {
            writeln!(f, "  {result}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}",
            self.total, self.passed, self.failed, self.skipped, self.errors
        )?;
        writeln!(
            f,
            "Pass Rate: {:.1}% | Duration: {}ms",
            self.pass_rate(),
            self.total_duration_ms
        )
    }
}

/// Generate unique run ID
fn generate_run_id(started_at: &DateTime<Utc>) -> String {
    let timestamp = started_at.format("%Y%m%d_%H%M%S");
    let random: u32 = rand::random::<u32>() % 10000;
    format!("{timestamp}_{random:04}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_creation() {
        let result = ScenarioResult::pass(Scenario::StopVm, 100).with_vm("wala-vm");
        assert!(result.status.is_success());
        assert_eq!(result.tracking_id, "RHEL7-41654");
        assert_eq!(result.tier, Tier::Tier1);
        assert_eq!(result.vm_name.as_deref(), Some("wala-vm"));
    }

    #[test]
    fn test_result_display() {
        let result = ScenarioResult::fail(Scenario::DeleteVm, 42, "VM still exists");
        let rendered = result.to_string();
        assert!(rendered.contains("test_delete_vm"));
        assert!(rendered.contains("VM still exists"));
    }

    #[test]
    fn test_run_summary() {
        let results = vec![
            ScenarioResult::pass(Scenario::CreateVmSshkey, 100),
            ScenarioResult::fail(Scenario::StopVm, 50, "not stopped"),
            ScenarioResult::skip(Scenario::CreateVmAll, "filtered"),
            ScenarioResult::error(Scenario::DeleteVm, 10, "az failed"),
        ];

        let summary = RunSummary::new("azure", "wala-vm", Utc::now(), results);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.errors, 1);
        assert_eq!(summary.total_duration_ms, 160);
        assert!(!summary.is_all_passed());
        assert_eq!(summary.run_id.len(), "20260101_000000_0000".len());
    }

    #[test]
    fn test_skips_do_not_fail_run() {
        let results = vec![
            ScenarioResult::pass(Scenario::StopVm, 1),
            ScenarioResult::skip(Scenario::CreateVmAll, "filtered"),
        ];
        let summary = RunSummary::new("kubevirt", "wala-vm", Utc::now(), results);
        assert!(summary.is_all_passed());
        assert_eq!(summary.pass_rate(), 50.0);
    }
}
