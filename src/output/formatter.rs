//! Output formatters for scenario results
//!
//! Provides table, JSON, CSV and one-line summary formats.

use anyhow::Context;
use serde::Serialize;
use std::path::Path;

use crate::models::{RunSummary, ScenarioResult, TestStatus};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Csv,
    Summary,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            "csv" => Some(OutputFormat::Csv),
            "summary" => Some(OutputFormat::Summary),
            _ => None,
        }
    }
}

/// One CSV row per scenario
#[derive(Serialize)]
struct CsvRow<'a> {
    scenario: &'a str,
    tracking_id: &'a str,
    tier: &'a str,
    status: String,
    duration_ms: u64,
    message: &'a str,
}

impl<'a> From<&'a ScenarioResult> for CsvRow<'a> {
    fn from(result: &'a ScenarioResult) -> Self {
        Self {
            scenario: result.scenario.short_name(),
            tracking_id: &result.tracking_id,
            tier: result.tier.as_str(),
            status: result.status.to_string(),
            duration_ms: result.duration_ms,
            message: result.message.as_deref().unwrap_or(""),
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn status_label(&self, status: TestStatus) -> String {
        let plain = format!("{} {}", status.symbol(), status);
        if !self.colorize {
            return plain;
        }
        let color = match status {
            TestStatus::Pass => "32",
            TestStatus::Skip => "33",
            TestStatus::Fail | TestStatus::Error => "31",
        };
        format!("\x1b[{color}m{plain}\x1b[0m")
    }

    fn format_result_table(&self, result: &ScenarioResult) -> String {
        let mut line = format!(
            "{:28} {:12} {:5} {} [{:>7}ms]",
            result.scenario.short_name(),
            result.tracking_id,
            result.tier.as_str(),
            self.status_label(result.status),
            result.duration_ms
        );
        if let Some(message) = &result.message {
            line.push_str(&format!("\n      {message}"));
        }
        line
    }

    /// Format a run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Table => self.format_summary_table(summary),
            OutputFormat::Json => serde_json::to_string(summary).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(summary).unwrap_or_default(),
            OutputFormat::Csv => render_csv(&summary.results),
            OutputFormat::Summary => format!(
                "{} run {} on {}: {}/{} passed ({:.1}%) in {}ms",
                summary.vm_name,
                summary.run_id,
                summary.provider,
                summary.passed,
                summary.total,
                summary.pass_rate(),
                summary.total_duration_ms
            ),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n═══════════════════════════════════════════════════════════════\n");
        output.push_str(&format!(
            " Run {} - {} provider, VM {}\n",
            summary.run_id, summary.provider, summary.vm_name
        ));
        output.push_str("═══════════════════════════════════════════════════════════════\n");

        for result in &summary.results {
            output.push_str(&format!(" {}\n", self.format_result_table(result)));
        }

        output.push_str("───────────────────────────────────────────────────────────────\n");

        let failed = if self.colorize && summary.failed + summary.errors > 0 {
            format!("\x1b[31m{}\x1b[0m", summary.failed)
        } else {
            summary.failed.to_string()
        };
        output.push_str(&format!(
            " Total: {} | Pass: {} | Fail: {} | Skip: {} | Error: {}\n",
            summary.total, summary.passed, failed, summary.skipped, summary.errors
        ));
        output.push_str(&format!(
            " Pass Rate: {:.1}% | Duration: {}ms\n",
            summary.pass_rate(),
            summary.total_duration_ms
        ));

        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

fn render_csv(results: &[ScenarioResult]) -> String {
    let mut writer = csv::WriterBuilder::new()
        .has_headers(true)
        .from_writer(Vec::new());
    for result in results {
        if writer.serialize(CsvRow::from(result)).is_err() {
            return String::new();
        }
    }
    writer
        .into_inner()
        .ok()
        .and_then(|bytes| String::from_utf8(bytes).ok())
        .unwrap_or_default()
}

/// Write a run summary to a file as pretty JSON
pub fn save_summary(path: &Path, summary: &RunSummary) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
    }

    let content = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write summary to {}", path.display()))?;

    tracing::info!("Summary saved to {}", path.display());
    Ok(())
}
