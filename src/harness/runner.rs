//! Scenario runner
//!
//! Runs lifecycle scenarios one after another against a single provider.

use anyhow::{Context, Result};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::error::ScenarioError;
use super::retry::{Sleeper, TokioSleeper};
use super::scenarios::{run_body, ScenarioSettings};
use super::setup::prepare;
use super::teardown::CleanupQueue;
use crate::config::HarnessConfig;
use crate::models::{RunSummary, Scenario, ScenarioResult, Tier, VmDescriptor};
use crate::provider::CloudProvider;
use crate::utils::{Stopwatch, Timer};

/// Runner for lifecycle scenarios
pub struct ScenarioRunner {
    provider: Arc<dyn CloudProvider>,
    base: VmDescriptor,
    settings: ScenarioSettings,
    sleeper: Arc<dyn Sleeper>,
    cleanup: CleanupQueue,
}

impl ScenarioRunner {
    /// Create a new runner
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        base: VmDescriptor,
        settings: ScenarioSettings,
    ) -> Self {
        Self {
            provider,
            base,
            settings,
            sleeper: Arc::new(TokioSleeper),
            cleanup: CleanupQueue::new(),
        }
    }

    /// Create a runner from the harness configuration
    pub fn from_config(provider: Arc<dyn CloudProvider>, config: &HarnessConfig) -> Result<Self> {
        let base = config
            .vm
            .to_descriptor()
            .context("Failed to build VM descriptor")?;
        let settings = ScenarioSettings {
            swap: config.swap.clone(),
            reboot: config.reboot.clone(),
        };
        Ok(Self::new(provider, base, settings))
    }

    /// Replace the sleeper used for polling and reboot delays
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Run a single scenario
    pub async fn run_scenario(&self, scenario: Scenario) -> ScenarioResult {
        if let Some(reason) = self.provider.unsupported_reason(scenario) {
            info!("Skipping {} on {}: {}", scenario, self.provider.name(), reason);
            return ScenarioResult::skip(scenario, reason);
        }

        let timer = Timer::start(scenario.short_name());
        info!("Running {}", scenario.description());

        let mut ctx = match prepare(self.provider.as_ref(), &self.base, &scenario.setup_plan()).await
        {
            Ok(ctx) => ctx,
            Err(e) => {
                error!("Setup of {} failed: {:#}", scenario, e);
                return ScenarioResult::error(scenario, timer.stop_ms(), format!("{e:#}"));
            }
        };
        let vm_name = ctx.vm.name().to_string();
        info!("Using VM {}", vm_name);

        let outcome = run_body(scenario, &mut ctx, &self.settings, self.sleeper.as_ref()).await;

        ctx.session.close().await;
        if scenario.deletes_on_teardown() {
            self.cleanup.request_delete(ctx.vm.clone());
        }

        let duration_ms = timer.stop_ms();
        let result = match outcome {
            Ok(()) => ScenarioResult::pass(scenario, duration_ms),
            Err(e) => match e.downcast_ref::<ScenarioError>() {
                Some(failure) => {
                    warn!("{} failed: {}", scenario, failure);
                    ScenarioResult::fail(scenario, duration_ms, failure.to_string())
                }
                None => {
                    error!("{} aborted: {:#}", scenario, e);
                    ScenarioResult::error(scenario, duration_ms, format!("{e:#}"))
                }
            },
        };

        result.with_vm(vm_name)
    }

    /// Run `scenarios` in order, reporting those in `skipped` as skipped
    pub async fn run(&self, scenarios: &[Scenario], skipped: &[Scenario]) -> RunSummary {
        info!(
            "Starting {} scenario(s) on {} provider",
            scenarios.len(),
            self.provider.name()
        );

        let started_at = Utc::now();
        let mut stopwatch = Stopwatch::new();
        let mut results = Vec::with_capacity(scenarios.len());

        for &scenario in scenarios {
            let result = if skipped.contains(&scenario) {
                ScenarioResult::skip(scenario, "Skipped by configuration")
            } else {
                self.run_scenario(scenario).await
            };
            info!("  {}", result);
            stopwatch.lap(scenario.short_name());
            results.push(result);
        }

        let summary = RunSummary::new(self.provider.name(), &self.base.name, started_at, results);

        info!(
            "Run completed in {}ms - Pass: {}/{} ({:.1}%)",
            stopwatch.total().as_millis(),
            summary.passed,
            summary.total,
            summary.pass_rate()
        );
        debug!("Scenario timings:\n{}", stopwatch.format());

        summary
    }

    /// Wait for background cleanup requested by teardown
    pub async fn drain(&self) {
        let pending = self.cleanup.pending();
        if pending > 0 {
            info!("Waiting for {} background VM deletion(s)", pending);
        }
        self.cleanup.drain().await;
    }
}

/// Resolve the scenarios to run from names and an optional tier filter.
///
/// With no names every scenario is selected. The result keeps the default
/// run order regardless of the order names were given in.
pub fn select_scenarios(names: &[String], tier: Option<Tier>) -> Result<Vec<Scenario>> {
    let mut requested = Vec::new();
    for name in names {
        let scenario =
            Scenario::from_name(name).with_context(|| format!("Unknown scenario: {name}"))?;
        requested.push(scenario);
    }

    Ok(Scenario::all()
        .into_iter()
        .filter(|s| requested.is_empty() || requested.contains(s))
        .filter(|s| tier.map_or(true, |t| s.tier() == t))
        .collect())
}
