//! Swap recovery check after a restart

use anyhow::{Context, Result};
use std::cmp::Ordering;
use std::fmt;
use tracing::{debug, info};

use super::error::ScenarioError;
use super::retry::{retry_with_budget, Probe, RetryOutcome, Sleeper};
use crate::config::SwapConfig;
use crate::session::RemoteSession;

/// Prints the swap size in MB
pub const SWAP_SIZE_COMMAND: &str = "free -m|grep Swap|awk '{print $2}'";

/// Prints the numeric part of the release string
pub const RELEASE_VERSION_COMMAND: &str = "cat /etc/redhat-release |tr -cd '[0-9.\\n]'";

/// Dotted release version compared component by component
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReleaseVersion {
    components: Vec<u32>,
}

impl ReleaseVersion {
    /// Parse "7.9" style versions. An empty string parses to a version
    /// lower than any other.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim().trim_matches('.');
        if s.is_empty() {
            return Ok(Self {
                components: Vec::new(),
            });
        }

        let components = s
            .split('.')
            .filter(|part| !part.is_empty())
            .map(|part| {
                part.parse::<u32>()
                    .with_context(|| format!("Invalid version component '{part}' in '{s}'"))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { components })
    }
}

impl Ord for ReleaseVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.components.cmp(&other.components)
    }
}

impl PartialOrd for ReleaseVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ReleaseVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u32::to_string).collect();
        f.write_str(&parts.join("."))
    }
}

/// Pick the swap device for a guest release
pub fn select_swap_device<'a>(release: &ReleaseVersion, config: &'a SwapConfig) -> Result<&'a str> {
    let threshold = ReleaseVersion::parse(&config.legacy_below_version)?;
    if *release < threshold {
        Ok(&config.legacy_device)
    } else {
        Ok(&config.device)
    }
}

/// Read the guest release and turn its swap device off
pub async fn disable_swap(session: &dyn RemoteSession, config: &SwapConfig) -> Result<String> {
    let raw = session
        .cmd_output(RELEASE_VERSION_COMMAND)
        .await
        .context("Failed to read release version")?;
    let release = ReleaseVersion::parse(&raw)?;
    let device = select_swap_device(&release, config)?.to_string();

    debug!("Release '{}' uses swap device {}", release, device);
    session
        .cmd_output(&format!("sudo swapoff {device}"))
        .await
        .with_context(|| format!("Failed to turn off swap on {device}"))?;

    Ok(device)
}

/// Poll the swap size until it matches the expected size.
///
/// Returns the attempt that observed the expected size.
pub async fn wait_for_swap(
    session: &dyn RemoteSession,
    config: &SwapConfig,
    sleeper: &dyn Sleeper,
) -> Result<u32> {
    let expected = config.expected_size_mb.to_string();
    let budget = config.budget();

    let outcome = retry_with_budget(budget, sleeper, |attempt| {
        let expected = expected.clone();
        async move {
            let size = session
                .cmd_output(SWAP_SIZE_COMMAND)
                .await
                .context("Failed to read swap size")?;
            info!(
                "Swap size {} MB (attempt {}/{})",
                size,
                attempt,
                budget.attempts.max(1)
            );
            let probe = if size == expected {
                Probe::Ready(size)
            } else {
                Probe::NotYet(size)
            };
            Ok::<_, anyhow::Error>(probe)
        }
    })
    .await?;

    match outcome {
        RetryOutcome::Succeeded { attempt, .. } => Ok(attempt),
        RetryOutcome::Exhausted { attempts, last } => Err(ScenarioError::SwapNotRestored {
            expected,
            last,
            attempts,
        }
        .into()),
    }
}
