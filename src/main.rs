//! WALA Lifecycle - VM lifecycle validation harness for the Linux guest agent
//!
//! A CLI tool that drives a cloud VM through create, start, stop, restart,
//! in-guest reboot and delete, and checks the guest agent's effects after
//! each transition.
//!
//! ## Features
//!
//! - 8 lifecycle scenarios across two tiers
//! - Azure (az CLI) and KubeVirt backends
//! - Swap recovery and reboot detection checks over SSH
//! - Background VM cleanup after create scenarios
//! - Multiple output formats (Table, JSON, CSV)
//!
//! ## Usage
//!
//! ```bash
//! # Run every scenario against Azure
//! wala-lifecycle run --config wala-lifecycle.yaml
//!
//! # Run selected scenarios
//! wala-lifecycle run -s stop_vm -s restart_vm
//!
//! # Run tier 1 only on KubeVirt
//! wala-lifecycle run --tier tier1 --provider kubevirt
//!
//! # List available scenarios
//! wala-lifecycle list --detailed
//!
//! # Write an example configuration
//! wala-lifecycle config init
//! ```

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};

mod cli;
mod config;
mod harness;
mod models;
mod output;
mod provider;
mod session;
mod utils;

use cli::{Args, Command, ConfigAction};
use config::{print_env_help, EnvConfig, HarnessConfig, ProviderKind};
use harness::{select_scenarios, ScenarioRunner};
use models::{Scenario, Tier, SCENARIO_TAGS};
use output::{save_summary, OutputFormat, ResultFormatter};
use utils::{init_logger, LogLevel};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let env = EnvConfig::load();

    init_logger(LogLevel::from_verbose(
        args.verbose || env.verbose.unwrap_or(false),
    ));

    match args.command {
        Command::Run(run_args) => run_scenarios(run_args, &env).await,
        Command::List(list_args) => {
            list_scenarios(list_args);
            Ok(())
        }
        Command::Config(config_args) => manage_config(config_args.action, &env),
    }
}

/// Load the file configuration and apply environment overrides
fn load_config(path: Option<PathBuf>, env: &EnvConfig) -> Result<HarnessConfig> {
    let path = path.or_else(|| env.config_file.as_deref().map(PathBuf::from));
    let (mut config, source) = HarnessConfig::load_or_default(path.as_deref())?;

    match source {
        Some(path) => info!("Loaded configuration from {}", path.display()),
        None => info!("No configuration file found, using defaults"),
    }

    if env.has_any() {
        debug!("Applying environment overrides");
    }
    env.apply(&mut config)?;
    Ok(config)
}

async fn run_scenarios(args: cli::RunArgs, env: &EnvConfig) -> Result<()> {
    let format = OutputFormat::from_str(&args.format)
        .ok_or_else(|| anyhow::anyhow!("Unknown output format: {}", args.format))?;

    let mut config = load_config(args.config, env)?;
    if let Some(provider) = &args.provider {
        config.provider.kind = ProviderKind::from_str(provider)
            .ok_or_else(|| anyhow::anyhow!("Unknown provider: {provider}"))?;
    }
    config.validate()?;

    let tier = match &args.tier {
        Some(tier) => {
            Some(Tier::from_str(tier).ok_or_else(|| anyhow::anyhow!("Unknown tier: {tier}"))?)
        }
        None => None,
    };
    let scenarios = select_scenarios(&args.scenarios, tier)?;

    info!(
        "Running {} scenario(s) against VM {} on {:?}",
        scenarios.len(),
        config.vm.name,
        config.provider.kind
    );

    let provider = provider::from_config(&config)
        .await
        .context("Failed to initialize provider")?;
    let runner = ScenarioRunner::from_config(provider, &config)?;

    let summary = runner.run(&scenarios, &config.skipped_scenarios()).await;

    let mut formatter = ResultFormatter::new(format);
    if args.no_color {
        formatter = formatter.no_color();
    }
    println!("{}", formatter.format_summary(&summary));

    runner.drain().await;

    if let Some(path) = &args.output {
        save_summary(path, &summary)?;
    }

    if !summary.is_all_passed() {
        anyhow::bail!(
            "{} scenario(s) failed, {} errored",
            summary.failed,
            summary.errors
        );
    }
    Ok(())
}

fn list_scenarios(args: cli::ListArgs) {
    println!("\nWALA Lifecycle Scenarios ({} total)\n", Scenario::all().len());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for tier in [Tier::Tier1, Tier::Tier2] {
        println!("\n{tier}:");
        println!("──────────────────────────────────────────────────────────────────────");

        for scenario in Scenario::all().into_iter().filter(|s| s.tier() == tier) {
            println!("  {:30} {}", scenario.short_name(), scenario.tracking_id());
            if args.detailed {
                println!("      {}", scenario.description());
                println!("      setup: {:?}", scenario.setup_plan());
                println!(
                    "      deletes on teardown: {}",
                    scenario.deletes_on_teardown()
                );
                println!("      tags: {}", SCENARIO_TAGS.join(", "));
            }
        }
    }

    println!("\n━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
}

fn manage_config(action: ConfigAction, env: &EnvConfig) -> Result<()> {
    match action {
        ConfigAction::Show { config } => {
            let mut config = load_config(config, env)?;
            if config.vm.password.is_some() {
                config.vm.password = Some("****".to_string());
            }
            print!("{}", serde_yaml::to_string(&config)?);
        }
        ConfigAction::Init { path, force } => {
            if path.exists() && !force {
                anyhow::bail!(
                    "{} already exists, pass --force to overwrite",
                    path.display()
                );
            }
            HarnessConfig::example().save(&path)?;
            println!("✓ Wrote example configuration to {}", path.display());
        }
        ConfigAction::Env => {
            print_env_help();
            println!();
            env.print_summary();
        }
    }
    Ok(())
}
