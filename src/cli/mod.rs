//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// VM lifecycle validation harness
#[derive(Parser, Debug)]
#[command(name = "wala-lifecycle")]
#[command(version = "0.1.0")]
#[command(about = "Drive a cloud VM through its lifecycle and validate the guest agent")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run lifecycle scenarios
    Run(RunArgs),

    /// List available scenarios
    List(ListArgs),

    /// Inspect or create configuration
    Config(ConfigArgs),
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Scenario to run, by short name (repeatable; default: all)
    #[arg(short, long = "scenario")]
    pub scenarios: Vec<String>,

    /// Only run scenarios of this tier (tier1, tier2)
    #[arg(short, long)]
    pub tier: Option<String>,

    /// Provider backend (azure, kubevirt)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output format (table, json, json-pretty, csv, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,

    /// Save the run summary as JSON
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Disable colored table output
    #[arg(long)]
    pub no_color: bool,
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    /// Show tracking IDs and setup plans
    #[arg(short, long)]
    pub detailed: bool,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Print the effective configuration
    Show {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Write an example configuration file
    Init {
        /// Destination path
        #[arg(default_value = "wala-lifecycle.yaml")]
        path: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// List supported environment variables
    Env,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_args() {
        let args = Args::parse_from(["wala-lifecycle", "list", "--detailed"]);
        match args.command {
            Command::List(list_args) => assert!(list_args.detailed),
            _ => panic!("Expected List command"),
        }
    }

    #[test]
    fn test_run_args() {
        let args = Args::parse_from([
            "wala-lifecycle",
            "run",
            "--scenario",
            "test_stop_vm",
            "-s",
            "delete_vm",
            "--provider",
            "kubevirt",
            "--format",
            "json",
            "-v",
        ]);
        assert!(args.verbose);
        match args.command {
            Command::Run(run_args) => {
                assert_eq!(run_args.scenarios, vec!["test_stop_vm", "delete_vm"]);
                assert_eq!(run_args.provider.as_deref(), Some("kubevirt"));
                assert_eq!(run_args.format, "json");
                assert!(run_args.tier.is_none());
                assert!(!run_args.no_color);
            }
            _ => panic!("Expected Run command"),
        }
    }

    #[test]
    fn test_config_init_default_path() {
        let args = Args::parse_from(["wala-lifecycle", "config", "init"]);
        match args.command {
            Command::Config(ConfigArgs {
                action: ConfigAction::Init { path, force },
            }) => {
                assert_eq!(path, PathBuf::from("wala-lifecycle.yaml"));
                assert!(!force);
            }
            _ => panic!("Expected config init"),
        }
    }
}
