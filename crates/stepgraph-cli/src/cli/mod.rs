//! CLI command definitions for the `stepgraph` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod report;
pub mod workflow;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use clap_complete::Shell;

/// Run dependency-aware step workflows.
#[derive(Parser)]
#[command(name = "stepgraph", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for verbose, -vv for debug/trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export tracing spans through OpenTelemetry (stdout exporter).
    #[arg(long, global = true)]
    pub otel: bool,

    /// Directory holding `config.toml` (default: ~/.stepgraph).
    #[arg(long, global = true, env = "STEPGRAPH_CONFIG_DIR")]
    pub config_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Default tracing filter for the chosen verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 if self.quiet => "error",
            0 => "warn",
            1 => "info,stepgraph_core=debug",
            _ => "trace",
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow file with the built-in actions.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Override a workflow variable (`key=value`; JSON values allowed).
        #[arg(long = "var", value_name = "KEY=VALUE")]
        vars: Vec<String>,
    },

    /// Parse and validate a workflow file, including its dependency graph.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Show the execution plan (dependency waves) of a workflow file.
    Plan {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// List workflow files found under a directory.
    #[command(alias = "ls")]
    List {
        /// Directory to search recursively.
        #[arg(default_value = ".")]
        dir: PathBuf,
    },

    /// Generate shell completions.
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_with_vars() {
        let cli = Cli::try_parse_from([
            "stepgraph",
            "run",
            "flow.yaml",
            "--var",
            "env=prod",
            "--var",
            "count=3",
            "--json",
        ])
        .unwrap();
        assert!(cli.json);
        match cli.command {
            Commands::Run { file, vars } => {
                assert_eq!(file, PathBuf::from("flow.yaml"));
                assert_eq!(vars, vec!["env=prod", "count=3"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_log_filter_levels() {
        let cli = Cli::try_parse_from(["stepgraph", "-q", "plan", "f.yaml"]).unwrap();
        assert_eq!(cli.log_filter(), "error");
        let cli = Cli::try_parse_from(["stepgraph", "plan", "f.yaml"]).unwrap();
        assert_eq!(cli.log_filter(), "warn");
        let cli = Cli::try_parse_from(["stepgraph", "-v", "plan", "f.yaml"]).unwrap();
        assert_eq!(cli.log_filter(), "info,stepgraph_core=debug");
        let cli = Cli::try_parse_from(["stepgraph", "-vv", "plan", "f.yaml"]).unwrap();
        assert_eq!(cli.log_filter(), "trace");
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }
}
