//! stepgraph CLI entry point.
//!
//! Binary name: `stepgraph`
//!
//! Parses arguments, installs tracing, then dispatches to the workflow
//! command handlers. Exits with status 1 when a run or validation fails.

mod cli;

use std::process::ExitCode;

use clap::Parser;
use clap_complete::generate;

use cli::workflow::{self, OutputMode};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        let mut cmd = <Cli as clap::CommandFactory>::command();
        generate(*shell, &mut cmd, "stepgraph", &mut std::io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    stepgraph_observe::tracing_setup::init_tracing(cli.log_filter(), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let out = OutputMode {
        json: cli.json,
        quiet: cli.quiet,
    };

    let outcome = match cli.command {
        Commands::Run { file, vars } => {
            workflow::handle_run(&file, &vars, cli.config_dir, out).await
        }
        Commands::Validate { file } => workflow::handle_validate(&file, out),
        Commands::Plan { file } => workflow::handle_plan(&file, out),
        Commands::List { dir } => workflow::handle_list(&dir, out),
        Commands::Completions { .. } => Ok(true),
    };

    stepgraph_observe::tracing_setup::shutdown_tracing();

    Ok(if outcome? {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
