//! Workflow subcommands: run, validate, plan, list.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use stepgraph_core::workflow::dag::DependencyGraph;
use stepgraph_core::workflow::definition::{discover_workflows, load_workflow_file};
use stepgraph_core::workflow::executor::{DagExecutor, ExecutorError, WorkflowExecutor};
use stepgraph_infra::actions::builtin_registry;
use stepgraph_infra::config::{load_executor_config, resolve_config_dir};
use stepgraph_types::workflow::WorkflowDefinition;

use super::report::{plan_table, print_run_report};

/// Output switches shared by every command.
#[derive(Debug, Clone, Copy)]
pub struct OutputMode {
    pub json: bool,
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Run
// ---------------------------------------------------------------------------

/// Execute a workflow file. Returns whether the run succeeded.
pub async fn handle_run(
    file: &Path,
    vars: &[String],
    config_dir: Option<PathBuf>,
    out: OutputMode,
) -> Result<bool> {
    let mut def = load_definition(file)?;
    for raw in vars {
        let (key, value) = parse_var(raw)?;
        def.variables.insert(key, value);
    }

    let config_dir = config_dir.unwrap_or_else(resolve_config_dir);
    let config = load_executor_config(&config_dir).await;
    let executor = DagExecutor::new(Arc::new(builtin_registry()), config);

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling workflow");
                cancel.cancel();
            }
        });
    }

    let spinner = (!out.json && !out.quiet).then(|| {
        let spinner = ProgressBar::new_spinner();
        if let Ok(spinner_style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            spinner.set_style(spinner_style);
        }
        spinner.set_message(format!("Running workflow '{}'...", def.name));
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        spinner
    });

    let outcome = executor.execute(&def, cancel).await;
    if let Some(spinner) = spinner {
        spinner.finish_and_clear();
    }

    let result = match outcome {
        Ok(result) => result,
        Err(err @ ExecutorError::InvalidGraph { .. }) => {
            if out.json {
                println!("{}", serde_json::to_string_pretty(err.report())?);
                return Ok(false);
            }
            bail!("workflow '{}' cannot run: {err}", def.name);
        }
    };

    if out.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else if !out.quiet {
        print_run_report(&result);
    }

    Ok(result.is_success())
}

/// Split `key=value`. The value is parsed as JSON when possible, otherwise
/// kept as a plain string.
pub fn parse_var(raw: &str) -> Result<(String, Value)> {
    let Some((key, value)) = raw.split_once('=') else {
        bail!("invalid --var '{raw}': expected KEY=VALUE");
    };
    let key = key.trim();
    if key.is_empty() {
        bail!("invalid --var '{raw}': empty key");
    }
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

/// Parse, validate and build the graph. Returns whether the graph is valid.
pub fn handle_validate(file: &Path, out: OutputMode) -> Result<bool> {
    let def = load_definition(file)?;
    match DependencyGraph::build(&def.steps) {
        Ok(graph) => {
            if out.json {
                let report = serde_json::json!({
                    "valid": true,
                    "name": def.name,
                    "steps": graph.len(),
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else if !out.quiet {
                println!(
                    "  {} Workflow {} is valid ({} steps)",
                    style("*").green().bold(),
                    style(&def.name).cyan(),
                    graph.len()
                );
            }
            Ok(true)
        }
        Err(error) => {
            if out.json {
                let report = serde_json::json!({
                    "valid": false,
                    "name": def.name,
                    "error": error,
                });
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                eprintln!(
                    "  {} Workflow {} is invalid: {}",
                    style("x").red().bold(),
                    style(&def.name).cyan(),
                    style(&error).red()
                );
            }
            Ok(false)
        }
    }
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

/// Print the dependency waves of a workflow.
pub fn handle_plan(file: &Path, out: OutputMode) -> Result<bool> {
    let def = load_definition(file)?;
    let graph = DependencyGraph::build(&def.steps)
        .with_context(|| format!("workflow '{}' has an invalid graph", def.name))?;

    let waves: Vec<Vec<String>> = graph
        .waves()
        .into_iter()
        .map(|wave| wave.into_iter().map(|idx| graph.id(idx).to_string()).collect())
        .collect();

    if out.json {
        let report = serde_json::json!({ "name": def.name, "waves": waves });
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(true);
    }

    println!();
    println!(
        "  Plan for {} ({} steps, {} waves)",
        style(&def.name).cyan(),
        graph.len(),
        waves.len()
    );
    println!();
    println!("{}", plan_table(&waves));
    println!();
    Ok(true)
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

/// List workflow files under `dir`.
pub fn handle_list(dir: &Path, out: OutputMode) -> Result<bool> {
    let found = discover_workflows(dir)
        .with_context(|| format!("failed to scan {}", dir.display()))?;

    if out.json {
        let list: Vec<_> = found
            .iter()
            .map(|(path, def)| {
                serde_json::json!({
                    "path": path.display().to_string(),
                    "name": def.name,
                    "version": def.version,
                    "steps": def.steps.len(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&list)?);
        return Ok(true);
    }

    if found.is_empty() {
        println!();
        println!("  No workflows found under {}.", dir.display());
        println!();
        return Ok(true);
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").fg(Color::Cyan),
            Cell::new("Version"),
            Cell::new("Steps"),
            Cell::new("Path"),
        ]);
    for (path, def) in &found {
        table.add_row(vec![
            Cell::new(&def.name),
            Cell::new(def.version.as_deref().unwrap_or("-")),
            Cell::new(def.steps.len()),
            Cell::new(path.display()),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(true)
}

fn load_definition(file: &Path) -> Result<WorkflowDefinition> {
    load_workflow_file(file).with_context(|| format!("failed to load {}", file.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_var_values() {
        assert_eq!(parse_var("env=prod").unwrap(), ("env".into(), json!("prod")));
        assert_eq!(parse_var("n=3").unwrap(), ("n".into(), json!(3)));
        assert_eq!(parse_var("flag=true").unwrap(), ("flag".into(), json!(true)));
        assert_eq!(
            parse_var("list=[1,2]").unwrap(),
            ("list".into(), json!([1, 2]))
        );
        assert_eq!(parse_var("url=a=b").unwrap(), ("url".into(), json!("a=b")));
        assert_eq!(parse_var("empty=").unwrap(), ("empty".into(), json!("")));
    }

    #[test]
    fn test_parse_var_rejects_malformed() {
        assert!(parse_var("novalue").is_err());
        assert!(parse_var("=x").is_err());
    }

    #[test]
    fn test_validate_and_plan_outcomes() {
        let dir = tempfile::TempDir::new().unwrap();
        let quiet = OutputMode {
            json: false,
            quiet: true,
        };

        let good = dir.path().join("good.yaml");
        std::fs::write(
            &good,
            "name: good\nsteps:\n  - id: a\n    name: A\n    action: echo\n  - id: b\n    name: B\n    action: echo\n    depends_on: [a]\n",
        )
        .unwrap();
        assert!(handle_validate(&good, quiet).unwrap());

        let cyclic = dir.path().join("cyclic.yaml");
        std::fs::write(
            &cyclic,
            "name: cyclic\nsteps:\n  - id: a\n    name: A\n    action: echo\n    depends_on: [b]\n  - id: b\n    name: B\n    action: echo\n    depends_on: [a]\n",
        )
        .unwrap();
        assert!(!handle_validate(&cyclic, quiet).unwrap());
        assert!(handle_plan(&cyclic, quiet).is_err());

        assert!(handle_validate(&dir.path().join("missing.yaml"), quiet).is_err());
    }
}
