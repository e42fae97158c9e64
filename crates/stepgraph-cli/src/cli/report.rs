//! Styled rendering of run reports and execution plans.

use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use stepgraph_types::workflow::{StepResult, StepStatus, WorkflowResult, WorkflowRunStatus};

/// Print a run report as a header plus one table row per step.
pub fn print_run_report(result: &WorkflowResult) {
    let run_id = result.run_id.to_string();
    let marker = match result.status {
        WorkflowRunStatus::Completed => style("*").green().bold(),
        _ => style("x").red().bold(),
    };

    println!();
    println!(
        "  {} Workflow {} {} in {}ms",
        marker,
        style(&result.workflow_name).cyan(),
        result.status,
        result.duration_ms()
    );
    println!("  Run: {}", style(&run_id[..8.min(run_id.len())]).dim());
    if let Some(failure) = &result.failure {
        println!("  Cause: {}", style(failure).red());
    }
    println!();
    println!("{}", step_table(&result.steps));
    println!();
}

/// Table of step results in declaration order.
pub fn step_table(steps: &[StepResult]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Step").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempts"),
            Cell::new("Duration"),
            Cell::new("Detail"),
        ]);

    for step in steps {
        table.add_row(vec![
            Cell::new(&step.step_id),
            format_status(step.status),
            Cell::new(step.attempts),
            Cell::new(format!("{}ms", step.duration_ms())),
            Cell::new(step_detail(step)),
        ]);
    }
    table
}

/// Error for failed steps, skip reason for skipped ones, output keys otherwise.
pub fn step_detail(step: &StepResult) -> String {
    if let Some(error) = &step.error {
        return error.to_string();
    }
    if let Some(reason) = &step.skip_reason {
        return reason.to_string();
    }
    if step.output.is_empty() {
        return String::new();
    }
    let keys: Vec<&str> = step.output.keys().map(String::as_str).collect();
    format!("output: {}", keys.join(", "))
}

/// Table of dependency waves: steps in the same wave may run concurrently.
pub fn plan_table(waves: &[Vec<String>]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![Cell::new("Wave").fg(Color::Cyan), Cell::new("Steps")]);

    for (idx, wave) in waves.iter().enumerate() {
        table.add_row(vec![Cell::new(idx + 1), Cell::new(wave.join(", "))]);
    }
    table
}

fn format_status(status: StepStatus) -> Cell {
    match status {
        StepStatus::Pending => Cell::new("pending").fg(Color::Yellow),
        StepStatus::Running => Cell::new("running").fg(Color::Blue),
        StepStatus::Completed => Cell::new("completed").fg(Color::Green),
        StepStatus::Failed => Cell::new("failed").fg(Color::Red),
        StepStatus::Skipped => Cell::new("skipped").fg(Color::DarkYellow),
    }
}
