//! Built-in actions available to every workflow run from the CLI.
//!
//! - `echo` -- returns its inputs as output
//! - `sleep` -- waits for `duration`, stopping early on cancellation
//! - `fail` -- always fails with `message`
//! - `log` -- emits `message` through tracing at `level` and returns it

use std::time::Duration;

use serde_json::{Value, json};
use stepgraph_core::workflow::action::{Action, ActionContext, ActionError, ActionRegistry};
use stepgraph_types::duration::{format_duration, parse_duration};
use stepgraph_types::workflow::ValueMap;

/// Registry holding every built-in action.
pub fn builtin_registry() -> ActionRegistry {
    let mut registry = ActionRegistry::new();
    registry
        .register("echo", EchoAction)
        .register("sleep", SleepAction)
        .register("fail", FailAction)
        .register("log", LogAction);
    registry
}

fn string_input<'a>(inputs: &'a ValueMap, key: &str) -> Option<&'a str> {
    inputs.get(key).and_then(Value::as_str)
}

// ---------------------------------------------------------------------------
// echo
// ---------------------------------------------------------------------------

pub struct EchoAction;

impl Action for EchoAction {
    async fn execute(&self, _ctx: ActionContext, inputs: ValueMap) -> Result<ValueMap, ActionError> {
        Ok(inputs)
    }
}

// ---------------------------------------------------------------------------
// sleep
// ---------------------------------------------------------------------------

/// Sleeps for `duration` (`"250ms"`, `"2s"`, or a number of seconds).
pub struct SleepAction;

impl SleepAction {
    fn duration(inputs: &ValueMap) -> Result<Duration, ActionError> {
        match inputs.get("duration") {
            None => Err(ActionError::new("sleep requires a 'duration' input")),
            Some(Value::String(s)) => {
                parse_duration(s).map_err(|e| ActionError::new(format!("invalid duration: {e}")))
            }
            Some(Value::Number(n)) => n
                .as_f64()
                .filter(|secs| secs.is_finite() && *secs >= 0.0)
                .map(Duration::from_secs_f64)
                .ok_or_else(|| ActionError::new(format!("invalid duration: {n}"))),
            Some(other) => Err(ActionError::new(format!("invalid duration: {other}"))),
        }
    }
}

impl Action for SleepAction {
    async fn execute(&self, ctx: ActionContext, inputs: ValueMap) -> Result<ValueMap, ActionError> {
        let duration = Self::duration(&inputs)?;
        tokio::select! {
            _ = ctx.cancel.cancelled() => Err(ActionError::new("sleep cancelled")),
            _ = tokio::time::sleep(duration) => {
                let mut out = ValueMap::new();
                out.insert("slept".into(), json!(format_duration(duration)));
                out.insert("slept_ms".into(), json!(duration.as_millis() as u64));
                Ok(out)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// fail
// ---------------------------------------------------------------------------

pub struct FailAction;

impl Action for FailAction {
    async fn execute(&self, ctx: ActionContext, inputs: ValueMap) -> Result<ValueMap, ActionError> {
        let message = string_input(&inputs, "message")
            .map(str::to_string)
            .unwrap_or_else(|| format!("step '{}' failed", ctx.step_id));
        Err(ActionError(message))
    }
}

// ---------------------------------------------------------------------------
// log
// ---------------------------------------------------------------------------

pub struct LogAction;

impl Action for LogAction {
    async fn execute(&self, ctx: ActionContext, inputs: ValueMap) -> Result<ValueMap, ActionError> {
        let message = match inputs.get("message") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(ActionError::new("log requires a 'message' input")),
        };
        let level = string_input(&inputs, "level").unwrap_or("info");
        match level {
            "error" => tracing::error!(step_id = %ctx.step_id, "{message}"),
            "warn" => tracing::warn!(step_id = %ctx.step_id, "{message}"),
            "debug" => tracing::debug!(step_id = %ctx.step_id, "{message}"),
            "trace" => tracing::trace!(step_id = %ctx.step_id, "{message}"),
            "info" => tracing::info!(step_id = %ctx.step_id, "{message}"),
            other => return Err(ActionError::new(format!("unknown log level '{other}'"))),
        }
        let mut out = ValueMap::new();
        out.insert("message".into(), json!(message));
        Ok(out)
    }
}
