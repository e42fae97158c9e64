//! Execution context: completed step outputs, workflow variables, and input
//! template resolution.
//!
//! A `WorkflowContext` is the read side of a run. The scheduler records a
//! step's output only once the step is terminal, then hands snapshots of the
//! context to the condition evaluator and to newly dispatched steps.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepgraph_types::workflow::{StepDefinition, StepStatus, ValueMap};

/// Accumulated state visible to guards and input templates.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowContext {
    /// Outputs of Completed steps keyed by step ID.
    pub step_outputs: HashMap<String, ValueMap>,
    /// Terminal status of every finished step keyed by step ID.
    pub step_statuses: HashMap<String, StepStatus>,
    /// Workflow-global variables.
    pub variables: BTreeMap<String, Value>,
}

impl WorkflowContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context seeded with workflow variables.
    pub fn with_variables(variables: BTreeMap<String, Value>) -> Self {
        Self {
            variables,
            ..Self::default()
        }
    }

    /// Record a terminal step. Only Completed steps contribute output.
    pub fn record(&mut self, step_id: &str, status: StepStatus, output: &ValueMap) {
        self.step_statuses.insert(step_id.to_string(), status);
        if status == StepStatus::Completed {
            self.step_outputs.insert(step_id.to_string(), output.clone());
        }
    }

    /// Insert a step output directly (used by tooling that runs single steps).
    pub fn set_step_output(&mut self, step_id: impl Into<String>, output: ValueMap) {
        let step_id = step_id.into();
        self.step_statuses
            .insert(step_id.clone(), StepStatus::Completed);
        self.step_outputs.insert(step_id, output);
    }

    pub fn get_step_output(&self, step_id: &str) -> Option<&ValueMap> {
        self.step_outputs.get(step_id)
    }

    /// Resolve `steps.<id>.output[.<path>...]` or `variables.<name>[.<path>...]`.
    ///
    /// Returns `None` (absent) when the step has no output, the variable is
    /// undefined, or any path segment is missing. Numeric segments index
    /// into arrays.
    pub fn lookup(&self, path: &[&str]) -> Option<Value> {
        match path {
            ["steps", step_id, "output", rest @ ..] => {
                let output = self.step_outputs.get(*step_id)?;
                match rest {
                    [] => Some(Value::Object(output.clone())),
                    [first, tail @ ..] => descend(output.get(*first)?, tail).cloned(),
                }
            }
            ["variables", name, rest @ ..] => descend(self.variables.get(*name)?, rest).cloned(),
            _ => None,
        }
    }

    /// Build the inputs for one invocation of `step`.
    ///
    /// Layers, lowest first: workflow variables, the step's `env`, the
    /// step's `with`. Step-level values go through template resolution.
    pub fn step_inputs(&self, step: &StepDefinition) -> ValueMap {
        let mut inputs = ValueMap::new();
        for (key, value) in &self.variables {
            inputs.insert(key.clone(), value.clone());
        }
        for (key, value) in step.env.iter().chain(&step.with) {
            inputs.insert(key.clone(), self.resolve_value(value));
        }
        inputs
    }

    /// Resolve templates inside a value, recursing into arrays and objects.
    pub fn resolve_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => self.resolve_string(s),
            Value::Array(items) => Value::Array(items.iter().map(|v| self.resolve_value(v)).collect()),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.resolve_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Resolve `{{ steps.<id>.output.<path> }}` and `{{ variables.<name> }}`.
    ///
    /// A string consisting of exactly one template becomes the referenced
    /// value with its type intact. Templates embedded in longer text are
    /// interpolated as strings. Unresolvable templates are left as-is.
    pub fn resolve_string(&self, template: &str) -> Value {
        let trimmed = template.trim();
        if let Some(inner) = single_template(trimmed) {
            if let Some(value) = self.lookup_expr(inner) {
                return value;
            }
            return Value::String(template.to_string());
        }

        let mut result = String::with_capacity(template.len());
        let mut rest = template;
        while let Some(start) = rest.find("{{") {
            let Some(len) = rest[start..].find("}}") else {
                break;
            };
            let end = start + len + 2;
            let inner = rest[start + 2..end - 2].trim();
            result.push_str(&rest[..start]);
            match self.lookup_expr(inner) {
                Some(value) => result.push_str(&value_to_string(&value)),
                None => result.push_str(&rest[start..end]),
            }
            rest = &rest[end..];
        }
        result.push_str(rest);
        Value::String(result)
    }

    fn lookup_expr(&self, expr: &str) -> Option<Value> {
        let segments: Vec<&str> = expr.split('.').collect();
        if segments.iter().any(|s| s.is_empty()) {
            return None;
        }
        self.lookup(&segments)
    }
}

/// `"{{ x }}"` -> `Some("x")` when the whole string is one template.
fn single_template(s: &str) -> Option<&str> {
    let inner = s.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") {
        return None;
    }
    Some(inner.trim())
}

fn descend<'a>(mut value: &'a Value, path: &[&str]) -> Option<&'a Value> {
    for segment in path {
        value = match value {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(value)
}

/// Render a value for string interpolation (strings without quotes).
pub fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ValueMap {
        match value {
            Value::Object(m) => m,
            other => panic!("expected object, got {other}"),
        }
    }

    fn sample() -> WorkflowContext {
        let mut ctx = WorkflowContext::with_variables(BTreeMap::from([
            ("env".to_string(), json!("staging")),
            ("region".to_string(), json!({"name": "eu-west"})),
        ]));
        ctx.set_step_output(
            "build",
            map(json!({"artifact": "app.tar", "size": 42, "tags": ["a", "b"]})),
        );
        ctx
    }

    #[test]
    fn test_lookup_step_output_paths() {
        let ctx = sample();
        assert_eq!(
            ctx.lookup(&["steps", "build", "output", "artifact"]),
            Some(json!("app.tar"))
        );
        assert_eq!(
            ctx.lookup(&["steps", "build", "output", "tags", "1"]),
            Some(json!("b"))
        );
        assert_eq!(ctx.lookup(&["steps", "build", "output", "missing"]), None);
        assert_eq!(ctx.lookup(&["steps", "deploy", "output", "x"]), None);
        assert_eq!(
            ctx.lookup(&["variables", "region", "name"]),
            Some(json!("eu-west"))
        );
        assert_eq!(ctx.lookup(&["bogus"]), None);
    }

    #[test]
    fn test_record_only_keeps_completed_output() {
        let mut ctx = WorkflowContext::new();
        ctx.record("a", StepStatus::Skipped, &ValueMap::new());
        ctx.record("b", StepStatus::Completed, &map(json!({"ok": true})));
        assert!(ctx.get_step_output("a").is_none());
        assert_eq!(ctx.step_statuses["a"], StepStatus::Skipped);
        assert_eq!(ctx.get_step_output("b").unwrap()["ok"], json!(true));
    }

    #[test]
    fn test_single_template_keeps_type() {
        let ctx = sample();
        assert_eq!(
            ctx.resolve_string("{{ steps.build.output.size }}"),
            json!(42)
        );
        assert_eq!(
            ctx.resolve_string("{{steps.build.output.tags}}"),
            json!(["a", "b"])
        );
    }

    #[test]
    fn test_embedded_templates_interpolate() {
        let ctx = sample();
        assert_eq!(
            ctx.resolve_string("deploy {{ steps.build.output.artifact }} to {{ variables.env }}"),
            json!("deploy app.tar to staging")
        );
    }

    #[test]
    fn test_unresolved_template_left_as_is() {
        let ctx = sample();
        assert_eq!(
            ctx.resolve_string("{{ steps.nope.output.x }}"),
            json!("{{ steps.nope.output.x }}")
        );
        assert_eq!(
            ctx.resolve_string("a {{ steps.nope.output.x }} b"),
            json!("a {{ steps.nope.output.x }} b")
        );
        assert_eq!(ctx.resolve_string("open {{ only"), json!("open {{ only"));
    }

    #[test]
    fn test_step_inputs_layering() {
        let ctx = sample();
        let mut step = StepDefinition::new("deploy", "echo");
        step.env = BTreeMap::from([
            ("env".to_string(), json!("staging")),
            ("tier".to_string(), json!("{{ steps.build.output.artifact }}")),
        ]);
        step.with = BTreeMap::from([
            ("env".to_string(), json!("prod")),
            (
                "file".to_string(),
                json!(["{{ steps.build.output.artifact }}"]),
            ),
        ]);
        let inputs = ctx.step_inputs(&step);
        assert_eq!(inputs["env"], json!("prod"));
        assert_eq!(inputs["tier"], json!("app.tar"));
        assert_eq!(inputs["region"], json!({"name": "eu-west"}));
        assert_eq!(inputs["file"], json!(["app.tar"]));
    }
}
