//! Workflow domain types for stepgraph.
//!
//! Defines the workflow model produced by the definition parser
//! (`WorkflowDefinition`, `StepDefinition`), the per-run report types
//! (`StepResult`, `WorkflowResult`) and the machine-readable failure taxonomy
//! (`StepFailure`, `SkipReason`, `GraphError`, `WorkflowFailure`).

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Loosely-typed mapping used for step inputs and outputs.
pub type ValueMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// A complete workflow definition.
///
/// Read-only once parsed. Each execution builds its own run state, so one
/// definition can be executed any number of times (also concurrently).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (non-empty identifier).
    pub name: String,
    /// Optional version label.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Workflow-global inputs, merged under every step's `with`.
    #[serde(default, alias = "env", skip_serializing_if = "BTreeMap::is_empty")]
    pub variables: BTreeMap<String, Value>,
    /// Deadline over the whole run. Also the default per-step timeout.
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Workflow-level error policy (default: abort).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
    /// Maximum number of concurrently running steps (None = graph-bound only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,
    /// Steps in declaration order.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    /// Look up a step by ID.
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// A single step in the workflow graph.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step ID, unique within a workflow.
    pub id: String,
    /// Display label.
    pub name: String,
    /// Action name resolved against the action registry at run time.
    pub action: String,
    /// Input parameters for the action.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub with: BTreeMap<String, Value>,
    /// Step-scoped inputs layered between workflow variables and `with`.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, Value>,
    /// Step IDs that must be terminal before this step is ready.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    /// Guard expression; the step is skipped when it evaluates to false.
    #[serde(rename = "if", default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    /// Per-attempt timeout.
    #[serde(
        default,
        with = "crate::duration::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub timeout: Option<Duration>,
    /// Additional attempts after a retryable failure.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub retries: u32,
    /// Override of the workflow-level error policy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_error: Option<ErrorPolicy>,
}

fn is_zero(n: &u32) -> bool {
    *n == 0
}

impl StepDefinition {
    /// Minimal step with no inputs, dependencies or policies.
    pub fn new(id: impl Into<String>, action: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            action: action.into(),
            with: BTreeMap::new(),
            env: BTreeMap::new(),
            depends_on: Vec::new(),
            condition: None,
            timeout: None,
            retries: 0,
            on_error: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error Policy
// ---------------------------------------------------------------------------

/// What the scheduler does when a step fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorAction {
    /// Stop dispatching, let running steps settle, fail the workflow.
    #[default]
    Abort,
    /// Skip the failed step's direct dependents and keep going.
    Continue,
}

/// Error policy attached to a workflow or step.
///
/// Accepts either a bare action (`on_error: continue`) or a mapping with an
/// optional message (`on_error: {action: continue, message: "..."}`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ErrorPolicyRepr")]
pub struct ErrorPolicy {
    pub action: ErrorAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ErrorPolicy {
    pub fn abort() -> Self {
        Self {
            action: ErrorAction::Abort,
            message: None,
        }
    }

    pub fn continue_on_error() -> Self {
        Self {
            action: ErrorAction::Continue,
            message: None,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ErrorPolicyRepr {
    Bare(ErrorAction),
    Full {
        action: ErrorAction,
        #[serde(default)]
        message: Option<String>,
    },
}

impl From<ErrorPolicyRepr> for ErrorPolicy {
    fn from(repr: ErrorPolicyRepr) -> Self {
        match repr {
            ErrorPolicyRepr::Bare(action) => Self {
                action,
                message: None,
            },
            ErrorPolicyRepr::Full { action, message } => Self { action, message },
        }
    }
}

// ---------------------------------------------------------------------------
// Step Execution
// ---------------------------------------------------------------------------

/// Status of an individual step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    /// Completed, Failed and Skipped admit no further transitions.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StepStatus::Completed | StepStatus::Failed | StepStatus::Skipped
        )
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Completed => "completed",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Machine-readable cause of a failed step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepFailure {
    /// The step's `if` expression could not be parsed.
    #[error("condition syntax error at position {position} in '{expression}': {message}")]
    ConditionSyntax {
        expression: String,
        position: usize,
        message: String,
    },

    /// No handler is registered under the step's action name.
    #[error("unknown action: {name}")]
    UnknownAction { name: String },

    /// An attempt exceeded its deadline.
    #[error("step timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The action reported a failure.
    #[error("action failed: {message}")]
    Action { message: String },

    /// The run was cancelled (caller abort or workflow timeout) mid-attempt.
    #[error("step cancelled")]
    Cancelled,
}

impl StepFailure {
    /// Timeouts and action errors are transient; everything else is final.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StepFailure::Timeout { .. } | StepFailure::Action { .. })
    }
}

/// Why a step ended Skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SkipReason {
    /// The step's `if` expression evaluated to false.
    ConditionFalse,
    /// A direct dependency failed.
    UpstreamFailure { step_id: String },
    /// The workflow aborted before the step could be scheduled.
    WorkflowAborted,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::ConditionFalse => f.write_str("condition was false"),
            SkipReason::UpstreamFailure { step_id } => {
                write!(f, "upstream step '{step_id}' failed")
            }
            SkipReason::WorkflowAborted => f.write_str("workflow aborted"),
        }
    }
}

/// Terminal record of one step within a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    /// Output produced by the action (empty unless Completed).
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub output: ValueMap,
    /// Present iff the step Failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    /// Present iff the step was Skipped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skip_reason: Option<SkipReason>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Number of action invocations (0 when the action never ran).
    pub attempts: u32,
}

impl StepResult {
    pub fn completed(
        step_id: impl Into<String>,
        output: ValueMap,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Completed,
            output,
            error: None,
            skip_reason: None,
            started_at,
            finished_at: Utc::now(),
            attempts,
        }
    }

    pub fn failed(
        step_id: impl Into<String>,
        error: StepFailure,
        started_at: DateTime<Utc>,
        attempts: u32,
    ) -> Self {
        Self {
            step_id: step_id.into(),
            status: StepStatus::Failed,
            output: ValueMap::new(),
            error: Some(error),
            skip_reason: None,
            started_at,
            finished_at: Utc::now(),
            attempts,
        }
    }

    pub fn skipped(step_id: impl Into<String>, reason: SkipReason) -> Self {
        let now = Utc::now();
        Self {
            step_id: step_id.into(),
            status: StepStatus::Skipped,
            output: ValueMap::new(),
            error: None,
            skip_reason: Some(reason),
            started_at: now,
            finished_at: now,
            attempts: 0,
        }
    }

    /// Wall-clock time between start and finish, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// ---------------------------------------------------------------------------
// Workflow Execution
// ---------------------------------------------------------------------------

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Running,
    Completed,
    Failed,
}

impl std::fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkflowRunStatus::Running => "running",
            WorkflowRunStatus::Completed => "completed",
            WorkflowRunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Structural problem in the dependency graph. Fatal to the whole run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GraphError {
    #[error("duplicate step ID '{step_id}'")]
    DuplicateStepId { step_id: String },

    #[error("step '{step_id}' depends on unknown step '{missing_id}'")]
    UnknownDependency { step_id: String, missing_id: String },

    #[error("cyclic dependency: {}", .cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },
}

/// Machine-readable cause of a failed workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowFailure {
    /// The graph could not be built; no step ran.
    InvalidGraph { error: GraphError },
    /// A step failed under the abort policy.
    StepFailed { step_id: String },
    /// The workflow-level deadline expired.
    Timeout { timeout_ms: u64 },
    /// The caller cancelled the run.
    Cancelled,
}

impl std::fmt::Display for WorkflowFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkflowFailure::InvalidGraph { error } => write!(f, "invalid graph: {error}"),
            WorkflowFailure::StepFailed { step_id } => write!(f, "step '{step_id}' failed"),
            WorkflowFailure::Timeout { timeout_ms } => {
                write!(f, "workflow timed out after {timeout_ms}ms")
            }
            WorkflowFailure::Cancelled => f.write_str("workflow cancelled"),
        }
    }
}

/// Report of one workflow execution.
///
/// `steps` holds one terminal `StepResult` per declared step, in declaration
/// order regardless of completion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowResult {
    pub run_id: Uuid,
    pub workflow_name: String,
    pub status: WorkflowRunStatus,
    pub steps: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<WorkflowFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl WorkflowResult {
    /// Look up a step result by step ID.
    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    /// IDs of all steps that ended Failed (including ones absorbed by policy).
    pub fn failed_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::Failed)
            .map(|s| s.step_id.as_str())
            .collect()
    }

    pub fn is_success(&self) -> bool {
        self.status == WorkflowRunStatus::Completed
    }

    /// Wall-clock time of the run, in milliseconds.
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
