//! Workflow executor: dependency-driven concurrent scheduling.
//!
//! The `DagExecutor` dispatches a step as soon as every one of its
//! dependencies is terminal, rather than in fixed waves. A single coordinator
//! owns all run state (results, in-degree counters, the context); spawned
//! step tasks never touch it and report back through a `JoinSet` fan-in.
//!
//! # Execution flow
//!
//! 1. Build the dependency graph. Graph errors fail the run before any step
//!    is dispatched.
//! 2. Seed the ready set with root steps.
//! 3. Dispatch ready steps in declaration order: evaluate the guard, then
//!    either skip the step or spawn it on the `StepRunner`.
//! 4. Wait for the next terminal result, the workflow deadline, or external
//!    cancellation, whichever comes first.
//! 5. On each terminal result, release dependents whose counters reach zero
//!    and apply the error policy to failures.
//! 6. Once nothing is in flight, mark steps that never ran as aborted and
//!    build the report.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepgraph_types::config::GlobalConfig;
use stepgraph_types::workflow::{
    ErrorAction, ErrorPolicy, GraphError, SkipReason, StepDefinition, StepFailure, StepResult,
    StepStatus, WorkflowDefinition, WorkflowFailure, WorkflowResult, WorkflowRunStatus,
};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use uuid::Uuid;

use super::action::ActionRegistry;
use super::context::WorkflowContext;
use super::dag::DependencyGraph;
use super::expression::ConditionEvaluator;
use super::step_runner::StepRunner;

// ---------------------------------------------------------------------------
// ExecutorConfig
// ---------------------------------------------------------------------------

/// Executor-wide defaults, resolved from `GlobalConfig`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorConfig {
    /// Cap on in-flight steps when the workflow sets none.
    pub max_concurrency: Option<usize>,
    pub default_step_timeout: Option<Duration>,
    pub default_workflow_timeout: Option<Duration>,
    pub retry_backoff: Duration,
    pub max_retry_backoff: Duration,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self::from(&GlobalConfig::default())
    }
}

impl From<&GlobalConfig> for ExecutorConfig {
    fn from(config: &GlobalConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency.map(|n| n.max(1) as usize),
            default_step_timeout: config.default_step_timeout,
            default_workflow_timeout: config.default_workflow_timeout,
            retry_backoff: config.retry_backoff,
            max_retry_backoff: config.max_retry_backoff,
        }
    }
}

// ---------------------------------------------------------------------------
// ExecutorError
// ---------------------------------------------------------------------------

/// Construction-time failure of a workflow execution.
///
/// Still carries a full report: every step Skipped with `WorkflowAborted`.
#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("invalid workflow graph: {source}")]
    InvalidGraph {
        source: GraphError,
        report: Box<WorkflowResult>,
    },
}

impl ExecutorError {
    /// The partial report attached to the error.
    pub fn report(&self) -> &WorkflowResult {
        match self {
            ExecutorError::InvalidGraph { report, .. } => report,
        }
    }

    pub fn into_report(self) -> WorkflowResult {
        match self {
            ExecutorError::InvalidGraph { report, .. } => *report,
        }
    }
}

// ---------------------------------------------------------------------------
// WorkflowExecutor trait
// ---------------------------------------------------------------------------

/// Trait for workflow execution engines.
///
/// Uses RPITIT for async methods.
pub trait WorkflowExecutor: Send + Sync {
    /// Execute every step of `definition`.
    ///
    /// Returns a report even when steps fail; `Err` only for graph errors.
    /// Cancelling `cancel` aborts the run with cause `Cancelled`.
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<WorkflowResult, ExecutorError>> + Send;

    /// Run a single step against an existing context, outside a full run.
    ///
    /// Applies the same guard, timeout and retry semantics as `execute`.
    fn execute_step(
        &self,
        step: &StepDefinition,
        context: &WorkflowContext,
        cancel: CancellationToken,
    ) -> impl Future<Output = StepResult> + Send;
}

// ---------------------------------------------------------------------------
// DagExecutor
// ---------------------------------------------------------------------------

/// Concurrent DAG executor.
///
/// Holds no per-run state; any number of runs (of the same or different
/// definitions) may execute concurrently on one executor.
pub struct DagExecutor {
    runner: Arc<StepRunner>,
    evaluator: ConditionEvaluator,
    config: ExecutorConfig,
}

impl DagExecutor {
    pub fn new(registry: Arc<ActionRegistry>, config: ExecutorConfig) -> Self {
        Self {
            runner: Arc::new(StepRunner::new(registry, config.clone())),
            evaluator: ConditionEvaluator::new(),
            config,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Per-attempt timeout: step, then workflow, then executor default.
    fn step_timeout(&self, definition: &WorkflowDefinition, step: &StepDefinition) -> Option<Duration> {
        step.timeout
            .or(definition.timeout)
            .or(self.config.default_step_timeout)
    }

    fn concurrency_cap(&self, definition: &WorkflowDefinition) -> Option<usize> {
        definition
            .max_concurrency
            .map(|n| n.max(1) as usize)
            .or(self.config.max_concurrency)
    }

    async fn run(
        &self,
        definition: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> Result<WorkflowResult, ExecutorError> {
        let run_id = Uuid::now_v7();
        let started_at = Utc::now();

        let graph = match DependencyGraph::build(&definition.steps) {
            Ok(graph) => graph,
            Err(error) => {
                tracing::warn!(run_id = %run_id, workflow = %definition.name, %error, "invalid workflow graph");
                let report = WorkflowResult {
                    run_id,
                    workflow_name: definition.name.clone(),
                    status: WorkflowRunStatus::Failed,
                    steps: definition
                        .steps
                        .iter()
                        .map(|s| StepResult::skipped(&s.id, SkipReason::WorkflowAborted))
                        .collect(),
                    failure: Some(WorkflowFailure::InvalidGraph {
                        error: error.clone(),
                    }),
                    started_at,
                    finished_at: Utc::now(),
                };
                return Err(ExecutorError::InvalidGraph {
                    source: error,
                    report: Box::new(report),
                });
            }
        };

        tracing::info!(
            run_id = %run_id,
            workflow = %definition.name,
            steps = definition.steps.len(),
            "workflow run started"
        );

        let workflow_timeout = definition
            .timeout
            .or(self.config.default_workflow_timeout);
        let deadline = workflow_timeout.map(|t| Instant::now() + t);
        let cap = self.concurrency_cap(definition);

        // Cancelled on workflow timeout or external cancel; every in-flight
        // step observes it through a child token.
        let run_token = cancel.child_token();
        // Set by the coordinator once it has handled a timeout or cancel.
        // `run_token` cannot serve here: it is already cancelled as soon as
        // the caller cancels the parent.
        let mut interrupted = false;

        let mut state = RunState::new(definition, graph);
        let mut join_set: JoinSet<StepResult> = JoinSet::new();
        let mut in_flight: HashMap<tokio::task::Id, usize> = HashMap::new();

        loop {
            // Cancellation or expiry may land while the coordinator is
            // outside `select!`; observe both before dispatching more work.
            if !interrupted {
                if cancel.is_cancelled() {
                    tracing::info!(run_id = %run_id, "workflow cancelled");
                    state.abort(WorkflowFailure::Cancelled);
                    run_token.cancel();
                    interrupted = true;
                } else if deadline.is_some_and(|d| Instant::now() >= d) {
                    let timeout_ms = workflow_timeout.map_or(0, |t| t.as_millis() as u64);
                    tracing::warn!(run_id = %run_id, timeout_ms, "workflow timed out");
                    state.abort(WorkflowFailure::Timeout { timeout_ms });
                    run_token.cancel();
                    interrupted = true;
                }
            }

            // Dispatch everything the cap allows.
            while !state.aborted && cap.is_none_or(|cap| in_flight.len() < cap) {
                let Some(idx) = state.ready.pop_first() else {
                    break;
                };
                let step = &definition.steps[idx];

                match self
                    .evaluator
                    .evaluate_guard(step.condition.as_deref(), &state.ctx)
                {
                    Ok(true) => {}
                    Ok(false) => {
                        tracing::debug!(run_id = %run_id, step_id = %step.id, "condition false, skipping step");
                        state.finish(
                            idx,
                            StepResult::skipped(&step.id, SkipReason::ConditionFalse),
                        );
                        continue;
                    }
                    Err(error) => {
                        let now = Utc::now();
                        state.finish(idx, StepResult::failed(&step.id, error.into(), now, 0));
                        continue;
                    }
                }

                let inputs = state.ctx.step_inputs(step);
                let timeout = self.step_timeout(definition, step);
                let runner = Arc::clone(&self.runner);
                let token = run_token.clone();
                let owned = step.clone();
                let span = tracing::debug_span!("step", run_id = %run_id, step_id = %step.id);

                tracing::debug!(run_id = %run_id, step_id = %step.id, "dispatching step");
                state.status[idx] = StepStatus::Running;
                let handle = join_set.spawn(
                    async move { runner.run(&owned, inputs, timeout, &token).await }.instrument(span),
                );
                in_flight.insert(handle.id(), idx);
            }

            if in_flight.is_empty() {
                break;
            }

            let expiry = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                joined = join_set.join_next_with_id() => {
                    let Some(joined) = joined else { continue };
                    let (task_id, result) = match joined {
                        Ok((task_id, result)) => (task_id, result),
                        Err(join_error) => {
                            let task_id = join_error.id();
                            let Some(&idx) = in_flight.get(&task_id) else { continue };
                            tracing::warn!(run_id = %run_id, step_id = %definition.steps[idx].id, "step task panicked");
                            let failure = StepFailure::Action {
                                message: format!("step task panicked: {join_error}"),
                            };
                            (task_id, StepResult::failed(&definition.steps[idx].id, failure, Utc::now(), 1))
                        }
                    };
                    if let Some(idx) = in_flight.remove(&task_id) {
                        state.finish(idx, result);
                    }
                }
                _ = expiry, if !interrupted => {
                    let timeout_ms = workflow_timeout.map_or(0, |t| t.as_millis() as u64);
                    tracing::warn!(run_id = %run_id, timeout_ms, "workflow timed out");
                    state.abort(WorkflowFailure::Timeout { timeout_ms });
                    run_token.cancel();
                    interrupted = true;
                }
                _ = cancel.cancelled(), if !interrupted => {
                    tracing::info!(run_id = %run_id, "workflow cancelled");
                    state.abort(WorkflowFailure::Cancelled);
                    run_token.cancel();
                    interrupted = true;
                }
            }
        }

        let result = state.into_result(run_id, started_at);
        tracing::info!(
            run_id = %run_id,
            workflow = %definition.name,
            status = %result.status,
            duration_ms = result.duration_ms(),
            "workflow run finished"
        );
        Ok(result)
    }
}

impl WorkflowExecutor for DagExecutor {
    fn execute(
        &self,
        definition: &WorkflowDefinition,
        cancel: CancellationToken,
    ) -> impl Future<Output = Result<WorkflowResult, ExecutorError>> + Send {
        self.run(definition, cancel)
    }

    async fn execute_step(
        &self,
        step: &StepDefinition,
        context: &WorkflowContext,
        cancel: CancellationToken,
    ) -> StepResult {
        match self
            .evaluator
            .evaluate_guard(step.condition.as_deref(), context)
        {
            Ok(true) => {}
            Ok(false) => return StepResult::skipped(&step.id, SkipReason::ConditionFalse),
            Err(error) => return StepResult::failed(&step.id, error.into(), Utc::now(), 0),
        }
        let inputs = context.step_inputs(step);
        let timeout = step.timeout.or(self.config.default_step_timeout);
        self.runner.run(step, inputs, timeout, &cancel).await
    }
}

// ---------------------------------------------------------------------------
// RunState
// ---------------------------------------------------------------------------

/// Mutable state of one run. Owned and mutated only by the coordinator.
struct RunState<'d> {
    definition: &'d WorkflowDefinition,
    graph: DependencyGraph,
    status: Vec<StepStatus>,
    results: Vec<Option<StepResult>>,
    /// Dependencies of each step not yet terminal.
    remaining: Vec<usize>,
    ready: BTreeSet<usize>,
    ctx: WorkflowContext,
    failure: Option<WorkflowFailure>,
    /// No further dispatch once set.
    aborted: bool,
}

impl<'d> RunState<'d> {
    fn new(definition: &'d WorkflowDefinition, graph: DependencyGraph) -> Self {
        let n = graph.len();
        let remaining = graph.in_degrees();
        let ready = graph.roots().collect();
        Self {
            definition,
            graph,
            status: vec![StepStatus::Pending; n],
            results: vec![None; n],
            remaining,
            ready,
            ctx: WorkflowContext::with_variables(definition.variables.clone()),
            failure: None,
            aborted: false,
        }
    }

    /// Stop dispatching. The first recorded cause wins.
    fn abort(&mut self, failure: WorkflowFailure) {
        self.aborted = true;
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
    }

    fn policy_for(&self, idx: usize) -> ErrorPolicy {
        let step = &self.definition.steps[idx];
        step.on_error
            .clone()
            .or_else(|| self.definition.on_error.clone())
            .unwrap_or_default()
    }

    /// Record a terminal result and propagate it to dependents.
    ///
    /// Failed steps skip their still-Pending direct dependents with
    /// `UpstreamFailure`; any other terminal result decrements dependents'
    /// counters and readies those that reach zero.
    fn finish(&mut self, idx: usize, result: StepResult) {
        let mut worklist = vec![(idx, result)];

        while let Some((idx, result)) = worklist.pop() {
            let status = result.status;
            let step_id = self.graph.id(idx).to_string();
            self.ctx.record(&step_id, status, &result.output);
            self.status[idx] = status;

            match status {
                StepStatus::Completed => {
                    tracing::debug!(step_id = %step_id, attempts = result.attempts, "step completed");
                }
                StepStatus::Failed => {
                    let policy = self.policy_for(idx);
                    let error = result
                        .error
                        .as_ref()
                        .map(ToString::to_string)
                        .unwrap_or_default();
                    tracing::warn!(
                        step_id = %step_id,
                        error = %error,
                        policy = ?policy.action,
                        message = policy.message.as_deref().unwrap_or(""),
                        "step failed"
                    );
                    if policy.action == ErrorAction::Abort {
                        self.abort(WorkflowFailure::StepFailed {
                            step_id: step_id.clone(),
                        });
                    }
                }
                _ => {}
            }
            self.results[idx] = Some(result);

            let dependents = self.graph.dependents(idx).to_vec();
            for dep in dependents {
                if self.status[dep] != StepStatus::Pending {
                    continue;
                }
                if status == StepStatus::Failed {
                    self.status[dep] = StepStatus::Skipped;
                    self.ready.remove(&dep);
                    let skipped = StepResult::skipped(
                        self.graph.id(dep),
                        SkipReason::UpstreamFailure {
                            step_id: step_id.clone(),
                        },
                    );
                    tracing::debug!(step_id = %self.graph.id(dep), upstream = %step_id, "skipping step after upstream failure");
                    worklist.push((dep, skipped));
                } else {
                    self.remaining[dep] = self.remaining[dep].saturating_sub(1);
                    if self.remaining[dep] == 0 {
                        self.ready.insert(dep);
                    }
                }
            }
        }
    }

    fn into_result(self, run_id: Uuid, started_at: chrono::DateTime<Utc>) -> WorkflowResult {
        let steps = self
            .results
            .into_iter()
            .enumerate()
            .map(|(idx, result)| {
                result.unwrap_or_else(|| {
                    StepResult::skipped(self.graph.id(idx), SkipReason::WorkflowAborted)
                })
            })
            .collect();

        let status = if self.failure.is_some() {
            WorkflowRunStatus::Failed
        } else {
            WorkflowRunStatus::Completed
        };

        WorkflowResult {
            run_id,
            workflow_name: self.definition.name.clone(),
            status,
            steps,
            failure: self.failure,
            started_at,
            finished_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
