//! Single-step execution with per-attempt timeout and sequential retries.
//!
//! `StepRunner` resolves the step's action in the registry and invokes it
//! with already-resolved inputs. Each attempt races the action future
//! against its deadline and the run's cancellation token:
//!
//! - deadline first: the attempt's child token is cancelled and the attempt
//!   fails with `Timeout`
//! - cancellation first: the step fails with `Cancelled` and is not retried
//!
//! Losing futures are dropped at their current await point. Work that
//! blocks a thread without awaiting is not interrupted; handlers doing such
//! work must poll `ActionContext::cancel` themselves.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use stepgraph_types::workflow::{StepDefinition, StepFailure, StepResult, ValueMap};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::action::{ActionContext, ActionDyn, ActionRegistry};
use super::executor::ExecutorConfig;
use super::retry::RetryHandler;

// ---------------------------------------------------------------------------
// StepRunner
// ---------------------------------------------------------------------------

/// Invokes one step's action through the registry.
pub struct StepRunner {
    registry: Arc<ActionRegistry>,
    config: ExecutorConfig,
}

impl StepRunner {
    pub fn new(registry: Arc<ActionRegistry>, config: ExecutorConfig) -> Self {
        Self { registry, config }
    }

    pub fn registry(&self) -> &ActionRegistry {
        &self.registry
    }

    /// Run `step` to a terminal Completed or Failed result.
    ///
    /// `timeout` bounds each attempt separately. Unknown actions fail
    /// immediately with zero attempts.
    pub async fn run(
        &self,
        step: &StepDefinition,
        inputs: ValueMap,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> StepResult {
        let started_at = Utc::now();

        let Some(action) = self.registry.resolve(&step.action) else {
            tracing::warn!(step_id = %step.id, action = %step.action, "unknown action");
            return StepResult::failed(
                &step.id,
                StepFailure::UnknownAction {
                    name: step.action.clone(),
                },
                started_at,
                0,
            );
        };

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            tracing::debug!(step_id = %step.id, attempt, "step attempt started");

            let failure = match self
                .attempt(action.as_ref(), step, inputs.clone(), attempt, timeout, cancel)
                .await
            {
                Ok(output) => {
                    tracing::debug!(step_id = %step.id, attempt, "step attempt completed");
                    return StepResult::completed(&step.id, output, started_at, attempt);
                }
                Err(failure) => failure,
            };

            if !RetryHandler::should_retry(step.retries, attempt, &failure) {
                tracing::warn!(
                    step_id = %step.id,
                    attempt,
                    error = %failure,
                    "step failed"
                );
                return StepResult::failed(&step.id, failure, started_at, attempt);
            }

            let delay = RetryHandler::backoff(
                self.config.retry_backoff,
                self.config.max_retry_backoff,
                attempt,
            );
            tracing::warn!(
                step_id = %step.id,
                attempt,
                retries = step.retries,
                delay_ms = delay.as_millis() as u64,
                error = %failure,
                "step attempt failed, retrying"
            );

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return StepResult::failed(&step.id, StepFailure::Cancelled, started_at, attempt);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One invocation of the action, bounded by `timeout` and `cancel`.
    async fn attempt(
        &self,
        action: &dyn ActionDyn,
        step: &StepDefinition,
        inputs: ValueMap,
        attempt: u32,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ValueMap, StepFailure> {
        if cancel.is_cancelled() {
            return Err(StepFailure::Cancelled);
        }

        let child = cancel.child_token();
        let deadline = timeout.map(|t| Instant::now() + t);
        let ctx = ActionContext {
            step_id: step.id.clone(),
            attempt,
            cancel: child.clone(),
            deadline,
        };

        let expiry = async {
            match deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StepFailure::Cancelled),
            _ = expiry => Err(StepFailure::Timeout {
                timeout_ms: timeout.map_or(0, |t| t.as_millis() as u64),
            }),
            result = action.execute_boxed(ctx, inputs) => {
                result.map_err(|e| StepFailure::Action { message: e.0 })
            }
        };

        // Signal any work the handler detached from its future.
        child.cancel();
        outcome
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::workflow::action::ActionError;
    use serde_json::json;
    use stepgraph_types::workflow::StepStatus;

    fn runner(registry: ActionRegistry) -> StepRunner {
        StepRunner::new(Arc::new(registry), ExecutorConfig::default())
    }

    fn out(key: &str, value: serde_json::Value) -> ValueMap {
        let mut map = ValueMap::new();
        map.insert(key.into(), value);
        map
    }

    /// Registers `flaky`, which fails until its `fail_times` budget is spent.
    fn flaky_registry(fail_times: u32, calls: Arc<AtomicU32>) -> ActionRegistry {
        let mut registry = ActionRegistry::new();
        registry.register_fn("flaky", move |ctx: ActionContext, _inputs| {
            let calls = calls.clone();
            async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= fail_times {
                    Err(ActionError::new(format!("transient failure {n}")))
                } else {
                    Ok(out("attempt", json!(ctx.attempt)))
                }
            }
        });
        registry
    }

    #[tokio::test]
    async fn test_success_passes_inputs_through() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("echo", |_ctx, inputs: ValueMap| async move { Ok(inputs) });
        let step = StepDefinition::new("a", "echo");

        let result = runner(registry)
            .run(&step, out("x", json!(1)), None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.output["x"], json!(1));
        assert_eq!(result.attempts, 1);
        assert!(result.error.is_none());
        assert!(result.finished_at >= result.started_at);
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepDefinition::new("a", "flaky");
        step.retries = 2;

        let result = runner(flaky_registry(2, calls.clone()))
            .run(&step, ValueMap::new(), None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Completed);
        assert_eq!(result.attempts, 3);
        assert_eq!(result.output["attempt"], json!(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted_reports_last_error() {
        let calls = Arc::new(AtomicU32::new(0));
        let mut step = StepDefinition::new("a", "flaky");
        step.retries = 1;

        let result = runner(flaky_registry(2, calls.clone()))
            .run(&step, ValueMap::new(), None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 2);
        assert_eq!(
            result.error,
            Some(StepFailure::Action {
                message: "transient failure 2".into()
            })
        );
        assert!(result.output.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_action_is_not_retried() {
        let mut step = StepDefinition::new("a", "missing");
        step.retries = 3;

        let result = runner(ActionRegistry::new())
            .run(&step, ValueMap::new(), None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.attempts, 0);
        assert_eq!(
            result.error,
            Some(StepFailure::UnknownAction {
                name: "missing".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_each_attempt() {
        let calls = Arc::new(AtomicU32::new(0));
        let seen_cancel = Arc::new(AtomicU32::new(0));
        let mut registry = ActionRegistry::new();
        {
            let calls = calls.clone();
            let seen_cancel = seen_cancel.clone();
            registry.register_fn("slow", move |ctx: ActionContext, _inputs| {
                let calls = calls.clone();
                let seen_cancel = seen_cancel.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    assert!(ctx.deadline.is_some());
                    let token = ctx.cancel.clone();
                    tokio::spawn(async move {
                        token.cancelled().await;
                        seen_cancel.fetch_add(1, Ordering::SeqCst);
                    });
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(ValueMap::new())
                }
            });
        }
        let mut step = StepDefinition::new("a", "slow");
        step.retries = 1;

        let result = runner(registry)
            .run(
                &step,
                ValueMap::new(),
                Some(Duration::from_millis(50)),
                &CancellationToken::new(),
            )
            .await;
        tokio::task::yield_now().await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error, Some(StepFailure::Timeout { timeout_ms: 50 }));
        assert_eq!(result.attempts, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(seen_cancel.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_is_applied_between_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = ExecutorConfig {
            retry_backoff: Duration::from_millis(100),
            max_retry_backoff: Duration::from_millis(150),
            ..ExecutorConfig::default()
        };
        let runner = StepRunner::new(Arc::new(flaky_registry(2, calls)), config);
        let mut step = StepDefinition::new("a", "flaky");
        step.retries = 2;

        let start = Instant::now();
        let result = runner
            .run(&step, ValueMap::new(), None, &CancellationToken::new())
            .await;

        assert_eq!(result.status, StepStatus::Completed);
        // 100ms then min(200ms, 150ms)
        assert_eq!(start.elapsed(), Duration::from_millis(250));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let calls = Arc::new(AtomicU32::new(0));
        let step = StepDefinition::new("a", "flaky");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = runner(flaky_registry(0, calls.clone()))
            .run(&step, ValueMap::new(), None, &cancel)
            .await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error, Some(StepFailure::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_attempt() {
        let mut registry = ActionRegistry::new();
        registry.register_fn("hang", |_ctx, _inputs| async move {
            std::future::pending::<()>().await;
            Ok(ValueMap::new())
        });
        let mut step = StepDefinition::new("a", "hang");
        step.retries = 5;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let result = runner(registry)
            .run(&step, ValueMap::new(), None, &cancel)
            .await;

        assert_eq!(result.error, Some(StepFailure::Cancelled));
        assert_eq!(result.attempts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_backoff_stops_retrying() {
        let calls = Arc::new(AtomicU32::new(0));
        let config = ExecutorConfig {
            retry_backoff: Duration::from_secs(1),
            max_retry_backoff: Duration::from_secs(1),
            ..ExecutorConfig::default()
        };
        let runner = StepRunner::new(Arc::new(flaky_registry(5, calls.clone())), config);
        let mut step = StepDefinition::new("a", "flaky");
        step.retries = 3;
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let result = runner.run(&step, ValueMap::new(), None, &cancel).await;

        assert_eq!(result.status, StepStatus::Failed);
        assert_eq!(result.error, Some(StepFailure::Cancelled));
        assert_eq!(result.attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::from_millis(400));
    }
}
