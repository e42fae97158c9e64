//! Action handler port and the read-only action registry.
//!
//! Steps name an action; the registry maps that name to an injected handler.
//! `Action` uses RPITIT and cannot be a trait object, so the registry stores
//! handlers behind the object-safe `ActionDyn` with boxed futures:
//! 1. `Action` is the trait implementors write
//! 2. `ActionDyn` is blanket-implemented for every `T: Action`
//! 3. `ActionRegistry` holds `Arc<dyn ActionDyn>` values

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use stepgraph_types::workflow::ValueMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// ActionError
// ---------------------------------------------------------------------------

/// Failure reported by an action handler.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct ActionError(pub String);

impl ActionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

// ---------------------------------------------------------------------------
// ActionContext
// ---------------------------------------------------------------------------

/// Per-invocation information handed to an action.
#[derive(Debug, Clone)]
pub struct ActionContext {
    pub step_id: String,
    /// 1-based attempt number.
    pub attempt: u32,
    /// Cancelled when the attempt times out or the run is aborted.
    ///
    /// Futures are dropped at their next await point regardless; handlers
    /// doing blocking work should poll this token to stop early.
    pub cancel: CancellationToken,
    /// Instant at which this attempt times out, if bounded.
    pub deadline: Option<Instant>,
}

// ---------------------------------------------------------------------------
// Action traits
// ---------------------------------------------------------------------------

/// An executable step action.
pub trait Action: Send + Sync {
    fn execute(
        &self,
        ctx: ActionContext,
        inputs: ValueMap,
    ) -> impl Future<Output = Result<ValueMap, ActionError>> + Send;
}

/// Object-safe form of [`Action`] with a boxed future.
pub trait ActionDyn: Send + Sync {
    fn execute_boxed<'a>(
        &'a self,
        ctx: ActionContext,
        inputs: ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<ValueMap, ActionError>> + Send + 'a>>;
}

impl<T: Action> ActionDyn for T {
    fn execute_boxed<'a>(
        &'a self,
        ctx: ActionContext,
        inputs: ValueMap,
    ) -> Pin<Box<dyn Future<Output = Result<ValueMap, ActionError>> + Send + 'a>> {
        Box::pin(self.execute(ctx, inputs))
    }
}

/// Adapter turning an async closure into an [`Action`].
pub struct FnAction<F>(F);

impl<F, Fut> Action for FnAction<F>
where
    F: Fn(ActionContext, ValueMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<ValueMap, ActionError>> + Send,
{
    fn execute(
        &self,
        ctx: ActionContext,
        inputs: ValueMap,
    ) -> impl Future<Output = Result<ValueMap, ActionError>> + Send {
        (self.0)(ctx, inputs)
    }
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Mapping from action name to handler.
///
/// Built up front and shared read-only (behind an `Arc`) by the executor;
/// concurrent lookups need no locking.
#[derive(Default, Clone)]
pub struct ActionRegistry {
    actions: HashMap<String, Arc<dyn ActionDyn>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler, replacing any previous one with the same name.
    pub fn register<A: Action + 'static>(&mut self, name: impl Into<String>, action: A) -> &mut Self {
        self.actions.insert(name.into(), Arc::new(action));
        self
    }

    /// Register an async closure as a handler.
    pub fn register_fn<F, Fut>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(ActionContext, ValueMap) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<ValueMap, ActionError>> + Send + 'static,
    {
        self.register(name, FnAction(f))
    }

    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ActionDyn>> {
        self.actions.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.actions.contains_key(name)
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.actions.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

impl fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRegistry")
            .field("actions", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
