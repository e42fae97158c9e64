//! Workflow orchestration core for stepgraph.
//!
//! Builds the dependency graph of a `WorkflowDefinition`, evaluates step
//! guards, runs steps through an injected `ActionRegistry` with timeout and
//! retry handling, and schedules independent steps concurrently.
//! Depends only on `stepgraph-types` -- never on `stepgraph-infra`.

pub mod workflow;
