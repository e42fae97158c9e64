//! Workflow engine core: graph building, guards, step execution, scheduling.
//!
//! - `definition` -- YAML parsing, structural validation, filesystem load
//! - `dag` -- dependency graph builder, cycle detection, wave computation
//! - `context` -- completed step outputs, variables, input templates
//! - `expression` -- condition language for step `if` guards
//! - `action` -- action handler port and the read-only registry
//! - `retry` -- retry decisions and backoff
//! - `step_runner` -- single-step execution with timeout and retries
//! - `executor` -- dependency-driven concurrent scheduler

pub mod action;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod retry;
pub mod step_runner;
