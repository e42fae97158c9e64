//! Shared domain types for stepgraph.
//!
//! This crate contains the workflow model (definitions, run reports, failure
//! taxonomy) and global configuration types used across the workspace.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod duration;
pub mod workflow;
