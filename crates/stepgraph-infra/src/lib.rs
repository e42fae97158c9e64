//! Infrastructure layer for stepgraph.
//!
//! Filesystem-backed configuration loading and the built-in action set
//! registered by the `stepgraph` binary.

pub mod actions;
pub mod config;
