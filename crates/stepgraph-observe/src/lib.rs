//! Observability setup for stepgraph: tracing subscriber and optional
//! OpenTelemetry export.

pub mod tracing_setup;
