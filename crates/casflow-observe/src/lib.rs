//! Observability setup for casflow: structured logging and optional
//! OpenTelemetry span export.

pub mod tracing_setup;
