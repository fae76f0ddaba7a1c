//! Shared domain types for casflow.
//!
//! Workflow definitions, activity request descriptors, run/activity status
//! enums, the host retry policy, and the global configuration surface.
//!
//! Zero infrastructure dependencies -- only serde.

pub mod config;
pub mod workflow;
