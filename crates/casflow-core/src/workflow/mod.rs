//! Workflow engine core.
//!
//! - `walker` -- finds placeholder string leaves in a JSON tree
//! - `expression` -- `{{ activity.result.path }}` grammar and path lookup
//! - `condition` -- completeness condition evaluation (JEXL)
//! - `definition` -- YAML parsing and configuration validation
//! - `dag` -- activity dependency graph and ready-set scheduling
//! - `results` -- write-once store of created resource URLs
//! - `activity` -- idempotent create-or-fetch plus completion polling
//! - `retry` -- in-process host retry policy runner
//! - `orchestrator` -- round-based run loop with failure cleanup

pub mod activity;
pub mod condition;
pub mod dag;
pub mod definition;
pub mod expression;
pub mod orchestrator;
pub mod results;
pub mod retry;
pub mod walker;
