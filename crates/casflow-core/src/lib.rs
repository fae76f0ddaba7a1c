//! Business logic for casflow.
//!
//! This crate holds the orchestration core: dependency extraction from
//! templated request bodies, the activity graph and its scheduler, idempotent
//! activity execution with completion polling, and the orchestrator loop.
//!
//! It talks to the resource service only through the [`resource::ResourceClient`]
//! port; the HTTP implementation lives in `casflow-infra`.

pub mod resource;
pub mod workflow;
