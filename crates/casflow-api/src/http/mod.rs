//! Mock resource service over HTTP.
//!
//! Serves the resource protocol for any collection from an in-memory
//! backend so workflows can run locally without a real resource service.

pub mod handlers;
pub mod router;
