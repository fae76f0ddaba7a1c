//! Infrastructure layer for casflow.
//!
//! Contains the implementations of the ports defined in `casflow-core`: the
//! reqwest-backed [`resource::http::HttpResourceClient`], plus loading of
//! `casflow.toml` with environment overrides.

pub mod config;
pub mod resource;
