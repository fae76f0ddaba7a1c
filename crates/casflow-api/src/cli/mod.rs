//! CLI command definitions for the `casflow` binary.
//!
//! Uses clap derive macros for argument parsing.

pub mod run;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Run resource-provisioning workflows against a resource service.
#[derive(Parser)]
#[command(name = "casflow", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Export spans as OpenTelemetry to stdout.
    #[arg(long, global = true)]
    pub otel: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Execute a workflow definition.
    Run {
        /// Path to the workflow YAML file.
        file: PathBuf,

        /// Run identifier. Reusing one makes the run idempotent; defaults to a new UUIDv7.
        #[arg(long)]
        run_id: Option<String>,

        /// Path to the configuration file.
        #[arg(long, short, default_value = casflow_infra::config::CONFIG_FILE_NAME)]
        config: PathBuf,

        /// Resource service base URL (overrides config and CAS_SERVER).
        #[arg(long)]
        server: Option<String>,
    },

    /// Check a workflow definition and print its dependency graph.
    Validate {
        /// Path to the workflow YAML file.
        file: PathBuf,
    },

    /// Serve an in-memory resource service for local runs.
    MockServer {
        /// Port to listen on.
        #[arg(long, short, default_value_t = 9200)]
        port: u16,

        /// Host to bind to.
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        /// Reads a new resource stays `pending` before reporting `created`.
        #[arg(long, default_value_t = 0)]
        pending_reads: usize,
    },
}
