//! casflow CLI and mock resource server entry point.
//!
//! Binary name: `casflow`
//!
//! Parses CLI arguments, sets up tracing, then dispatches to the command
//! handler or starts the mock resource server.

mod cli;
mod http;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;

use casflow_core::resource::memory::InMemoryResourceBackend;
use casflow_observe::tracing_setup::{init_tracing, shutdown_tracing, verbosity_filter};
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    init_tracing(verbosity_filter(cli.verbose, cli.quiet), cli.otel)
        .map_err(|e| anyhow::anyhow!("failed to initialize tracing: {e}"))?;

    let result = dispatch(cli).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli) -> anyhow::Result<ExitCode> {
    match cli.command {
        Commands::Run {
            file,
            run_id,
            config,
            server,
        } => {
            let succeeded = cli::run::handle_run(&file, run_id, &config, server, cli.json, cli.quiet).await?;
            Ok(if succeeded { ExitCode::SUCCESS } else { ExitCode::FAILURE })
        }

        Commands::Validate { file } => {
            cli::validate::handle_validate(&file, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }

        Commands::MockServer {
            port,
            host,
            pending_reads,
        } => {
            let backend = Arc::new(InMemoryResourceBackend::new().with_reads_until_created(pending_reads));
            let addr = format!("{host}:{port}");
            let listener = tokio::net::TcpListener::bind(&addr).await?;

            if !cli.quiet {
                println!(
                    "  {} Mock resource service listening on {}",
                    console::style("*").green().bold(),
                    console::style(format!("http://{addr}")).cyan()
                );
                println!("  {}", console::style("Press Ctrl+C to stop").dim());
            }

            let router = http::router::build_router(backend);
            axum::serve(listener, router)
                .with_graceful_shutdown(shutdown_signal())
                .await?;

            if !cli.quiet {
                println!("\n  Server stopped.");
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Wait for Ctrl+C or SIGTERM for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::warn!("failed to listen for Ctrl+C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::warn!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
