//! `casflow run`: execute a workflow against the configured resource service.

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use casflow_core::workflow::definition::load_workflow_file;
use casflow_core::workflow::orchestrator::{Orchestrator, WorkflowOutcome};
use casflow_infra::config::load_global_config;
use casflow_infra::resource::http::HttpResourceClient;

/// Run the workflow in `file`. Returns whether the run succeeded.
pub async fn handle_run(
    file: &Path,
    run_id: Option<String>,
    config_path: &Path,
    server: Option<String>,
    json: bool,
    quiet: bool,
) -> Result<bool> {
    let mut config = load_global_config(config_path).await;
    if let Some(server) = server {
        config.resource_server_url = server;
    }

    let definition = load_workflow_file(file)
        .with_context(|| format!("failed to load workflow from {}", file.display()))?;
    let run_id = run_id.unwrap_or_else(|| uuid::Uuid::now_v7().to_string());

    let client = HttpResourceClient::new(&config.http)?;
    let orchestrator = Orchestrator::from_config(Arc::new(client), &config)
        .with_context(|| format!("invalid resource server URL '{}'", config.resource_server_url))?;

    if !json && !quiet {
        println!();
        println!(
            "  {} Running '{}' against {}",
            style("*").green().bold(),
            style(&definition.name).cyan(),
            style(&config.resource_server_url).dim()
        );
        println!("  Run: {}", style(&run_id).cyan());
    }

    let outcome = orchestrator.run(&definition, &run_id).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome.to_json())?);
    } else {
        print_outcome(&outcome, quiet);
    }

    Ok(outcome.is_success())
}

fn print_outcome(outcome: &WorkflowOutcome, quiet: bool) {
    match outcome {
        WorkflowOutcome::Succeeded { results, .. } => {
            if quiet {
                return;
            }
            let mut table = Table::new();
            table
                .load_preset(presets::UTF8_FULL_CONDENSED)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec![Cell::new("Activity").fg(Color::Cyan), Cell::new("Resource")]);
            for (activity, url) in results {
                table.add_row(vec![Cell::new(activity), Cell::new(url)]);
            }

            println!();
            println!("  {} Status: {}", style("*").green().bold(), outcome.status());
            println!("{table}");
            println!();
        }
        WorkflowOutcome::Failed {
            cause,
            cleanup_performed,
            cleanup_error,
            ..
        } => {
            eprintln!();
            eprintln!("  {} Status: {}", style("x").red().bold(), outcome.status());
            eprintln!("  Error: {}", style(cause).red());
            if *cleanup_performed {
                eprintln!("  Cleanup: performed");
            }
            if let Some(err) = cleanup_error {
                eprintln!("  Cleanup error: {}", style(err).yellow());
                for (url, reason) in &err.failures {
                    eprintln!("    {url}: {reason}");
                }
            }
            eprintln!();
        }
    }
}
