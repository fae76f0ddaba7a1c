//! `casflow validate`: check a definition and show its dependency graph.

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use casflow_core::workflow::dag::ActivityGraph;
use casflow_core::workflow::definition::load_workflow_file;
use casflow_types::workflow::WorkflowDefinition;

pub fn handle_validate(file: &Path, json: bool) -> Result<()> {
    let definition = load_workflow_file(file)
        .with_context(|| format!("invalid workflow definition {}", file.display()))?;
    let graph = ActivityGraph::build(&definition.activities)?;
    let rounds = graph.rounds()?;

    if json {
        let activities: Vec<_> = definition
            .activities
            .iter()
            .map(|a| {
                serde_json::json!({
                    "name": a.name,
                    "path": a.request.path,
                    "depends_on": graph.parents(&a.name),
                })
            })
            .collect();
        let out = serde_json::json!({
            "name": definition.name,
            "activities": activities,
            "rounds": rounds,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Workflow '{}' is valid",
        style("*").green().bold(),
        style(&definition.name).cyan()
    );
    println!("{}", dependency_table(&definition, &graph));
    for (i, round) in rounds.iter().enumerate() {
        println!("  Round {}: {}", i + 1, round.join(", "));
    }
    println!();

    Ok(())
}

fn dependency_table(definition: &WorkflowDefinition, graph: &ActivityGraph) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Activity").fg(Color::Cyan),
            Cell::new("Request"),
            Cell::new("Depends on"),
        ]);

    for activity in &definition.activities {
        let parents = graph.parents(&activity.name);
        let depends_on = if parents.is_empty() {
            "-".to_string()
        } else {
            parents.join(", ")
        };
        table.add_row(vec![
            Cell::new(&activity.name),
            Cell::new(format!("{} {}", activity.request.method, activity.request.path)),
            Cell::new(depends_on),
        ]);
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFINITION: &str = r#"
name: chain
activities:
  - name: b
    request: { method: POST, path: /bs, body: { a: "{{ a.result.meta.resource_id }}" } }
    completenessCondition: "{{ meta.status }} == 'created'"
  - name: a
    request: { method: POST, path: /as, body: {} }
    completenessCondition: "{{ meta.status }} == 'created'"
"#;

    #[test]
    fn valid_file_passes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yaml");
        std::fs::write(&path, DEFINITION).unwrap();
        handle_validate(&path, true).unwrap();
    }

    #[test]
    fn table_lists_dependencies() {
        let def = casflow_core::workflow::definition::parse_workflow_yaml(DEFINITION).unwrap();
        let graph = ActivityGraph::build(&def.activities).unwrap();
        let rendered = dependency_table(&def, &graph).to_string();
        assert!(rendered.contains("POST /bs"));
        assert!(rendered.lines().any(|l| l.contains(" b ") && l.contains(" a ")));
    }

    #[test]
    fn unknown_reference_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wf.yaml");
        std::fs::write(&path, DEFINITION.replace("a.result", "ghost.result")).unwrap();
        assert!(handle_validate(&path, true).is_err());
    }
}
