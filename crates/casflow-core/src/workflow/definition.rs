//! Workflow definition parsing and validation.
//!
//! Converts YAML into the canonical `WorkflowDefinition` and checks every
//! structural constraint that must hold before any activity runs. All
//! failures here are configuration errors and abort the run up front.

use std::collections::HashSet;
use std::path::Path;

use casflow_types::workflow::{ActivityStatus, WorkflowDefinition};
use thiserror::Error;

use super::dag::find_dependencies;
use super::expression::ExpressionError;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Configuration errors: detected before execution, fatal to the run.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// YAML parse failure.
    #[error("parse error: {0}")]
    ParseError(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    ValidationError(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Two activities share a name.
    #[error("duplicate activity name: '{0}'")]
    DuplicateActivity(String),

    /// A placeholder references an activity that is not declared.
    #[error("activity '{activity}' references unknown activity '{referenced}'")]
    UnknownActivity { activity: String, referenced: String },

    /// Adding a dependency edge would close a cycle.
    #[error("cycle detected: {0}")]
    CycleDetected(String),

    /// Malformed value expression in a request body.
    #[error("expression error: {0}")]
    Expression(#[from] ExpressionError),

    /// A status change that would move an activity backwards.
    #[error("activity '{activity}' cannot move from {from} to {to}")]
    IllegalTransition {
        activity: String,
        from: ActivityStatus,
        to: ActivityStatus,
    },

    /// A second write to an already-recorded result.
    #[error("result for activity '{0}' already recorded")]
    DuplicateResult(String),
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string into a validated `WorkflowDefinition`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<WorkflowDefinition, WorkflowError> {
    let def: WorkflowDefinition =
        serde_yaml_ng::from_str(yaml).map_err(|e| WorkflowError::ParseError(e.to_string()))?;
    validate_definition(&def)?;
    Ok(def)
}

/// Load and validate a workflow definition from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<WorkflowDefinition, WorkflowError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `WorkflowDefinition`.
///
/// Checks:
/// - Name is non-empty
/// - At least one activity exists
/// - Activity names are non-empty and unique
/// - Every activity declares a completeness condition
/// - Every body placeholder contains `.result.` and names a declared activity
///
/// Cycles are detected when the graph is built.
pub fn validate_definition(def: &WorkflowDefinition) -> Result<(), WorkflowError> {
    if def.name.trim().is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow name must not be empty".to_string(),
        ));
    }

    if def.activities.is_empty() {
        return Err(WorkflowError::ValidationError(
            "workflow must have at least one activity".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for activity in &def.activities {
        if activity.name.trim().is_empty() {
            return Err(WorkflowError::ValidationError(
                "activity name must not be empty".to_string(),
            ));
        }
        if !seen.insert(activity.name.as_str()) {
            return Err(WorkflowError::DuplicateActivity(activity.name.clone()));
        }
    }

    for activity in &def.activities {
        if activity.condition().is_none() {
            return Err(WorkflowError::ValidationError(format!(
                "activity '{}' must declare a completenessCondition",
                activity.name
            )));
        }

        for referenced in find_dependencies(activity)? {
            if !seen.contains(referenced.as_str()) {
                return Err(WorkflowError::UnknownActivity {
                    activity: activity.name.clone(),
                    referenced,
                });
            }
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_ACTIVITIES: &str = r#"
name: live-hooks-to-abr
activities:
  - name: live_hook
    type: api_call
    request:
      method: POST
      path: /live_hooks
      body:
        sender_ip: "10.0.0.1"
    completenessCondition: "{{ meta.status }} == 'created'"
  - name: abr
    type: api_call
    request:
      method: POST
      path: /abr_transcodes
      body:
        input_url: "{{ live_hook.result.meta.resource_id }}"
    completenessCondition: "{{ meta.status }} == 'created'"
"#;

    #[test]
    fn test_parse_valid_workflow() {
        let def = parse_workflow_yaml(TWO_ACTIVITIES).unwrap();
        assert_eq!(def.name, "live-hooks-to-abr");
        assert_eq!(def.activities.len(), 2);
    }

    #[test]
    fn test_parse_malformed_yaml() {
        let err = parse_workflow_yaml("name: [unterminated").unwrap_err();
        assert!(matches!(err, WorkflowError::ParseError(_)));
    }

    #[test]
    fn test_duplicate_activity_names() {
        let yaml = TWO_ACTIVITIES.replace("name: abr", "name: live_hook");
        let err = parse_workflow_yaml(&yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::DuplicateActivity(ref n) if n == "live_hook"));
    }

    #[test]
    fn test_unknown_reference() {
        let yaml = TWO_ACTIVITIES.replace("{{ live_hook.result", "{{ ghost.result");
        let err = parse_workflow_yaml(&yaml).unwrap_err();
        match err {
            WorkflowError::UnknownActivity { activity, referenced } => {
                assert_eq!(activity, "abr");
                assert_eq!(referenced, "ghost");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_placeholder_without_result_separator() {
        let yaml = TWO_ACTIVITIES.replace("live_hook.result.meta", "live_hook.meta");
        let err = parse_workflow_yaml(&yaml).unwrap_err();
        assert!(matches!(
            err,
            WorkflowError::Expression(ExpressionError::MissingResultSeparator(_))
        ));
    }

    #[test]
    fn test_missing_completeness_condition() {
        let yaml = r#"
name: wf
activities:
  - name: a
    request: { method: POST, path: /things }
"#;
        let err = parse_workflow_yaml(yaml).unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(ref m) if m.contains("completenessCondition")));
    }

    #[test]
    fn test_empty_workflow_rejected() {
        let err = parse_workflow_yaml("name: wf\nactivities: []\n").unwrap_err();
        assert!(matches!(err, WorkflowError::ValidationError(_)));

        let yaml = TWO_ACTIVITIES.replace("name: live-hooks-to-abr", "name: \"\"");
        assert!(parse_workflow_yaml(&yaml).is_err());
    }

    #[test]
    fn test_load_workflow_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("wf.yaml");
        std::fs::write(&path, TWO_ACTIVITIES).unwrap();
        let def = load_workflow_file(&path).unwrap();
        assert_eq!(def.activities[1].name, "abr");

        let err = load_workflow_file(&tmp.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, WorkflowError::IoError(_)));
    }
}
