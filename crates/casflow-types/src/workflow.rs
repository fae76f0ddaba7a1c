//! Workflow domain types for casflow.
//!
//! A workflow is a flat list of activities. Each activity describes one
//! remote-resource operation whose request body may reference the results of
//! other activities through `{{ <activity>.result.<path> }}` placeholders. The
//! dependency graph is derived from those placeholders, never declared.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Workflow Definition
// ---------------------------------------------------------------------------

/// The canonical workflow definition, as loaded from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Human-readable workflow name.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Activities in declaration order. Execution order comes from the graph.
    pub activities: Vec<ActivityDefinition>,
}

impl WorkflowDefinition {
    /// Look up an activity by name.
    pub fn activity(&self, name: &str) -> Option<&ActivityDefinition> {
        self.activities.iter().find(|a| a.name == name)
    }
}

// ---------------------------------------------------------------------------
// Activity Definition
// ---------------------------------------------------------------------------

/// One step of a workflow: a single idempotent remote-resource operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityDefinition {
    /// Unique activity name. Other activities reference it in placeholders.
    pub name: String,
    /// Declared activity kind.
    #[serde(rename = "type", default)]
    pub activity_type: ActivityType,
    /// Request descriptor (method, resource path, templated body).
    pub request: RequestDescriptor,
    /// Boolean condition template over the live resource state, e.g.
    /// `{{ meta.status }} == 'created'`.
    #[serde(
        default,
        rename = "completenessCondition",
        alias = "completeness_condition",
        skip_serializing_if = "Option::is_none"
    )]
    pub completeness_condition: Option<String>,
}

impl ActivityDefinition {
    /// The completeness condition, if declared and non-blank.
    pub fn condition(&self) -> Option<&str> {
        self.completeness_condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// The kind of activity.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityType {
    /// Create (or find) a resource through the resource service API.
    #[default]
    ApiCall,
}

/// The request an activity issues against the resource service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: RequestMethod,
    /// Collection path relative to the resource server base URL (e.g. `/live_hooks`).
    pub path: String,
    /// Templated JSON body. String leaves may hold value-expression placeholders.
    #[serde(default = "empty_body")]
    pub body: Value,
}

fn empty_body() -> Value {
    Value::Object(serde_json::Map::new())
}

/// HTTP method of an activity request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RequestMethod {
    /// Create a resource (idempotently).
    Post,
    /// Read without creation. Accepted by the loader but not executable.
    Get,
}

impl fmt::Display for RequestMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestMethod::Post => write!(f, "POST"),
            RequestMethod::Get => write!(f, "GET"),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution Status
// ---------------------------------------------------------------------------

/// Status of a single activity within a run.
///
/// Transitions are monotonic: `Pending -> Scheduled -> Completed`, or
/// `Scheduled -> Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityStatus {
    #[default]
    Pending,
    Scheduled,
    Completed,
    Failed,
}

impl ActivityStatus {
    /// Whether moving from `self` to `next` is a legal transition.
    pub fn can_transition_to(self, next: ActivityStatus) -> bool {
        matches!(
            (self, next),
            (ActivityStatus::Pending, ActivityStatus::Scheduled)
                | (ActivityStatus::Scheduled, ActivityStatus::Completed)
                | (ActivityStatus::Scheduled, ActivityStatus::Failed)
        )
    }

    /// Completed or Failed.
    pub fn is_terminal(self) -> bool {
        matches!(self, ActivityStatus::Completed | ActivityStatus::Failed)
    }
}

impl fmt::Display for ActivityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActivityStatus::Pending => "pending",
            ActivityStatus::Scheduled => "scheduled",
            ActivityStatus::Completed => "completed",
            ActivityStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Overall status of a workflow run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowRunStatus {
    Initializing,
    Running,
    Succeeded,
    Failed,
}

impl WorkflowRunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, WorkflowRunStatus::Succeeded | WorkflowRunStatus::Failed)
    }
}

impl fmt::Display for WorkflowRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkflowRunStatus::Initializing => "initializing",
            WorkflowRunStatus::Running => "running",
            WorkflowRunStatus::Succeeded => "succeeded",
            WorkflowRunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_activity_from_yaml() {
        let yaml = r#"
name: live-hooks
activities:
  - name: live_hook
    type: api_call
    request:
      method: POST
      path: /live_hooks
      body:
        sender_ip: "10.0.0.1"
        sender_port: 5000
    completenessCondition: "{{ meta.status }} == 'created'"
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(def.name, "live-hooks");
        assert_eq!(def.activities.len(), 1);
        let activity = &def.activities[0];
        assert_eq!(activity.activity_type, ActivityType::ApiCall);
        assert_eq!(activity.request.method, RequestMethod::Post);
        assert_eq!(activity.request.body["sender_port"], json!(5000));
        assert_eq!(activity.condition(), Some("{{ meta.status }} == 'created'"));
    }

    #[test]
    fn test_snake_case_condition_alias_and_defaults() {
        let yaml = r#"
name: wf
activities:
  - name: a
    request:
      method: GET
      path: /things
    completeness_condition: "  "
"#;
        let def: WorkflowDefinition = serde_yaml_ng::from_str(yaml).unwrap();
        let activity = def.activity("a").unwrap();
        assert_eq!(activity.activity_type, ActivityType::ApiCall);
        assert_eq!(activity.request.method, RequestMethod::Get);
        assert_eq!(activity.request.body, json!({}));
        assert_eq!(activity.condition(), None, "blank condition counts as absent");
    }

    #[test]
    fn test_activity_status_transitions() {
        use ActivityStatus::*;
        assert!(Pending.can_transition_to(Scheduled));
        assert!(Scheduled.can_transition_to(Completed));
        assert!(Scheduled.can_transition_to(Failed));

        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Pending));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Scheduled));
    }

    #[test]
    fn test_status_display() {
        assert_eq!(ActivityStatus::Scheduled.to_string(), "scheduled");
        assert_eq!(WorkflowRunStatus::Succeeded.to_string(), "succeeded");
        assert_eq!(RequestMethod::Post.to_string(), "POST");
        assert!(WorkflowRunStatus::Failed.is_terminal());
        assert!(!WorkflowRunStatus::Running.is_terminal());
    }
}
