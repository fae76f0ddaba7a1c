//! Completeness condition evaluation.
//!
//! A condition is a boolean expression template over an activity's live
//! resource state, e.g. `{{ meta.status }} == 'created'`. Evaluation:
//!
//! 1. Rewrite single-quoted literals to double-quoted ones.
//! 2. Replace every `{{ dotted.path }}` with a generated variable bound to
//!    the string found at that path in the resource state. Non-string values
//!    are rejected. Values never enter the expression text, so quotes,
//!    backslashes and newlines in them need no escaping.
//! 3. Evaluate the expression with JEXL against the bound variables; it must
//!    yield a boolean.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

use super::expression::{ExpressionError, lookup, split_dotted};

static SINGLE_QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"'([A-Za-z0-9\.\-_]*)'").expect("single-quote regex should compile")
});

static STATE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_\-\.]*)\s*\}\}").expect("state placeholder regex should compile")
});

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConditionError {
    /// Only string values may be substituted into a condition.
    #[error("unsupported value type at '{path}': expected string, got {found}")]
    UnsupportedValueType { path: String, found: &'static str },

    #[error("condition evaluation failed: {0}")]
    EvalFailed(String),

    #[error("condition did not evaluate to a boolean: got {result}")]
    NotBoolean { result: Value },

    #[error("condition path error: {0}")]
    Path(#[from] ExpressionError),
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Prefix of the variables placeholders are rewritten to.
const VARIABLE_PREFIX: &str = "__v";

/// A condition ready for evaluation: `expression` refers to placeholder
/// values through variables defined in `context`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundCondition {
    pub expression: String,
    pub context: Value,
}

/// Rewrite `template` against `state`. Repeated paths share one variable.
pub fn bind(template: &str, state: &Value) -> Result<BoundCondition, ConditionError> {
    let normalized = SINGLE_QUOTED.replace_all(template, "\"$1\"");

    let mut expression = String::with_capacity(normalized.len());
    let mut context = Map::new();
    let mut variables: HashMap<&str, String> = HashMap::new();
    let mut last = 0;

    for caps in STATE_PLACEHOLDER.captures_iter(&normalized) {
        let (Some(whole), Some(path)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let path = path.as_str();
        let variable = match variables.get(path) {
            Some(variable) => variable.clone(),
            None => {
                let value = lookup(state, &split_dotted(path))?;
                let Value::String(s) = value else {
                    return Err(ConditionError::UnsupportedValueType {
                        path: path.to_string(),
                        found: type_name(value),
                    });
                };
                let variable = format!("{VARIABLE_PREFIX}{}", variables.len());
                context.insert(variable.clone(), Value::String(s.clone()));
                variables.insert(path, variable.clone());
                variable
            }
        };
        expression.push_str(&normalized[last..whole.start()]);
        expression.push_str(&variable);
        last = whole.end();
    }
    expression.push_str(&normalized[last..]);

    Ok(BoundCondition {
        expression,
        context: Value::Object(context),
    })
}

/// Evaluate `template` against `state`.
///
/// The JEXL evaluator is built per call and never held across an await.
pub fn evaluate(template: &str, state: &Value) -> Result<bool, ConditionError> {
    let bound = bind(template, state)?;

    let result = jexl_eval::Evaluator::new()
        .eval_in_context(&bound.expression, &bound.context)
        .map_err(|e| ConditionError::EvalFailed(e.to_string()))?;

    match result {
        Value::Bool(b) => Ok(b),
        other => Err(ConditionError::NotBoolean { result: other }),
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
    fn test_condition_true_and_false() {
        let template = "{{status}} == 'created'";
        assert!(evaluate(template, &json!({ "status": "created" })).unwrap());
        assert!(!evaluate(template, &json!({ "status": "pending" })).unwrap());
    }

    #[test]
    fn test_non_string_value_is_unsupported() {
        let err = evaluate("{{status}} == 'created'", &json!({ "status": 5 })).unwrap_err();
        assert_eq!(
            err,
            ConditionError::UnsupportedValueType {
                path: "status".into(),
                found: "number"
            }
        );
    }

    #[test]
    fn test_nested_paths_and_logical_operators() {
        let state = json!({
            "meta": { "status": "created" },
            "spec": { "state": "ready", "region": "us-east-1" }
        });
        let template = "{{ meta.status }} == 'created' && ({{ spec.state }} == 'ready' || {{ spec.state }} == 'done')";
        assert!(evaluate(template, &state).unwrap());

        let template = "{{ meta.status }} != 'created' || {{ spec.region }} == 'eu-west-1'";
        assert!(!evaluate(template, &state).unwrap());
    }

    #[test]
    fn test_bind_rewrites_placeholders_to_variables() {
        let state = json!({ "meta": { "status": "created" }, "name": "x" });
        let bound = bind("{{ meta.status }} == 'created' && {{name}} != {{ meta.status }}", &state).unwrap();
        assert_eq!(bound.expression, r#"__v0 == "created" && __v1 != __v0"#);
        assert_eq!(bound.context, json!({ "__v0": "created", "__v1": "x" }));
    }

    #[test]
    fn test_values_needing_escapes_compare_verbatim() {
        for value in [r"C:\data\in", "line one\nline two", r#"say "hi""#, "tab\there"] {
            let state = json!({ "a": value, "b": value, "c": "other" });
            assert!(evaluate("{{ a }} == {{ b }}", &state).unwrap(), "{value:?}");
            assert!(!evaluate("{{ a }} == {{ c }}", &state).unwrap(), "{value:?}");
            assert!(!evaluate("{{ a }} == 'created'", &state).unwrap(), "{value:?}");
        }
    }

    #[test]
    fn test_value_resembling_placeholder_is_not_reexpanded() {
        let state = json!({ "a": "{{ b }}", "b": "created" });
        assert!(!evaluate("{{ a }} == {{ b }}", &state).unwrap());
        assert!(evaluate("{{ b }} == 'created'", &state).unwrap());
    }

    #[test]
    fn test_missing_path_is_error() {
        let err = evaluate("{{ meta.status }} == 'created'", &json!({ "meta": {} })).unwrap_err();
        assert!(matches!(err, ConditionError::Path(ExpressionError::PathNotFound { .. })));
    }

    #[test]
    fn test_non_boolean_result() {
        let err = evaluate("{{ name }}", &json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, ConditionError::NotBoolean { .. }));
    }

    #[test]
    fn test_malformed_expression() {
        let err = evaluate("{{ name }} ==", &json!({ "name": "x" })).unwrap_err();
        assert!(matches!(err, ConditionError::EvalFailed(_)));
    }
}
