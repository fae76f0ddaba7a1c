//! Value expressions: `{{ <activity>.result.<dot.path> }}`.
//!
//! A value expression names another activity and a dotted path into that
//! activity's resource representation. Path lookup navigates mappings only.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Literal separator between the activity name and the lookup path.
pub const RESULT_SEPARATOR: &str = ".result.";

/// Any `{{ ... }}` placeholder inside a string leaf.
pub static PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{\{.*\}\}").expect("placeholder regex should compile"));

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExpressionError {
    #[error("value expression '{0}' has no '.result.' separator")]
    MissingResultSeparator(String),

    #[error("value expression '{0}' has an empty activity name or path")]
    EmptyPath(String),

    #[error("path segment '{segment}' not found")]
    PathNotFound { segment: String },

    #[error("path segment '{segment}' does not address a mapping")]
    TypeMismatch { segment: String },
}

// ---------------------------------------------------------------------------
// ValueExpression
// ---------------------------------------------------------------------------

/// A parsed `{{ activity.result.path }}` reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValueExpression {
    pub activity: String,
    pub path: Vec<String>,
}

impl ValueExpression {
    pub fn parse(expr: &str) -> Result<Self, ExpressionError> {
        Ok(Self {
            activity: parse_activity_name(expr)?,
            path: parse_path(expr)?,
        })
    }
}

fn strip_delimiters(expr: &str) -> &str {
    let s = expr.trim();
    let s = s.strip_prefix("{{").unwrap_or(s);
    let s = s.strip_suffix("}}").unwrap_or(s);
    s.trim()
}

fn split_result(expr: &str) -> Result<(&str, &str), ExpressionError> {
    strip_delimiters(expr)
        .split_once(RESULT_SEPARATOR)
        .ok_or_else(|| ExpressionError::MissingResultSeparator(expr.to_string()))
}

/// The activity an expression refers to: everything left of `.result.`.
pub fn parse_activity_name(expr: &str) -> Result<String, ExpressionError> {
    let (name, _) = split_result(expr)?;
    if name.is_empty() {
        return Err(ExpressionError::EmptyPath(expr.to_string()));
    }
    Ok(name.to_string())
}

/// The lookup path of an expression: everything right of `.result.`, split on `.`.
pub fn parse_path(expr: &str) -> Result<Vec<String>, ExpressionError> {
    let (_, path) = split_result(expr)?;
    if path.is_empty() {
        return Err(ExpressionError::EmptyPath(expr.to_string()));
    }
    Ok(path.split('.').map(str::to_string).collect())
}

/// Split a bare dotted path (`meta.status`) into segments.
pub fn split_dotted(path: &str) -> Vec<String> {
    path.trim().split('.').map(str::to_string).collect()
}

// ---------------------------------------------------------------------------
// Lookup
// ---------------------------------------------------------------------------

/// Resolve `path` against `tree` by successive map-key indexing.
///
/// Arrays are not indexed: a segment that meets an array or a scalar is a
/// `TypeMismatch`.
pub fn lookup<'a>(tree: &'a Value, path: &[String]) -> Result<&'a Value, ExpressionError> {
    if path.is_empty() {
        return Err(ExpressionError::EmptyPath(String::new()));
    }

    let mut cursor = tree;
    for segment in path {
        let map = cursor.as_object().ok_or_else(|| ExpressionError::TypeMismatch {
            segment: segment.clone(),
        })?;
        cursor = map.get(segment).ok_or_else(|| ExpressionError::PathNotFound {
            segment: segment.clone(),
        })?;
    }
    Ok(cursor)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
