//! Placeholder discovery over JSON value trees.
//!
//! Walks maps and arrays recursively and reports every string leaf that
//! matches a pattern, together with the path from the root. Non-string
//! scalars (numbers, booleans, null) are skipped.

use std::fmt;

use regex::Regex;
use serde_json::Value;

use super::definition::WorkflowError;

// ---------------------------------------------------------------------------
// Paths
// ---------------------------------------------------------------------------

/// One step from a container to a child.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// A location inside a value tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TreePath(Vec<PathSegment>);

impl TreePath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    fn child(&self, segment: PathSegment) -> TreePath {
        let mut segments = self.0.clone();
        segments.push(segment);
        TreePath(segments)
    }

    /// Render as display segments, folding array indices into the preceding
    /// key: `{"items": [{"id": ..}]}` yields `["items[0]", "id"]`.
    pub fn rendered(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for segment in &self.0 {
            match segment {
                PathSegment::Key(key) => out.push(key.clone()),
                PathSegment::Index(idx) => match out.last_mut() {
                    Some(last) => last.push_str(&format!("[{idx}]")),
                    None => out.push(format!("[{idx}]")),
                },
            }
        }
        out
    }
}

impl From<Vec<PathSegment>> for TreePath {
    fn from(segments: Vec<PathSegment>) -> Self {
        TreePath(segments)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered().join("."))
    }
}

/// A string leaf that matched the search pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeMatch {
    pub path: TreePath,
    /// The leaf text, trimmed.
    pub raw: String,
}

// ---------------------------------------------------------------------------
// Search
// ---------------------------------------------------------------------------

/// Find every string leaf in `tree` matching `pattern`.
///
/// Result order follows map iteration order and must not be relied upon.
pub fn find_matches(pattern: &Regex, tree: &Value) -> Vec<TreeMatch> {
    let mut out = Vec::new();
    walk(pattern, tree, &TreePath::default(), &mut out);
    out
}

fn walk(pattern: &Regex, value: &Value, path: &TreePath, out: &mut Vec<TreeMatch>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                walk(pattern, child, &path.child(PathSegment::Key(key.clone())), out);
            }
        }
        Value::Array(items) => {
            for (idx, child) in items.iter().enumerate() {
                walk(pattern, child, &path.child(PathSegment::Index(idx)), out);
            }
        }
        Value::String(s) if pattern.is_match(s) => out.push(TreeMatch {
            path: path.clone(),
            raw: s.trim().to_string(),
        }),
        _ => {}
    }
}

// ---------------------------------------------------------------------------
// Write-back
// ---------------------------------------------------------------------------

/// Replace the value at `path` inside `tree`.
///
/// The path must address an existing location; the walker only reports
/// locations that exist, so a miss means the tree changed shape.
pub fn set_at_path(tree: &mut Value, path: &TreePath, value: Value) -> Result<(), WorkflowError> {
    let mut cursor = tree;
    for segment in path.segments() {
        cursor = match (segment, cursor) {
            (PathSegment::Key(key), Value::Object(map)) => map.get_mut(key),
            (PathSegment::Index(idx), Value::Array(items)) => items.get_mut(*idx),
            _ => None,
        }
        .ok_or_else(|| {
            WorkflowError::ValidationError(format!("body has no location '{path}'"))
        })?;
    }
    *cursor = value;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
