//! Activity dependency graph and ready-set scheduling.
//!
//! Dependencies are never declared; they are derived from the
//! `{{ <activity>.result.<path> }}` placeholders in each request body. The
//! graph has one vertex per activity and an edge `A -> B` whenever B's body
//! references A's result. Vertex statuses are the only mutable state after
//! construction.

use std::collections::{BTreeSet, HashMap};

use casflow_types::workflow::{ActivityDefinition, ActivityStatus};
use petgraph::Direction;
use petgraph::algo::{has_path_connecting, toposort};
use petgraph::graph::{DiGraph, NodeIndex};

use super::definition::WorkflowError;
use super::expression::{ExpressionError, PLACEHOLDER, parse_activity_name};
use super::walker::find_matches;

// ---------------------------------------------------------------------------
// Dependency extraction
// ---------------------------------------------------------------------------

/// Names of the activities whose results `activity`'s body references.
pub fn find_dependencies(activity: &ActivityDefinition) -> Result<BTreeSet<String>, ExpressionError> {
    find_matches(&PLACEHOLDER, &activity.request.body)
        .iter()
        .map(|m| parse_activity_name(&m.raw))
        .collect()
}

// ---------------------------------------------------------------------------
// ActivityGraph
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct ActivityNode {
    name: String,
    status: ActivityStatus,
}

/// Directed acyclic graph over the activities of one run.
#[derive(Debug, Clone, Default)]
pub struct ActivityGraph {
    graph: DiGraph<ActivityNode, ()>,
    index: HashMap<String, NodeIndex>,
}

impl ActivityGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build the graph for a set of activities.
    ///
    /// Fails on duplicate names, references to undeclared activities,
    /// malformed placeholders, and cycles.
    pub fn build(activities: &[ActivityDefinition]) -> Result<Self, WorkflowError> {
        let mut graph = Self::new();
        for activity in activities {
            graph.add_vertex(&activity.name)?;
        }

        for activity in activities {
            for dependency in find_dependencies(activity)? {
                graph.add_edge(&dependency, &activity.name)?;
            }
        }

        tracing::debug!(
            vertices = graph.len(),
            edges = graph.graph.edge_count(),
            "built activity graph"
        );
        Ok(graph)
    }

    /// Add a Pending vertex. Names must be unique.
    pub fn add_vertex(&mut self, name: &str) -> Result<(), WorkflowError> {
        if self.index.contains_key(name) {
            return Err(WorkflowError::DuplicateActivity(name.to_string()));
        }
        let idx = self.graph.add_node(ActivityNode {
            name: name.to_string(),
            status: ActivityStatus::Pending,
        });
        self.index.insert(name.to_string(), idx);
        Ok(())
    }

    /// Add the edge `from -> to` (`to` depends on `from`).
    ///
    /// Rejected, leaving the graph unchanged, when either endpoint is missing
    /// or the edge would close a cycle. Re-adding an existing edge is a no-op.
    pub fn add_edge(&mut self, from: &str, to: &str) -> Result<(), WorkflowError> {
        let to_idx = self.node(to)?;
        let from_idx = *self.index.get(from).ok_or_else(|| WorkflowError::UnknownActivity {
            activity: to.to_string(),
            referenced: from.to_string(),
        })?;

        if self.graph.contains_edge(from_idx, to_idx) {
            return Ok(());
        }

        // A path to -> from (or from == to) means the new edge closes a loop.
        if has_path_connecting(&self.graph, to_idx, from_idx, None) {
            return Err(WorkflowError::CycleDetected(format!(
                "edge '{from}' -> '{to}' would create a cycle"
            )));
        }

        self.graph.add_edge(from_idx, to_idx, ());
        Ok(())
    }

    fn node(&self, name: &str) -> Result<NodeIndex, WorkflowError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| WorkflowError::ValidationError(format!("unknown activity '{name}'")))
    }

    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn status(&self, name: &str) -> Option<ActivityStatus> {
        self.index.get(name).map(|idx| self.graph[*idx].status)
    }

    /// Move an activity to `next`, enforcing monotonic transitions.
    pub fn set_status(&mut self, name: &str, next: ActivityStatus) -> Result<(), WorkflowError> {
        let idx = self.node(name)?;
        let current = self.graph[idx].status;
        if !current.can_transition_to(next) {
            return Err(WorkflowError::IllegalTransition {
                activity: name.to_string(),
                from: current,
                to: next,
            });
        }
        self.graph[idx].status = next;
        Ok(())
    }

    /// Direct dependencies of `name`, sorted.
    pub fn parents(&self, name: &str) -> Vec<String> {
        let Some(idx) = self.index.get(name) else {
            return Vec::new();
        };
        let mut parents: Vec<String> = self
            .graph
            .neighbors_directed(*idx, Direction::Incoming)
            .map(|p| self.graph[p].name.clone())
            .collect();
        parents.sort();
        parents
    }

    /// All edges as `(dependency, dependent)` pairs, sorted.
    pub fn edges(&self) -> Vec<(String, String)> {
        let mut edges: Vec<(String, String)> = self
            .graph
            .edge_indices()
            .filter_map(|e| self.graph.edge_endpoints(e))
            .map(|(a, b)| (self.graph[a].name.clone(), self.graph[b].name.clone()))
            .collect();
        edges.sort();
        edges
    }

    /// Pending activities whose parents are all Completed, sorted by name.
    ///
    /// A pure function of current statuses, recomputed every round.
    pub fn ready_activities(&self) -> Vec<String> {
        let mut ready: Vec<String> = self
            .graph
            .node_indices()
            .filter(|idx| self.graph[*idx].status == ActivityStatus::Pending)
            .filter(|idx| {
                self.graph
                    .neighbors_directed(*idx, Direction::Incoming)
                    .all(|p| self.graph[p].status == ActivityStatus::Completed)
            })
            .map(|idx| self.graph[idx].name.clone())
            .collect();
        ready.sort();
        ready
    }

    pub fn all_completed(&self) -> bool {
        self.graph
            .node_weights()
            .all(|n| n.status == ActivityStatus::Completed)
    }

    /// Activities not yet Completed, sorted.
    pub fn incomplete(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .graph
            .node_weights()
            .filter(|n| n.status != ActivityStatus::Completed)
            .map(|n| n.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Group activities into rounds by dependency depth: round 0 has no
    /// dependencies, round N depends on something in round N-1.
    pub fn rounds(&self) -> Result<Vec<Vec<String>>, WorkflowError> {
        let sorted = toposort(&self.graph, None).map_err(|cycle| {
            WorkflowError::CycleDetected(format!(
                "cycle detected involving activity '{}'",
                self.graph[cycle.node_id()].name
            ))
        })?;

        let mut depths: HashMap<NodeIndex, usize> = HashMap::new();
        for idx in &sorted {
            let depth = self
                .graph
                .neighbors_directed(*idx, Direction::Incoming)
                .map(|p| depths.get(&p).copied().unwrap_or(0) + 1)
                .max()
                .unwrap_or(0);
            depths.insert(*idx, depth);
        }

        let round_count = depths.values().copied().max().map_or(0, |d| d + 1);
        let mut rounds: Vec<Vec<String>> = vec![Vec::new(); round_count];
        for (idx, depth) in depths {
            rounds[depth].push(self.graph[idx].name.clone());
        }
        for round in &mut rounds {
            round.sort();
        }
        Ok(rounds)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
