//! Round-based workflow orchestration with failure cleanup.
//!
//! The `Orchestrator` drives one run through
//! `Initializing -> Running -> Succeeded | Failed`:
//!
//! 1. Build the activity graph. Configuration errors fail the run before
//!    anything executes.
//! 2. Each round, take the ready set and spawn every ready activity into a
//!    `JoinSet`; ready activities never depend on each other.
//! 3. Record each success in the results store and mark it Completed.
//! 4. On the first failure, let the round's siblings finish, start no new
//!    round, and delete every resource created so far. That includes
//!    resources of dispatched activities that failed after creating them,
//!    found again by correlation id.
//! 5. An empty ready set with incomplete activities is a deadlock.

use std::collections::BTreeMap;
use std::sync::Arc;

use casflow_types::config::{GlobalConfig, RetryPolicy};
use casflow_types::workflow::{ActivityStatus, WorkflowDefinition, WorkflowRunStatus};
use serde_json::{Value, json};
use tokio::task::JoinSet;

use crate::resource::ResourceClient;

use super::activity::{ActivityError, ActivityExecutor};
use super::dag::ActivityGraph;
use super::definition::WorkflowError;
use super::results::ResultsStore;
use super::retry::run_with_policy;

// ---------------------------------------------------------------------------
// Outcome types
// ---------------------------------------------------------------------------

/// Why a run failed.
#[derive(Debug, thiserror::Error)]
pub enum RunFailure {
    /// Invalid definition; nothing was executed.
    #[error("configuration error: {0}")]
    Configuration(#[from] WorkflowError),

    /// No activity is ready but some are not Completed.
    #[error("scheduling error: deadlock with incomplete activities {incomplete:?}")]
    Scheduling { incomplete: Vec<String> },

    /// An activity failed after exhausting its retry policy.
    #[error("activity '{activity}' failed: {error}")]
    Activity {
        activity: String,
        #[source]
        error: ActivityError,
    },

    /// An activity task panicked or was cancelled.
    #[error("activity task aborted: {0}")]
    TaskAborted(String),
}

/// Cleanup problems, reported beside the original failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("cleanup failed for {} resource(s)", failures.len())]
pub struct CleanupError {
    /// `(resource url, reason)` per failed delete, or `(activity, reason)`
    /// when an activity's resource could not be looked up.
    pub failures: Vec<(String, String)>,
}

/// Final result of a run.
#[derive(Debug)]
pub enum WorkflowOutcome {
    Succeeded {
        run_id: String,
        /// Activity name -> resource URL.
        results: BTreeMap<String, String>,
    },
    Failed {
        run_id: String,
        cause: RunFailure,
        cleanup_performed: bool,
        cleanup_error: Option<CleanupError>,
    },
}

impl WorkflowOutcome {
    pub fn status(&self) -> WorkflowRunStatus {
        match self {
            WorkflowOutcome::Succeeded { .. } => WorkflowRunStatus::Succeeded,
            WorkflowOutcome::Failed { .. } => WorkflowRunStatus::Failed,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, WorkflowOutcome::Succeeded { .. })
    }

    pub fn run_id(&self) -> &str {
        match self {
            WorkflowOutcome::Succeeded { run_id, .. } | WorkflowOutcome::Failed { run_id, .. } => run_id,
        }
    }

    /// JSON rendering for machine-readable output.
    pub fn to_json(&self) -> Value {
        match self {
            WorkflowOutcome::Succeeded { run_id, results } => json!({
                "run_id": run_id,
                "status": self.status(),
                "results": results,
            }),
            WorkflowOutcome::Failed {
                run_id,
                cause,
                cleanup_performed,
                cleanup_error,
            } => json!({
                "run_id": run_id,
                "status": self.status(),
                "cause": cause.to_string(),
                "cleanup_performed": cleanup_performed,
                "cleanup_error": cleanup_error.as_ref().map(|e| json!({
                    "message": e.to_string(),
                    "failures": e.failures.iter()
                        .map(|(url, reason)| json!({ "resource_url": url, "reason": reason }))
                        .collect::<Vec<_>>(),
                })),
            }),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives workflow runs against a resource service.
pub struct Orchestrator<C: ResourceClient + 'static> {
    executor: Arc<ActivityExecutor<C>>,
    policy: RetryPolicy,
}

fn transition(run_id: &str, from: WorkflowRunStatus, to: WorkflowRunStatus) {
    tracing::info!(run_id, from = %from, to = %to, "run status changed");
}

impl<C: ResourceClient + 'static> Orchestrator<C> {
    pub fn new(executor: ActivityExecutor<C>, policy: RetryPolicy) -> Self {
        Self {
            executor: Arc::new(executor),
            policy,
        }
    }

    /// Wire an orchestrator from global configuration.
    pub fn from_config(client: Arc<C>, config: &GlobalConfig) -> Result<Self, ActivityError> {
        let executor = ActivityExecutor::new(client, &config.resource_server_url, config.polling.clone())?;
        Ok(Self::new(executor, config.activity.clone()))
    }

    pub fn executor(&self) -> &ActivityExecutor<C> {
        &self.executor
    }

    /// Run `definition` to a terminal outcome under `run_id`.
    ///
    /// Reusing a run id against the same backend finds the resources created
    /// by earlier attempts instead of creating new ones.
    pub async fn run(&self, definition: &WorkflowDefinition, run_id: &str) -> WorkflowOutcome {
        tracing::info!(run_id, workflow = %definition.name, activities = definition.activities.len(), "starting workflow run");

        let mut graph = match ActivityGraph::build(&definition.activities) {
            Ok(graph) => graph,
            Err(e) => {
                tracing::error!(run_id, error = %e, "workflow configuration rejected");
                transition(run_id, WorkflowRunStatus::Initializing, WorkflowRunStatus::Failed);
                return WorkflowOutcome::Failed {
                    run_id: run_id.to_string(),
                    cause: RunFailure::Configuration(e),
                    cleanup_performed: false,
                    cleanup_error: None,
                };
            }
        };
        transition(run_id, WorkflowRunStatus::Initializing, WorkflowRunStatus::Running);

        let results = Arc::new(ResultsStore::new());
        let failure = self.drive(definition, &mut graph, &results, run_id).await;

        match failure {
            None => {
                transition(run_id, WorkflowRunStatus::Running, WorkflowRunStatus::Succeeded);
                WorkflowOutcome::Succeeded {
                    run_id: run_id.to_string(),
                    results: results.snapshot(),
                }
            }
            Some(cause) => {
                tracing::error!(run_id, error = %cause, "workflow run failed, cleaning up");
                let cleanup_error = self.cleanup(definition, &graph, &results, run_id).await.err();
                transition(run_id, WorkflowRunStatus::Running, WorkflowRunStatus::Failed);
                WorkflowOutcome::Failed {
                    run_id: run_id.to_string(),
                    cause,
                    cleanup_performed: true,
                    cleanup_error,
                }
            }
        }
    }

    /// Execute rounds until everything completes or something fails.
    async fn drive(
        &self,
        definition: &WorkflowDefinition,
        graph: &mut ActivityGraph,
        results: &Arc<ResultsStore>,
        run_id: &str,
    ) -> Option<RunFailure> {
        let mut round: usize = 0;
        loop {
            let ready = graph.ready_activities();
            if ready.is_empty() {
                if graph.all_completed() {
                    return None;
                }
                let incomplete = graph.incomplete();
                tracing::error!(run_id, ?incomplete, "no ready activities but run is incomplete");
                return Some(RunFailure::Scheduling { incomplete });
            }

            tracing::debug!(run_id, round, ready = ?ready, "dispatching round");
            let mut join_set = JoinSet::new();

            for name in ready {
                let Some(activity) = definition.activity(&name).cloned() else {
                    return Some(RunFailure::Scheduling { incomplete: vec![name] });
                };
                if let Err(e) = graph.set_status(&name, ActivityStatus::Scheduled) {
                    return Some(RunFailure::Configuration(e));
                }

                let executor = Arc::clone(&self.executor);
                let results = Arc::clone(results);
                let policy = self.policy.clone();
                let run_id = run_id.to_string();

                join_set.spawn(async move {
                    let outcome = run_with_policy(&policy, &activity.name, |attempt| {
                        let executor = Arc::clone(&executor);
                        let results = Arc::clone(&results);
                        let activity = activity.clone();
                        let run_id = run_id.clone();
                        async move {
                            tracing::debug!(run_id = %run_id, activity = %activity.name, attempt, "attempting activity");
                            executor.execute(&activity, &results, &run_id).await
                        }
                    })
                    .await;
                    (activity.name, outcome)
                });
            }

            // Drain the whole round, even after a failure.
            let mut failure: Option<RunFailure> = None;
            while let Some(joined) = join_set.join_next().await {
                let (name, outcome) = match joined {
                    Ok(pair) => pair,
                    Err(e) => {
                        tracing::error!(run_id, error = %e, "activity task aborted");
                        failure.get_or_insert(RunFailure::TaskAborted(e.to_string()));
                        continue;
                    }
                };

                match outcome {
                    Ok(resource_url) => {
                        let recorded = results
                            .record(&name, &resource_url)
                            .and_then(|()| graph.set_status(&name, ActivityStatus::Completed));
                        match recorded {
                            Ok(()) => {
                                tracing::info!(run_id, activity = %name, resource_url = %resource_url, "activity completed");
                            }
                            Err(e) => {
                                failure.get_or_insert(RunFailure::Configuration(e));
                            }
                        }
                    }
                    Err(error) => {
                        tracing::error!(run_id, activity = %name, error = %error, "activity failed");
                        if let Err(e) = graph.set_status(&name, ActivityStatus::Failed) {
                            tracing::warn!(run_id, activity = %name, error = %e, "could not mark activity failed");
                        }
                        failure.get_or_insert(RunFailure::Activity {
                            activity: name,
                            error,
                        });
                    }
                }
            }

            if failure.is_some() {
                return failure;
            }
            round += 1;
        }
    }

    /// Delete every resource created in this run. Best effort: every URL is
    /// attempted; a 404 counts as already gone.
    async fn cleanup(
        &self,
        definition: &WorkflowDefinition,
        graph: &ActivityGraph,
        results: &ResultsStore,
        run_id: &str,
    ) -> Result<(), CleanupError> {
        let mut failures = Vec::new();
        let mut urls = results.urls();

        // Dispatched but never recorded: the resource may exist anyway.
        for activity in &definition.activities {
            let dispatched = matches!(
                graph.status(&activity.name),
                Some(ActivityStatus::Scheduled | ActivityStatus::Failed)
            );
            if !dispatched || results.contains(&activity.name) {
                continue;
            }
            match self.executor.locate(activity, run_id).await {
                Ok(Some(url)) => {
                    tracing::debug!(run_id, activity = %activity.name, resource_url = %url, "found resource of failed activity");
                    urls.push(url);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(run_id, activity = %activity.name, error = %e, "resource lookup for cleanup failed");
                    failures.push((activity.name.clone(), e.to_string()));
                }
            }
        }

        for url in urls {
            match self.executor.client().delete(&url).await {
                Ok(resp) if (200..300).contains(&resp.status) || resp.is_not_found() => {
                    tracing::info!(run_id, resource_url = %url, "deleted resource");
                }
                Ok(resp) => {
                    tracing::warn!(run_id, resource_url = %url, status = resp.status, "resource delete rejected");
                    failures.push((url, format!("DELETE returned status {}", resp.status)));
                }
                Err(e) => {
                    tracing::warn!(run_id, resource_url = %url, error = %e, "resource delete failed");
                    failures.push((url, e.to_string()));
                }
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(CleanupError { failures })
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
