//! Idempotent execution of a single activity.
//!
//! # Execution flow
//!
//! 1. Resolve value expressions in a copy of the request body, fetching each
//!    referenced activity's resource once.
//! 2. Serialize the resolved body.
//! 3. Derive the correlation id from `(run id, activity name)`.
//! 4. Look the resource up by correlation id; create it only on 404.
//! 5. Poll the resource until its completeness condition holds.
//!
//! Re-running `execute` with the same run id never creates a second
//! resource, so the host may retry it freely.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use std::time::Duration;

use casflow_types::config::PollingConfig;
use casflow_types::workflow::{ActivityDefinition, RequestMethod};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use url::Url;

use crate::resource::{Correlation, ResourceClient, ResourceResponse};

use super::condition::{self, ConditionError};
use super::expression::{ExpressionError, PLACEHOLDER, ValueExpression, lookup};
use super::results::ResultsStore;
use super::walker::{find_matches, set_at_path};

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Errors from a single activity invocation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ActivityError {
    #[error("failed to serialize request body: {0}")]
    Marshal(String),

    #[error("resource retrieval failed: {0}")]
    Retrieval(String),

    #[error("resource creation failed: {0}")]
    Creation(String),

    #[error("unsupported value type at '{path}': expected string, got {found}")]
    UnsupportedValueType { path: String, found: &'static str },

    #[error("completeness condition failed: {0}")]
    Condition(ConditionError),

    #[error("value expression failed: {0}")]
    Expression(#[from] ExpressionError),

    #[error("request body resolution failed: {0}")]
    Resolution(String),

    #[error("no result recorded for referenced activity '{0}'")]
    MissingResult(String),

    #[error("request method {0} is not supported")]
    UnsupportedMethod(RequestMethod),

    #[error("activity '{0}' declares no completeness condition")]
    MissingCompletenessCondition(String),

    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
}

impl From<ConditionError> for ActivityError {
    fn from(err: ConditionError) -> Self {
        match err {
            ConditionError::UnsupportedValueType { path, found } => {
                ActivityError::UnsupportedValueType { path, found }
            }
            other => ActivityError::Condition(other),
        }
    }
}

impl ActivityError {
    /// Whether the host retry policy may re-invoke the activity.
    ///
    /// Network-facing failures and missing fields in fetched state are
    /// transient; everything rooted in the definition itself is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ActivityError::Retrieval(_) | ActivityError::Creation(_) | ActivityError::Timeout(_) => true,
            ActivityError::Expression(ExpressionError::PathNotFound { .. })
            | ActivityError::Condition(ConditionError::Path(ExpressionError::PathNotFound { .. })) => true,
            _ => false,
        }
    }
}

// ---------------------------------------------------------------------------
// Correlation and endpoints
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CorrelationKey<'a> {
    activity_name: &'a str,
    workflow_id: &'a str,
}

/// Deterministic correlation id: lowercase hex SHA-256 of
/// `{"activityName": .., "workflowId": ..}`.
pub fn correlation_id(run_id: &str, activity: &str) -> String {
    let key = CorrelationKey {
        activity_name: activity,
        workflow_id: run_id,
    };
    // Serializing two borrowed strings cannot fail.
    let canonical = serde_json::to_string(&key).unwrap_or_default();
    format!("{:x}", Sha256::digest(canonical.as_bytes()))
}

fn correlation(run_id: &str, activity: &str) -> Correlation {
    Correlation {
        correlation_id: correlation_id(run_id, activity),
        run_id: run_id.to_string(),
        activity: activity.to_string(),
    }
}

/// Append `path`'s segments to `base`.
pub fn join_url(base: &Url, path: &str) -> Result<Url, ActivityError> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| ActivityError::InvalidEndpoint(format!("'{base}' cannot be a base URL")))?
        .pop_if_empty()
        .extend(path.split('/').filter(|s| !s.is_empty()));
    Ok(url)
}

fn resource_id(response: &ResourceResponse) -> Option<String> {
    let body = response.parse_json().ok()?;
    match body.get("meta")?.get("resource_id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Poll backoff
// ---------------------------------------------------------------------------

/// Shortest wait between completeness checks.
pub const MIN_POLL_DELAY: Duration = Duration::from_secs(1);

/// Doubling wait between completeness checks, restarting from the initial
/// delay once the next wait would exceed the reset threshold.
#[derive(Debug, Clone)]
pub struct PollBackoff {
    initial: Duration,
    reset_after: Duration,
    current: Duration,
}

impl PollBackoff {
    /// `initial` is raised to [`MIN_POLL_DELAY`] when shorter.
    pub fn new(initial: Duration, reset_after: Duration) -> Self {
        let initial = initial.max(MIN_POLL_DELAY);
        Self {
            initial,
            reset_after,
            current: initial,
        }
    }

    pub fn from_config(config: &PollingConfig) -> Self {
        Self::new(
            Duration::from_secs(config.initial_delay_secs),
            Duration::from_secs(config.reset_after_secs),
        )
    }

    /// The wait before the next check.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        let doubled = self.current.saturating_mul(2);
        self.current = if doubled > self.reset_after {
            self.initial
        } else {
            doubled
        };
        delay
    }
}

// ---------------------------------------------------------------------------
// ActivityExecutor
// ---------------------------------------------------------------------------

/// Executes activities against a resource service.
///
/// Generic over `C: ResourceClient` so tests run against the in-memory backend.
pub struct ActivityExecutor<C: ResourceClient> {
    client: Arc<C>,
    base_url: Url,
    polling: PollingConfig,
}

impl<C: ResourceClient> ActivityExecutor<C> {
    pub fn new(client: Arc<C>, base_url: &str, polling: PollingConfig) -> Result<Self, ActivityError> {
        let base_url =
            Url::parse(base_url).map_err(|e| ActivityError::InvalidEndpoint(format!("{base_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ActivityError::InvalidEndpoint(format!(
                "'{base_url}' cannot be a base URL"
            )));
        }
        Ok(Self {
            client,
            base_url,
            polling,
        })
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Run one activity to completion and return its resource URL.
    pub async fn execute(
        &self,
        activity: &ActivityDefinition,
        results: &ResultsStore,
        run_id: &str,
    ) -> Result<String, ActivityError> {
        let correlation = correlation(run_id, &activity.name);
        let span = tracing::info_span!(
            "activity",
            run_id = %run_id,
            activity = %activity.name,
            correlation_id = %correlation.correlation_id,
        );
        self.execute_inner(activity, results, &correlation)
            .instrument(span)
            .await
    }

    async fn execute_inner(
        &self,
        activity: &ActivityDefinition,
        results: &ResultsStore,
        correlation: &Correlation,
    ) -> Result<String, ActivityError> {
        // Rejected before any side effect.
        if activity.request.method != RequestMethod::Post {
            return Err(ActivityError::UnsupportedMethod(activity.request.method));
        }
        let condition = activity
            .condition()
            .ok_or_else(|| ActivityError::MissingCompletenessCondition(activity.name.clone()))?;

        let body = self.resolve_body(&activity.request.body, results, correlation).await?;
        let payload = serde_json::to_string(&body).map_err(|e| ActivityError::Marshal(e.to_string()))?;

        let collection = join_url(&self.base_url, &activity.request.path)?;
        let resource_url = match self.find_existing(&collection, correlation).await? {
            Some(url) => {
                tracing::info!(resource_url = %url, "resource already exists, skipping creation");
                url
            }
            None => {
                let url = self.create(&collection, correlation, &payload).await?;
                tracing::info!(resource_url = %url, "resource created");
                url
            }
        };

        self.wait_until_complete(condition, &resource_url, correlation).await?;
        tracing::info!(resource_url = %resource_url, "activity complete");
        Ok(resource_url)
    }

    /// URL of the resource `run_id` created for `activity`, if one exists.
    ///
    /// Finds resources whose activity failed after creation, which never
    /// reach the results store.
    pub async fn locate(&self, activity: &ActivityDefinition, run_id: &str) -> Result<Option<String>, ActivityError> {
        let collection = join_url(&self.base_url, &activity.request.path)?;
        self.find_existing(&collection, &correlation(run_id, &activity.name)).await
    }

    /// Resolve every value expression in a copy of `template`.
    ///
    /// Each referenced activity's resource is fetched at most once.
    pub async fn resolve_body(
        &self,
        template: &Value,
        results: &ResultsStore,
        correlation: &Correlation,
    ) -> Result<Value, ActivityError> {
        let matches = find_matches(&PLACEHOLDER, template);
        let mut body = template.clone();
        let mut fetched: HashMap<String, Value> = HashMap::new();

        for m in matches {
            let expr = ValueExpression::parse(&m.raw)?;
            let state = match fetched.entry(expr.activity.clone()) {
                Entry::Occupied(entry) => entry.into_mut(),
                Entry::Vacant(entry) => {
                    let url = results
                        .get(&expr.activity)
                        .ok_or_else(|| ActivityError::MissingResult(expr.activity.clone()))?;
                    entry.insert(self.fetch_state(&url, correlation).await?)
                }
            };
            let value = lookup(state, &expr.path)?.clone();
            tracing::debug!(path = %m.path, referenced = %expr.activity, "resolved value expression");
            set_at_path(&mut body, &m.path, value).map_err(|e| ActivityError::Resolution(e.to_string()))?;
        }
        Ok(body)
    }

    async fn fetch_state(&self, url: &str, correlation: &Correlation) -> Result<Value, ActivityError> {
        let response = self
            .client
            .fetch(url, Some(correlation))
            .await
            .map_err(|e| ActivityError::Retrieval(e.to_string()))?;
        if !response.is_ok() {
            return Err(ActivityError::Retrieval(format!(
                "GET {url} returned status {}",
                response.status
            )));
        }
        response
            .parse_json()
            .map_err(|e| ActivityError::Retrieval(format!("GET {url} returned invalid JSON: {e}")))
    }

    /// Idempotency check: `Some(url)` when the resource already exists.
    async fn find_existing(
        &self,
        collection: &Url,
        correlation: &Correlation,
    ) -> Result<Option<String>, ActivityError> {
        let response = self
            .client
            .find_by_correlation(collection.as_str(), correlation)
            .await
            .map_err(|e| ActivityError::Retrieval(e.to_string()))?;

        if response.is_not_found() {
            tracing::debug!(collection = %collection, "no existing resource");
            return Ok(None);
        }
        if !response.is_ok() {
            return Err(ActivityError::Retrieval(format!(
                "lookup on {collection} returned status {}",
                response.status
            )));
        }
        let id = resource_id(&response).ok_or_else(|| {
            ActivityError::Retrieval(format!("lookup on {collection} returned no meta.resource_id"))
        })?;
        Ok(Some(join_url(collection, &id)?.to_string()))
    }

    async fn create(
        &self,
        collection: &Url,
        correlation: &Correlation,
        payload: &str,
    ) -> Result<String, ActivityError> {
        let response = self
            .client
            .create(collection.as_str(), correlation, payload)
            .await
            .map_err(|e| ActivityError::Creation(e.to_string()))?;
        if !response.is_ok() {
            return Err(ActivityError::Creation(format!(
                "POST {collection} returned status {}",
                response.status
            )));
        }
        let id = resource_id(&response).ok_or_else(|| {
            ActivityError::Creation(format!("POST {collection} returned no meta.resource_id"))
        })?;
        Ok(join_url(collection, &id)?.to_string())
    }

    /// Poll `resource_url` until `condition` holds. No internal deadline.
    async fn wait_until_complete(
        &self,
        condition: &str,
        resource_url: &str,
        correlation: &Correlation,
    ) -> Result<(), ActivityError> {
        let mut backoff = PollBackoff::from_config(&self.polling);
        let mut checks: u32 = 0;
        loop {
            checks += 1;
            let state = self.fetch_state(resource_url, correlation).await?;
            if condition::evaluate(condition, &state)? {
                tracing::debug!(checks, "completeness condition met");
                return Ok(());
            }
            let delay = backoff.next_delay();
            tracing::debug!(checks, delay_secs = delay.as_secs(), "completeness condition not met, waiting");
            tokio::time::sleep(delay).await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
