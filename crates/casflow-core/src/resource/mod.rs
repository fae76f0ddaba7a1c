//! Resource service port.
//!
//! The orchestration core reaches the resource service only through
//! [`ResourceClient`]: four operations over fully-formed URLs. `casflow-infra`
//! provides the HTTP implementation; [`memory::InMemoryResourceBackend`] is the
//! in-process one used by tests and the mock server.

pub mod memory;

use std::future::Future;

use serde_json::Value;

/// Header carrying the correlation id on every request for an activity.
pub const REQUEST_ID_HEADER: &str = "x-request-id";
/// Header carrying the run id on create requests.
pub const WORKFLOW_ID_HEADER: &str = "x-workflow-id";
/// Header carrying the activity name on create requests.
pub const ACTIVITY_NAME_HEADER: &str = "x-activity-name";
/// Query parameter carrying the correlation id on idempotency lookups.
pub const CORRELATION_QUERY_PARAM: &str = "correlation";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Identity attached to every request an activity issues.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Correlation {
    pub correlation_id: String,
    pub run_id: String,
    pub activity: String,
}

/// Raw response from the resource service.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceResponse {
    pub status: u16,
    pub body: String,
}

impl ResourceResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn json(status: u16, body: &Value) -> Self {
        Self::new(status, body.to_string())
    }

    pub fn is_ok(&self) -> bool {
        self.status == 200
    }

    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    pub fn parse_json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Transport-level failure: the request never produced a response.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("request to {url} failed: {message}")]
    Request { url: String, message: String },

    #[error("request to {0} timed out")]
    Timeout(String),

    #[error("invalid resource URL: {0}")]
    InvalidUrl(String),
}

// ---------------------------------------------------------------------------
// ResourceClient trait
// ---------------------------------------------------------------------------

/// Capability to talk to the resource service.
///
/// Uses RPITIT (return-position `impl Trait` in traits) for async methods.
/// Implementations own their low-level retry policy; every method returns
/// the final response after those retries.
pub trait ResourceClient: Send + Sync {
    /// Idempotency lookup: `GET {collection_url}?correlation=<id>`.
    fn find_by_correlation(
        &self,
        collection_url: &str,
        correlation: &Correlation,
    ) -> impl Future<Output = Result<ResourceResponse, TransportError>> + Send;

    /// Creation: `POST {collection_url}` with a serialized JSON body.
    fn create(
        &self,
        collection_url: &str,
        correlation: &Correlation,
        body: &str,
    ) -> impl Future<Output = Result<ResourceResponse, TransportError>> + Send;

    /// Read a resource: `GET {resource_url}`.
    fn fetch(
        &self,
        resource_url: &str,
        correlation: Option<&Correlation>,
    ) -> impl Future<Output = Result<ResourceResponse, TransportError>> + Send;

    /// Best-effort removal: `DELETE {resource_url}`.
    fn delete(
        &self,
        resource_url: &str,
    ) -> impl Future<Output = Result<ResourceResponse, TransportError>> + Send;
}
