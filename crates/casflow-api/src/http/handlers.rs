//! Resource protocol handlers.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use casflow_core::resource::memory::InMemoryResourceBackend;
use casflow_core::resource::{
    ACTIVITY_NAME_HEADER, CORRELATION_QUERY_PARAM, Correlation, REQUEST_ID_HEADER, ResourceResponse,
    WORKFLOW_ID_HEADER,
};

pub type Backend = Arc<InMemoryResourceBackend>;

fn respond(resp: ResourceResponse) -> Response {
    let status = StatusCode::from_u16(resp.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = (status, resp.body).into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

fn bad_request(message: &str) -> Response {
    respond(ResourceResponse::json(400, &json!({ "error": message })))
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// GET /{collection} - Idempotency lookup by correlation id.
///
/// The id comes from the `correlation` query parameter or the `x-request-id`
/// header.
pub async fn lookup(
    State(backend): State<Backend>,
    Path(collection): Path<String>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Response {
    let correlation_id = query
        .get(CORRELATION_QUERY_PARAM)
        .filter(|v| !v.is_empty())
        .cloned()
        .or_else(|| header_value(&headers, REQUEST_ID_HEADER));
    let Some(correlation_id) = correlation_id else {
        return bad_request("missing correlation id");
    };
    tracing::debug!(collection, correlation_id, "lookup");
    respond(backend.lookup(&collection, &correlation_id))
}

/// POST /{collection} - Create a resource.
pub async fn create(
    State(backend): State<Backend>,
    Path(collection): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(correlation_id) = header_value(&headers, REQUEST_ID_HEADER) else {
        return bad_request("missing x-request-id header");
    };
    let correlation = Correlation {
        correlation_id,
        run_id: header_value(&headers, WORKFLOW_ID_HEADER).unwrap_or_default(),
        activity: header_value(&headers, ACTIVITY_NAME_HEADER).unwrap_or_default(),
    };
    let resp = backend.insert(&collection, &correlation, &body);
    tracing::info!(
        collection,
        run_id = %correlation.run_id,
        activity = %correlation.activity,
        status = resp.status,
        "create"
    );
    respond(resp)
}

/// GET /{collection}/{id} - Read a resource.
pub async fn fetch(State(backend): State<Backend>, Path((collection, id)): Path<(String, String)>) -> Response {
    respond(backend.get(&collection, &id))
}

/// DELETE /{collection}/{id} - Remove a resource.
pub async fn remove(State(backend): State<Backend>, Path((collection, id)): Path<(String, String)>) -> Response {
    let resp = backend.remove(&collection, &id);
    tracing::info!(collection, id, status = resp.status, "delete");
    respond(resp)
}
