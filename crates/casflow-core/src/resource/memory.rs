//! In-memory resource service.
//!
//! Stores resources per collection, indexes them by correlation id, and
//! simulates asynchronous provisioning: a new resource reports
//! `meta.status = "pending"` until it has been read a configurable number of
//! times, then `"created"`. Call counters, a deletion log, a log of posted
//! bodies, and per-collection failure injection make it the fake backend for
//! executor and orchestrator tests. The mock HTTP server wraps the same type.

use std::sync::{Mutex, PoisonError};
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use serde_json::{Map, Value, json};
use url::Url;
use uuid::Uuid;

use super::{Correlation, ResourceClient, ResourceResponse, TransportError};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_CREATED: &str = "created";

/// A create request as the backend received it.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedRequest {
    pub collection: String,
    pub correlation_id: String,
    pub run_id: String,
    pub activity: String,
    pub body: Value,
}

#[derive(Debug)]
struct StoredResource {
    document: Value,
    reads: usize,
}

#[derive(Debug, Default)]
struct Counters {
    lookups: AtomicUsize,
    creates: AtomicUsize,
    fetches: AtomicUsize,
    deletes: AtomicUsize,
}

#[derive(Debug, Default)]
pub struct InMemoryResourceBackend {
    /// Keyed by `collection/id`.
    resources: DashMap<String, StoredResource>,
    /// `(collection, correlation id)` -> resource id.
    by_correlation: DashMap<(String, String), String>,
    reads_until_created: usize,
    counters: Counters,
    deleted: Mutex<Vec<String>>,
    posted: Mutex<Vec<PostedRequest>>,
    create_failures: DashMap<String, u16>,
    lookup_failures: DashMap<String, u16>,
    fetch_failures: DashMap<String, u16>,
    delete_failures: DashMap<String, u16>,
}

fn normalize(collection: &str) -> String {
    collection.trim_matches('/').to_string()
}

fn error_body(message: &str) -> Value {
    json!({ "error": message })
}

impl InMemoryResourceBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resources stay `pending` for the first `reads` reads.
    pub fn with_reads_until_created(mut self, reads: usize) -> Self {
        self.reads_until_created = reads;
        self
    }

    // -----------------------------------------------------------------------
    // Failure injection
    // -----------------------------------------------------------------------

    /// Answer every create on `collection` with `status`.
    pub fn fail_creates(&self, collection: &str, status: u16) {
        self.create_failures.insert(normalize(collection), status);
    }

    /// Answer every idempotency lookup on `collection` with `status`.
    pub fn fail_lookups(&self, collection: &str, status: u16) {
        self.lookup_failures.insert(normalize(collection), status);
    }

    /// Answer every read of a resource in `collection` with `status`.
    pub fn fail_fetches(&self, collection: &str, status: u16) {
        self.fetch_failures.insert(normalize(collection), status);
    }

    /// Answer every delete of a resource in `collection` with `status`.
    pub fn fail_deletes(&self, collection: &str, status: u16) {
        self.delete_failures.insert(normalize(collection), status);
    }

    pub fn clear_failures(&self) {
        self.create_failures.clear();
        self.lookup_failures.clear();
        self.fetch_failures.clear();
        self.delete_failures.clear();
    }

    // -----------------------------------------------------------------------
    // Operations
    // -----------------------------------------------------------------------

    /// Find the resource created in `collection` under `correlation_id`.
    pub fn lookup(&self, collection: &str, correlation_id: &str) -> ResourceResponse {
        self.counters.lookups.fetch_add(1, Ordering::SeqCst);
        let collection = normalize(collection);
        if let Some(status) = self.lookup_failures.get(&collection) {
            return ResourceResponse::json(*status, &error_body("injected lookup failure"));
        }

        let id = self
            .by_correlation
            .get(&(collection.clone(), correlation_id.to_string()))
            .map(|id| id.value().clone());
        match id.and_then(|id| self.resources.get(&format!("{collection}/{id}"))) {
            Some(resource) => ResourceResponse::json(200, &resource.document),
            None => ResourceResponse::json(404, &error_body("resource not found")),
        }
    }

    /// Create a resource in `collection` from a serialized JSON body.
    pub fn insert(&self, collection: &str, correlation: &Correlation, body: &str) -> ResourceResponse {
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        let collection = normalize(collection);

        let body: Value = match serde_json::from_str(body) {
            Ok(value) => value,
            Err(e) => return ResourceResponse::json(400, &error_body(&e.to_string())),
        };

        self.posted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(PostedRequest {
                collection: collection.clone(),
                correlation_id: correlation.correlation_id.clone(),
                run_id: correlation.run_id.clone(),
                activity: correlation.activity.clone(),
                body: body.clone(),
            });

        if let Some(status) = self.create_failures.get(&collection) {
            return ResourceResponse::json(*status, &error_body("injected create failure"));
        }

        let id = Uuid::new_v4().simple().to_string();
        let status = if self.reads_until_created == 0 {
            STATUS_CREATED
        } else {
            STATUS_PENDING
        };

        let mut document = match body {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("body".to_string(), other);
                map
            }
        };
        document.insert(
            "meta".to_string(),
            json!({
                "resource_id": id,
                "client_request_id": correlation.correlation_id,
                "workflow_id": correlation.run_id,
                "activity_name": correlation.activity,
                "status": status,
            }),
        );
        let document = Value::Object(document);

        self.resources.insert(
            format!("{collection}/{id}"),
            StoredResource {
                document: document.clone(),
                reads: 0,
            },
        );
        self.by_correlation
            .insert((collection, correlation.correlation_id.clone()), id);

        ResourceResponse::json(200, &document)
    }

    /// Read resource `id` in `collection`, advancing its provisioning state.
    pub fn get(&self, collection: &str, id: &str) -> ResourceResponse {
        self.counters.fetches.fetch_add(1, Ordering::SeqCst);
        let collection = normalize(collection);
        if let Some(status) = self.fetch_failures.get(&collection) {
            return ResourceResponse::json(*status, &error_body("injected fetch failure"));
        }

        let Some(mut resource) = self.resources.get_mut(&format!("{collection}/{id}")) else {
            return ResourceResponse::json(404, &error_body("resource not found"));
        };
        resource.reads += 1;
        if resource.reads >= self.reads_until_created {
            if let Some(meta) = resource.document.get_mut("meta").and_then(Value::as_object_mut) {
                meta.insert("status".to_string(), json!(STATUS_CREATED));
            }
        }
        ResourceResponse::json(200, &resource.document)
    }

    /// Delete resource `id` in `collection`.
    pub fn remove(&self, collection: &str, id: &str) -> ResourceResponse {
        self.counters.deletes.fetch_add(1, Ordering::SeqCst);
        let collection = normalize(collection);
        let key = format!("{collection}/{id}");
        self.deleted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(format!("/{key}"));
        if let Some(status) = self.delete_failures.get(&collection) {
            return ResourceResponse::json(*status, &error_body("injected delete failure"));
        }
        match self.resources.remove(&key) {
            Some(_) => {
                self.by_correlation.retain(|_, v| v.as_str() != id);
                ResourceResponse::json(200, &json!({ "deleted": key }))
            }
            None => ResourceResponse::json(404, &error_body("resource not found")),
        }
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    pub fn lookup_count(&self) -> usize {
        self.counters.lookups.load(Ordering::SeqCst)
    }

    pub fn create_count(&self) -> usize {
        self.counters.creates.load(Ordering::SeqCst)
    }

    pub fn fetch_count(&self) -> usize {
        self.counters.fetches.load(Ordering::SeqCst)
    }

    pub fn delete_count(&self) -> usize {
        self.counters.deletes.load(Ordering::SeqCst)
    }

    pub fn resource_count(&self) -> usize {
        self.resources.len()
    }

    /// Paths (`/collection/id`) of every delete request, in arrival order.
    pub fn deleted_paths(&self) -> Vec<String> {
        self.deleted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Every create request body, in arrival order.
    pub fn posted(&self) -> Vec<PostedRequest> {
        self.posted.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

// ---------------------------------------------------------------------------
// ResourceClient over URLs
// ---------------------------------------------------------------------------

fn collection_of(url: &str) -> Result<String, TransportError> {
    let parsed = Url::parse(url).map_err(|e| TransportError::InvalidUrl(format!("{url}: {e}")))?;
    Ok(normalize(parsed.path()))
}

fn resource_of(url: &str) -> Result<(String, String), TransportError> {
    let path = collection_of(url)?;
    path.rsplit_once('/')
        .map(|(collection, id)| (collection.to_string(), id.to_string()))
        .ok_or_else(|| TransportError::InvalidUrl(format!("{url}: no resource id")))
}

impl ResourceClient for InMemoryResourceBackend {
    async fn find_by_correlation(
        &self,
        collection_url: &str,
        correlation: &Correlation,
    ) -> Result<ResourceResponse, TransportError> {
        let collection = collection_of(collection_url)?;
        Ok(self.lookup(&collection, &correlation.correlation_id))
    }

    async fn create(
        &self,
        collection_url: &str,
        correlation: &Correlation,
        body: &str,
    ) -> Result<ResourceResponse, TransportError> {
        let collection = collection_of(collection_url)?;
        Ok(self.insert(&collection, correlation, body))
    }

    async fn fetch(
        &self,
        resource_url: &str,
        _correlation: Option<&Correlation>,
    ) -> Result<ResourceResponse, TransportError> {
        let (collection, id) = resource_of(resource_url)?;
        Ok(self.get(&collection, &id))
    }

    async fn delete(&self, resource_url: &str) -> Result<ResourceResponse, TransportError> {
        let (collection, id) = resource_of(resource_url)?;
        Ok(self.remove(&collection, &id))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn correlation(id: &str) -> Correlation {
        Correlation {
            correlation_id: id.to_string(),
            run_id: "run-1".to_string(),
            activity: "live_hook".to_string(),
        }
    }

    fn resource_id(resp: &ResourceResponse) -> String {
        resp.parse_json().unwrap()["meta"]["resource_id"]
            .as_str()
            .unwrap()
            .to_string()
    }

    #[test]
    fn test_insert_then_lookup_by_correlation() {
        let backend = InMemoryResourceBackend::new();
        assert!(backend.lookup("/live_hooks", "c1").is_not_found());

        let created = backend.insert("/live_hooks", &correlation("c1"), r#"{"sender_port": 5000}"#);
        assert!(created.is_ok());
        let doc = created.parse_json().unwrap();
        assert_eq!(doc["sender_port"], json!(5000));
        assert_eq!(doc["meta"]["client_request_id"], json!("c1"));
        assert_eq!(doc["meta"]["status"], json!(STATUS_CREATED));

        let found = backend.lookup("live_hooks", "c1");
        assert!(found.is_ok());
        assert_eq!(resource_id(&found), resource_id(&created));
        assert!(backend.lookup("other", "c1").is_not_found(), "lookups are per collection");
    }

    #[test]
    fn test_pending_until_enough_reads() {
        let backend = InMemoryResourceBackend::new().with_reads_until_created(2);
        let created = backend.insert("things", &correlation("c"), "{}");
        let id = resource_id(&created);
        assert_eq!(created.parse_json().unwrap()["meta"]["status"], json!(STATUS_PENDING));

        let first = backend.get("things", &id).parse_json().unwrap();
        assert_eq!(first["meta"]["status"], json!(STATUS_PENDING));
        let second = backend.get("things", &id).parse_json().unwrap();
        assert_eq!(second["meta"]["status"], json!(STATUS_CREATED));
    }

    #[test]
    fn test_failure_injection_and_counters() {
        let backend = InMemoryResourceBackend::new();
        backend.fail_creates("things", 500);
        backend.fail_lookups("things", 503);
        assert_eq!(backend.insert("things", &correlation("c"), "{}").status, 500);
        assert_eq!(backend.lookup("things", "c").status, 503);
        assert_eq!(backend.resource_count(), 0);

        backend.clear_failures();
        assert!(backend.insert("things", &correlation("c"), "{}").is_ok());
        assert_eq!(backend.create_count(), 2);
        assert_eq!(backend.lookup_count(), 1);
        assert_eq!(backend.posted().len(), 2);
    }

    #[test]
    fn test_invalid_body_is_bad_request() {
        let backend = InMemoryResourceBackend::new();
        assert_eq!(backend.insert("things", &correlation("c"), "not json").status, 400);
    }

    #[tokio::test]
    async fn test_client_round_trip_over_urls() {
        let backend = InMemoryResourceBackend::new();
        let corr = correlation("c9");
        let created = backend
            .create("http://cas.test/live_hooks", &corr, "{}")
            .await
            .unwrap();
        let id = resource_id(&created);
        let url = format!("http://cas.test/live_hooks/{id}");

        let fetched = backend.fetch(&url, Some(&corr)).await.unwrap();
        assert!(fetched.is_ok());

        let deleted = backend.delete(&url).await.unwrap();
        assert!(deleted.is_ok());
        assert_eq!(backend.deleted_paths(), vec![format!("/live_hooks/{id}")]);
        assert!(backend.fetch(&url, None).await.unwrap().is_not_found());
        assert!(
            backend
                .find_by_correlation("http://cas.test/live_hooks", &corr)
                .await
                .unwrap()
                .is_not_found()
        );

        assert!(matches!(
            backend.fetch("not a url", None).await,
            Err(TransportError::InvalidUrl(_))
        ));
    }
}
