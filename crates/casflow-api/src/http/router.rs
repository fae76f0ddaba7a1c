//! Axum router for the mock resource service.
//!
//! Routes: `POST /{collection}`, `GET /{collection}`, `GET /{collection}/{id}`,
//! `DELETE /{collection}/{id}`. Middleware: request tracing.

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tower_http::trace::TraceLayer;

use casflow_core::resource::memory::InMemoryResourceBackend;

use crate::http::handlers;

pub fn build_router(backend: Arc<InMemoryResourceBackend>) -> Router {
    Router::new()
        .route("/{collection}", get(handlers::lookup).post(handlers::create))
        .route("/{collection}/{id}", get(handlers::fetch).delete(handlers::remove))
        .layer(TraceLayer::new_for_http())
        .with_state(backend)
}
