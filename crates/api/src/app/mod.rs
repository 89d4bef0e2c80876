//! HTTP application wiring (Axum router + service wiring).
//!
//! - `services.rs`: the core context and the services handlers call into
//! - `routes/`: HTTP routes + handlers
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{routing::get, Extension, Router};

pub mod errors;
pub mod routes;
pub mod services;

use services::AppServices;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
///
/// Webhook routes are unauthenticated at the HTTP layer: each delivery is
/// authenticated by its body signature against the target store's secret.
pub fn build_app(services: Arc<AppServices>) -> Router {
    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::router())
        .layer(Extension(services))
}
