use axum::{routing::post, Router};

pub mod system;
pub mod webhooks;

/// Router for inbound store webhooks.
pub fn router() -> Router {
    Router::new().route("/webhooks/:platform/:store_id", post(webhooks::receive))
}
