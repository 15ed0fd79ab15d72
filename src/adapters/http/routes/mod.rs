pub mod health;
pub mod subscription;
pub mod webhook;
pub mod webhook_events;

use axum::{
    Router,
    routing::{get, post},
};

use crate::adapters::http::app_state::AppState;

/// Routes mounted under `/api`.
pub fn router() -> Router<AppState> {
    Router::new()
        .nest("/webhooks", webhook::router())
        .nest("/webhook-events", webhook_events::router())
        .nest("/users", subscription::router())
}

/// Routes mounted at the root: liveness and the provider's legacy webhook path.
pub fn root_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhook/tribute", post(webhook::receive_webhook))
}
