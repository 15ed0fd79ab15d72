use axum::{
    Json, Router,
    extract::State,
    response::IntoResponse,
    routing::post,
};
use chrono::Utc;
use serde::Serialize;

use crate::{adapters::http::app_state::AppState, app_error::AppResult};

pub fn router() -> Router<AppState> {
    Router::new().route("/tribute", post(receive_webhook))
}

#[derive(Debug, Serialize)]
struct WebhookAck {
    ok: bool,
    duplicate: bool,
}

/// POST /api/webhooks/tribute (also /webhook/tribute)
/// Provider notification endpoint. Any non-2xx tells the provider to retry.
pub async fn receive_webhook(
    State(app_state): State<AppState>,
    body: String,
) -> AppResult<impl IntoResponse> {
    let outcome = app_state.ingestion_use_cases.ingest(&body, Utc::now()).await?;

    if let (Some(change), Some(notifications)) = (outcome.change, &app_state.notifications) {
        notifications.enqueue(change);
    }

    Ok(Json(WebhookAck {
        ok: true,
        duplicate: outcome.duplicate,
    }))
}
