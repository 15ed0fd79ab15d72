use axum::{
    Json, Router,
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;

use crate::{adapters::http::app_state::AppState, app_error::AppResult};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_events))
        .route("/{id}", get(get_event))
}

#[derive(Debug, Deserialize)]
struct ListEventsQuery {
    limit: Option<i64>,
}

/// GET /api/webhook-events?limit=N
/// Newest first; limit is clamped to 1..=500.
async fn list_events(
    State(app_state): State<AppState>,
    Query(query): Query<ListEventsQuery>,
) -> AppResult<impl IntoResponse> {
    let events = app_state.ingestion_use_cases.list_events(query.limit).await?;
    Ok(Json(events))
}

/// GET /api/webhook-events/{id}
async fn get_event(
    State(app_state): State<AppState>,
    Path(id): Path<i64>,
) -> AppResult<impl IntoResponse> {
    let event = app_state.ingestion_use_cases.get_event(id).await?;
    Ok(Json(event))
}
