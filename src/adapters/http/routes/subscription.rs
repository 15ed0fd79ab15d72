use axum::{
    Json, Router,
    extract::{Path, State},
    response::IntoResponse,
    routing::get,
};
use chrono::Utc;

use crate::{adapters::http::app_state::AppState, app_error::AppResult};

pub fn router() -> Router<AppState> {
    Router::new().route("/{external_id}/subscription", get(get_subscription_status))
}

/// GET /api/users/{external_id}/subscription
/// Current subscription and entitlement for the bot.
async fn get_subscription_status(
    State(app_state): State<AppState>,
    Path(external_id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let view = app_state
        .subscription_query_use_cases
        .status_for_user(&external_id, Utc::now())
        .await?;
    Ok(Json(view))
}
