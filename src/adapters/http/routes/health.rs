use axum::Json;
use serde_json::{Value as JsonValue, json};

pub const SERVICE_NAME: &str = "subscription-ledger";

/// GET /health
/// Liveness only; never touches storage.
pub async fn health() -> Json<JsonValue> {
    Json(json!({ "status": "healthy", "service": SERVICE_NAME }))
}
