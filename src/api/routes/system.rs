//! System endpoints.

use axum::Json;

/// `GET /health` - liveness probe
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
