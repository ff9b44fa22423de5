use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};

/// GET /api/health — unauthenticated liveness probe.
pub async fn health() -> Json<Value> {
    Json(json!({
        "ok": true,
        "ts": Utc::now().timestamp_millis(),
    }))
}
