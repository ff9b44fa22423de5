use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::Json;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;

use crate::policy;
use crate::routes::{require_admin, ApiError};
use crate::state::SharedState;

/// GET /api/device-aliases — alias map keyed by device id, restricted
/// to devices the caller may see.
pub async fn list_aliases(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let claims = require_admin(&state, &headers, &query)?;
    let mut out = serde_json::Map::new();
    for (device_id, entry) in state.store.list_aliases() {
        let tenant = state.store.device_tenant(&device_id);
        if policy::can_access_device(&claims.tenants, tenant) {
            out.insert(device_id, serde_json::to_value(entry).unwrap_or(Value::Null));
        }
    }
    Ok(Json(Value::Object(out)))
}

/// PUT /api/device-aliases/{id} — set a label; an empty label deletes
/// the entry. A body without `label` is a 400.
pub async fn put_alias(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let claims = require_admin(&state, &headers, &query)?;
    let tenant = state.store.device_tenant(&device_id);
    if !policy::can_access_device(&claims.tenants, tenant) {
        return Err(ApiError::Forbidden);
    }
    let label = body
        .get("label")
        .and_then(|v| v.as_str())
        .ok_or_else(|| ApiError::BadRequest("label required".to_string()))?;

    let stored = state.store.put_alias(&device_id, label)?;
    state.store.append_log(
        "info",
        if label.is_empty() { "alias cleared" } else { "alias updated" },
        json!({ "deviceId": device_id, "label": label, "by": claims.sub }),
    );
    let updated_at = stored.map(|e| e.updated_at).unwrap_or_else(Utc::now);
    Ok(Json(json!({
        "ok": true,
        "deviceId": device_id,
        "label": label,
        "updatedAt": updated_at,
    })))
}
