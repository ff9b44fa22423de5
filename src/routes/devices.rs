use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use std::collections::HashMap;

use crate::models::DeviceDto;
use crate::routes::{require_admin, ApiError};
use crate::state::SharedState;

/// GET /api/devices — every device the caller's tenants cover, with
/// alias names and compliance rollups joined in.
pub async fn list_devices(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<DeviceDto>>, ApiError> {
    let claims = require_admin(&state, &headers, &query)?;
    Ok(Json(state.devices_for(&claims.tenants)))
}
