use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use std::collections::HashMap;

use crate::models::LogEntry;
use crate::routes::{require_admin, ApiError};
use crate::state::SharedState;

/// GET /api/logs — the operational ring buffer, newest first.
pub async fn list_logs(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<LogEntry>>, ApiError> {
    require_admin(&state, &headers, &query)?;
    Ok(Json(state.store.logs()))
}
