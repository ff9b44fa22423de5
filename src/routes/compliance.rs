use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use std::collections::HashMap;

use crate::models::ComplianceEvent;
use crate::policy;
use crate::routes::{require_admin, ApiError};
use crate::state::SharedState;

/// GET /api/compliance/events?deviceId=… — newest first, restricted to
/// devices the caller may see.
pub async fn list_events(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Vec<ComplianceEvent>>, ApiError> {
    let claims = require_admin(&state, &headers, &query)?;
    let filter = query.get("deviceId").map(String::as_str);
    let events = state
        .store
        .list_compliance(filter)
        .into_iter()
        .filter(|evt| {
            let tenant = state.store.device_tenant(&evt.device_id);
            policy::can_access_device(&claims.tenants, tenant)
        })
        .collect();
    Ok(Json(events))
}
