use axum::extract::State;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth;
use crate::routes::ApiError;
use crate::state::SharedState;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

/// POST /api/login — exchange seeded credentials for a bearer token.
pub async fn login(
    State(state): State<SharedState>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<Value>, ApiError> {
    let seed =
        auth::check_login(&body.username, &body.password).ok_or(ApiError::InvalidCredentials)?;
    let token = auth::issue(
        &state.config.jwt_secret,
        seed.username,
        &seed.scope,
        state.config.token_ttl_secs,
    );
    state.store.append_log(
        "info",
        "admin login",
        json!({ "username": seed.username }),
    );
    Ok(Json(json!({
        "token": token,
        "user": {
            "id": seed.username,
            "username": seed.username,
            "allowedTenants": seed.scope,
        },
    })))
}
