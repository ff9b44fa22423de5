use axum::extract::{OriginalUri, Request};
use axum::http::{header, HeaderMap, HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::collections::HashMap;
use thiserror::Error;

use crate::auth::{self, Claims};
use crate::state::AppState;
use crate::store::StoreError;

pub mod aliases;
pub mod compliance;
pub mod devices;
pub mod health;
pub mod login;
pub mod logs;
pub mod stream;
pub mod ws;

// ── API error taxonomy ───────────────────────────────────

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("missing or invalid token")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(&'static str),
    #[error("persistence failure")]
    Internal,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::InvalidCredentials | ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden => StatusCode::FORBIDDEN,
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::TenantMismatch { .. } => ApiError::BadRequest(err.to_string()),
            StoreError::Persist { .. } => {
                tracing::error!("Persistence failure: {err}");
                ApiError::Internal
            }
        }
    }
}

// ── Shared handler plumbing ──────────────────────────────

/// Authenticate a REST request. The token may arrive as a Bearer header
/// or as `?token=`; both go through the same verifier.
pub fn require_admin(
    state: &AppState,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<Claims, ApiError> {
    let token = auth::extract_token(headers, query).ok_or(ApiError::Unauthorized)?;
    auth::verify(&state.config.jwt_secret, &token).map_err(|_| ApiError::Unauthorized)
}

/// Every REST response is uncacheable.
pub async fn no_store(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    res
}

/// Unknown `/api/*` paths answer JSON, never the SPA shell.
pub async fn api_not_found(method: Method, OriginalUri(uri): OriginalUri) -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": "API route not found",
            "method": method.as_str(),
            "path": uri.path(),
        })),
    )
        .into_response()
}
