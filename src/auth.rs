//! Bearer tokens and the seeded administrator list.
//!
//! Tokens are `base64url(claims JSON) + "." + base64url(SHA-256(secret.payload))`
//! and expire after `token_ttl_secs`. One verifier serves all three
//! arrival paths: the `Authorization` header, `?token=` on stream URLs
//! (where `<img>` tags cannot set headers), and `?token=` on the
//! WebSocket upgrade.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::models::{Tenant, TenantScope};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub tenants: TenantScope,
    pub exp: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("invalid token")]
    Invalid,
    #[error("token expired")]
    Expired,
}

pub fn issue(secret: &str, username: &str, scope: &TenantScope, ttl_secs: i64) -> String {
    let claims = Claims {
        sub: username.to_string(),
        tenants: scope.clone(),
        exp: Utc::now().timestamp() + ttl_secs,
    };
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims).unwrap_or_default());
    let sig = signature(secret, &payload);
    format!("{payload}.{sig}")
}

pub fn verify(secret: &str, token: &str) -> Result<Claims, AuthError> {
    let (payload, sig) = token.split_once('.').ok_or(AuthError::Invalid)?;
    let expected = signature(secret, payload);
    if !constant_time_eq(sig.as_bytes(), expected.as_bytes()) {
        return Err(AuthError::Invalid);
    }
    let raw = URL_SAFE_NO_PAD.decode(payload).map_err(|_| AuthError::Invalid)?;
    let claims: Claims = serde_json::from_slice(&raw).map_err(|_| AuthError::Invalid)?;
    if claims.exp < Utc::now().timestamp() {
        return Err(AuthError::Expired);
    }
    Ok(claims)
}

fn signature(secret: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hasher.update(b".");
    hasher.update(payload.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Constant-time byte comparison to prevent timing attacks.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

// ── Seeded administrators ────────────────────────────────

pub struct AdminSeed {
    pub username: &'static str,
    password: &'static str,
    pub scope: TenantScope,
}

pub fn seeded_admins() -> Vec<AdminSeed> {
    vec![
        AdminSeed {
            username: "adminCLA",
            password: "@ims1234!",
            scope: TenantScope::Tenants(vec![Tenant::CLA1, Tenant::CLA2]),
        },
        AdminSeed {
            username: "adminDLA",
            password: "@ims1234!",
            scope: TenantScope::Tenants(vec![Tenant::DLA1, Tenant::DLA2]),
        },
        AdminSeed {
            username: "superadmin",
            password: "@ims1234!",
            scope: TenantScope::All,
        },
    ]
}

pub fn check_login(username: &str, password: &str) -> Option<AdminSeed> {
    seeded_admins().into_iter().find(|seed| {
        seed.username == username
            && constant_time_eq(seed.password.as_bytes(), password.as_bytes())
    })
}

// ── Token extraction ─────────────────────────────────────

/// Pull a token out of `Authorization: Bearer ...` or the `token` query
/// parameter, header first.
pub fn extract_token(
    headers: &axum::http::HeaderMap,
    query: &std::collections::HashMap<String, String>,
) -> Option<String> {
    if let Some(header) = headers.get(axum::http::header::AUTHORIZATION) {
        if let Some(token) = header.to_str().ok().and_then(|v| v.strip_prefix("Bearer ")) {
            return Some(token.to_string());
        }
    }
    query.get("token").cloned()
}
