//! REST surface tests, driving the router in-process.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use bytes::Bytes;
use http_body_util::BodyExt;
use lookout_hub::auth;
use lookout_hub::config::Config;
use lookout_hub::models::{ComplianceReport, Severity, Tenant, TenantScope};
use lookout_hub::state::{AppState, SharedState};
use lookout_hub::store::Store;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

fn setup() -> (Router, SharedState, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::default();
    cfg.data_dir = dir.path().to_string_lossy().to_string();
    let store = Store::open(&cfg.data_dir, cfg.log_buffer).unwrap();
    let state = Arc::new(AppState::new(cfg, store));
    (lookout_hub::build_router(state.clone()), state, dir)
}

fn cla_token(state: &SharedState) -> String {
    auth::issue(
        &state.config.jwt_secret,
        "adminCLA",
        &TenantScope::Tenants(vec![Tenant::CLA1, Tenant::CLA2]),
        3600,
    )
}

fn dla_token(state: &SharedState) -> String {
    auth::issue(
        &state.config.jwt_secret,
        "adminDLA",
        &TenantScope::Tenants(vec![Tenant::DLA1, Tenant::DLA2]),
        3600,
    )
}

fn master_token(state: &SharedState) -> String {
    auth::issue(&state.config.jwt_secret, "superadmin", &TenantScope::All, 3600)
}

fn bind_device(state: &SharedState, id: &str, tenant: Tenant) {
    state.store.bind_agent_device(id, Some(tenant), tenant).unwrap();
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, axum::http::HeaderMap, Bytes) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, headers, body)
}

async fn get(app: &Router, path: &str, token: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().uri(path);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let (status, _, body) = send(app, builder.body(Body::empty()).unwrap()).await;
    let json = serde_json::from_slice(&body).unwrap_or(Value::Null);
    (status, json)
}

async fn put_json(app: &Router, path: &str, token: &str, body: Value) -> (StatusCode, Value) {
    let req = Request::builder()
        .method("PUT")
        .uri(path)
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let (status, _, bytes) = send(app, req).await;
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

// ── Login ────────────────────────────────────────────────

#[tokio::test]
async fn login_happy_path_and_token_reuse() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);

    let req = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "adminCLA", "password": "@ims1234!"}).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["user"]["username"], "adminCLA");
    assert_eq!(json["user"]["allowedTenants"], json!(["CLA1", "CLA2"]));

    let token = json["token"].as_str().unwrap();
    let (status, devices) = get(&app, "/api/devices", Some(token)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(devices.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn login_rejects_bad_credentials() {
    let (app, _state, _dir) = setup();
    let req = Request::builder()
        .method("POST")
        .uri("/api/login")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({"username": "adminCLA", "password": "nope"}).to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    let json: Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(json["error"], "invalid credentials");
}

// ── Devices ──────────────────────────────────────────────

#[tokio::test]
async fn devices_require_auth_and_filter_by_tenant() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    bind_device(&state, "dev-b", Tenant::DLA2);

    let (status, _) = get(&app, "/api/devices", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, list) = get(&app, "/api/devices", Some(&cla_token(&state))).await;
    assert_eq!(status, StatusCode::OK);
    let list = list.as_array().unwrap().clone();
    assert_eq!(list.len(), 1);
    assert_eq!(list[0]["deviceId"], "dev-a");
    assert_eq!(list[0]["id"], "dev-a");
    assert_eq!(list[0]["tenant"], "CLA1");
    assert_eq!(list[0]["connected"], false);
    assert_eq!(list[0]["online"], false);

    let (_, list) = get(&app, "/api/devices", Some(&master_token(&state))).await;
    assert_eq!(list.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn devices_join_aliases_and_compliance() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    state.store.put_alias("dev-a", "Front register").unwrap();
    state
        .record_compliance(
            "dev-a",
            ComplianceReport {
                author: "scanner".into(),
                context: "chat".into(),
                content: "flagged".into(),
                matches: vec!["bad".into()],
                severity: Some(Severity::High),
                suspicious: true,
            },
        )
        .unwrap();

    let (_, list) = get(&app, "/api/devices", Some(&cla_token(&state))).await;
    let device = &list.as_array().unwrap()[0];
    assert_eq!(device["name"], "Front register");
    assert_eq!(device["complianceFlag"], true);
    assert_eq!(device["complianceCount"], 1);
    assert_eq!(device["complianceLastSeverity"], "high");
}

#[tokio::test]
async fn rest_responses_are_uncacheable() {
    let (app, state, _dir) = setup();
    let req = Request::builder()
        .uri("/api/devices")
        .header(header::AUTHORIZATION, format!("Bearer {}", cla_token(&state)))
        .body(Body::empty())
        .unwrap();
    let (status, headers, _) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
}

#[tokio::test]
async fn unknown_api_route_is_json_404() {
    let (app, _state, _dir) = setup();
    let (status, body) = get(&app, "/api/definitely/not/here", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "API route not found");
    assert_eq!(body["method"], "GET");
    assert_eq!(body["path"], "/api/definitely/not/here");
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (app, _state, _dir) = setup();
    let (status, body) = get(&app, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert!(body["ts"].is_i64());
}

// ── Aliases ──────────────────────────────────────────────

#[tokio::test]
async fn alias_put_list_delete_cycle() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    let token = cla_token(&state);

    let (status, body) =
        put_json(&app, "/api/device-aliases/dev-a", &token, json!({"label": "Kiosk"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["deviceId"], "dev-a");
    assert_eq!(body["label"], "Kiosk");
    assert!(body["updatedAt"].is_string());

    let (_, listed) = get(&app, "/api/device-aliases", Some(&token)).await;
    assert_eq!(listed["dev-a"]["label"], "Kiosk");

    // empty label deletes
    let (status, _) =
        put_json(&app, "/api/device-aliases/dev-a", &token, json!({"label": ""})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, listed) = get(&app, "/api/device-aliases", Some(&token)).await;
    assert!(listed.get("dev-a").is_none());
    assert!(state.store.get_alias("dev-a").is_none());
}

#[tokio::test]
async fn alias_put_without_label_is_a_400() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    let (status, body) =
        put_json(&app, "/api/device-aliases/dev-a", &cla_token(&state), json!({})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "label required");
}

#[tokio::test]
async fn alias_put_outside_tenant_is_forbidden() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-b", Tenant::DLA2);
    let (status, _) =
        put_json(&app, "/api/device-aliases/dev-b", &cla_token(&state), json!({"label": "x"}))
            .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // a device nobody has bound yet is invisible to everyone
    let (status, _) =
        put_json(&app, "/api/device-aliases/ghost", &master_token(&state), json!({"label": "x"}))
            .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn alias_list_hides_other_tenants() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    bind_device(&state, "dev-b", Tenant::DLA2);
    state.store.put_alias("dev-a", "Mine").unwrap();
    state.store.put_alias("dev-b", "Theirs").unwrap();

    let (_, listed) = get(&app, "/api/device-aliases", Some(&cla_token(&state))).await;
    assert!(listed.get("dev-a").is_some());
    assert!(listed.get("dev-b").is_none());
}

// ── Compliance ───────────────────────────────────────────

#[tokio::test]
async fn compliance_listing_filters_and_sorts() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    bind_device(&state, "dev-b", Tenant::DLA2);
    for (device, content) in [("dev-a", "first"), ("dev-a", "second"), ("dev-b", "other")] {
        state
            .record_compliance(
                device,
                ComplianceReport {
                    author: "scanner".into(),
                    context: "chat".into(),
                    content: content.into(),
                    matches: vec![],
                    severity: Some(Severity::Low),
                    suspicious: false,
                },
            )
            .unwrap();
    }

    let (status, events) = get(&app, "/api/compliance/events", Some(&cla_token(&state))).await;
    assert_eq!(status, StatusCode::OK);
    let events = events.as_array().unwrap().clone();
    assert_eq!(events.len(), 2);
    // newest first
    assert_eq!(events[0]["content"], "second");
    assert_eq!(events[1]["content"], "first");

    let (_, filtered) = get(
        &app,
        "/api/compliance/events?deviceId=dev-b",
        Some(&master_token(&state)),
    )
    .await;
    assert_eq!(filtered.as_array().unwrap().len(), 1);

    let (_, all) = get(&app, "/api/compliance/events", Some(&master_token(&state))).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
}

// ── Logs ─────────────────────────────────────────────────

#[tokio::test]
async fn logs_are_served_newest_first() {
    let (app, state, _dir) = setup();
    state.store.append_log("info", "older", json!({}));
    state.store.append_log("warn", "newer", json!({}));

    let (status, logs) = get(&app, "/api/logs", Some(&cla_token(&state))).await;
    assert_eq!(status, StatusCode::OK);
    let logs = logs.as_array().unwrap().clone();
    assert_eq!(logs[0]["msg"], "newer");
    assert_eq!(logs[0]["level"], "warn");
    assert_eq!(logs[1]["msg"], "older");
}

// ── Frames ───────────────────────────────────────────────

#[tokio::test]
async fn frame_endpoint_serves_latest_bytes() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    let payload = b"\xff\xd8\xff\xe0 jpeg".to_vec();
    state.ingest_binary_frame("dev-a", Bytes::from(payload.clone()));

    let token = cla_token(&state);
    let req = Request::builder()
        .uri("/api/devices/dev-a/frame")
        .header(header::AUTHORIZATION, format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap();
    let (status, headers, body) = send(&app, req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers.get(header::CONTENT_TYPE).unwrap(), "image/jpeg");
    assert_eq!(headers.get(header::CACHE_CONTROL).unwrap(), "no-store");
    assert_eq!(body.as_ref(), payload.as_slice());
}

#[tokio::test]
async fn frame_token_in_query_equals_bearer_header() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    state.ingest_binary_frame("dev-a", Bytes::from_static(b"img"));
    let token = cla_token(&state);

    let (status, _) = get(&app, &format!("/api/devices/dev-a/frame?token={token}"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&app, "/api/devices/dev-a/frame?token=garbage", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn frame_endpoint_errors_follow_the_taxonomy() {
    let (app, state, _dir) = setup();
    bind_device(&state, "dev-a", Tenant::CLA1);
    state.ingest_binary_frame("dev-a", Bytes::from_static(b"img"));
    bind_device(&state, "dev-empty", Tenant::CLA1);

    // no auth at all
    let (status, _) = get(&app, "/api/devices/dev-a/frame", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    // out of tenant
    let (status, _) = get(&app, "/api/devices/dev-a/frame", Some(&dla_token(&state))).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    // in tenant, but nothing streamed yet
    let (status, _) = get(&app, "/api/devices/dev-empty/frame", Some(&cla_token(&state))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
