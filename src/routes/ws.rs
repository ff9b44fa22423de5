//! The single WebSocket upgrade endpoint at `/`, shared by agents and
//! admins and dispatched on the `role` query parameter. Plain GETs on
//! `/` fall through to the SPA shell.
//!
//! Each session splits its socket: the read half stays in the session
//! loop, the write half is owned by one writer task fed from the
//! session's mailbox, so producers never touch the socket directly.

use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{FromRequestParts, Query, Request, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use chrono::Utc;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::auth::{self, Claims};
use crate::frames::decode_frame_field;
use crate::models::{AdminCommand, AdminEvent, AgentMessage, Tenant};
use crate::policy;
use crate::sessions::{AdminSession, AgentSession, OutboundTx, MAILBOX_CAPACITY};
use crate::state::SharedState;

const CLOSE_POLICY: u16 = 1008;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub role: Option<String>,
    #[serde(rename = "deviceId")]
    pub device_id: Option<String>,
    pub tenant: Option<String>,
    pub v: Option<String>,
    pub token: Option<String>,
}

/// GET / — WebSocket upgrade when requested, SPA shell otherwise.
pub async fn root_entry(State(state): State<SharedState>, req: Request) -> Response {
    let (mut parts, _body) = req.into_parts();
    let wants_upgrade = parts
        .headers
        .get(header::UPGRADE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !wants_upgrade {
        return serve_index(&state).await;
    }

    let params = match Query::<WsParams>::try_from_uri(&parts.uri) {
        Ok(Query(p)) => p,
        Err(_) => WsParams::default(),
    };
    let ws = match WebSocketUpgrade::from_request_parts(&mut parts, &state).await {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    match params.role.as_deref() {
        Some("agent") => {
            let device_id = params.device_id.unwrap_or_default();
            if device_id.is_empty() {
                return ws.on_upgrade(|socket| close_policy(socket, "deviceId required"));
            }
            let tenant = match params.tenant.as_deref().filter(|t| !t.is_empty()) {
                Some(raw) => match raw.parse::<Tenant>() {
                    Ok(t) => Some(t),
                    Err(_) => {
                        return ws.on_upgrade(|socket| close_policy(socket, "invalid tenant"));
                    }
                },
                None => None,
            };
            ws.on_upgrade(move |socket| {
                run_agent_session(socket, state, device_id, tenant, params.v, params.token)
            })
        }
        Some("admin") => {
            match params
                .token
                .as_deref()
                .map(|t| auth::verify(&state.config.jwt_secret, t))
            {
                Some(Ok(claims)) => {
                    ws.on_upgrade(move |socket| run_admin_session(socket, state, claims))
                }
                _ => ws.on_upgrade(|socket| close_policy(socket, "invalid token")),
            }
        }
        _ => ws.on_upgrade(|socket| close_policy(socket, "unknown role")),
    }
}

async fn serve_index(state: &SharedState) -> Response {
    let index = std::path::Path::new(&state.config.static_dir).join("index.html");
    match tokio::fs::read(&index).await {
        Ok(bytes) => Html(bytes).into_response(),
        Err(_) => (StatusCode::OK, "lookout hub").into_response(),
    }
}

async fn close_policy(mut socket: WebSocket, reason: &'static str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: reason.into(),
        })))
        .await;
}

/// Single consumer of a session's mailbox; the only place that writes
/// to the socket. A queued Close frame is sent and ends the task.
fn spawn_writer(
    mut sink: SplitSink<WebSocket, Message>,
    mut rx: mpsc::Receiver<Message>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if sink.send(msg).await.is_err() || closing {
                break;
            }
        }
    })
}

fn send_event(tx: &OutboundTx, event: &AdminEvent) {
    if let Ok(json) = serde_json::to_string(event) {
        let _ = tx.try_send(Message::Text(json.into()));
    }
}

// ── Agent sessions ───────────────────────────────────────

async fn run_agent_session(
    socket: WebSocket,
    state: SharedState,
    device_id: String,
    requested_tenant: Option<Tenant>,
    version: Option<String>,
    token: Option<String>,
) {
    if let Some(token) = token {
        // agent tokens are opaque to the hub
        tracing::debug!("Agent {device_id} presented token ({} chars)", token.len());
    }

    let tenant = match state.store.bind_agent_device(
        &device_id,
        requested_tenant,
        state.config.default_tenant,
    ) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!("Refusing agent for {device_id}: {e}");
            state.store.append_log(
                "warn",
                "agent refused: tenant mismatch",
                json!({ "deviceId": device_id }),
            );
            close_policy(socket, "tenant mismatch").await;
            return;
        }
    };

    let (sink, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let writer = spawn_writer(sink, rx);
    let session_id = Uuid::new_v4();

    // One agent per device: the previous session is force-closed before
    // the new one lands in the registry.
    if let Some(old) = state.sessions.supplant_agent(&device_id) {
        let _ = old.tx.try_send(Message::Close(Some(CloseFrame {
            code: 1000,
            reason: "supplanted".into(),
        })));
        tracing::warn!("Supplanting existing agent session for {device_id}");
        state.store.append_log(
            "warn",
            "agent supplanted",
            json!({ "deviceId": device_id }),
        );
    }
    state.sessions.insert_agent(AgentSession {
        session_id,
        device_id: device_id.clone(),
        tenant,
        agent_version: version.clone(),
        tx: tx.clone(),
    });

    state.store.set_agent_version(&device_id, version.clone());
    state
        .store
        .set_connected(&device_id, true, Some(Utc::now().timestamp_millis()));
    state.store.append_log(
        "info",
        "agent connected",
        json!({ "deviceId": device_id, "tenant": tenant, "version": version }),
    );
    tracing::info!("🖥️  Agent connected: {device_id} ({tenant})");
    state.broadcast_presence(&device_id);

    // viewers may already be waiting on this device
    if state.viewers.count(&device_id) > 0 {
        state.stream_toggle(&device_id, true);
    }

    while let Some(Ok(msg)) = ws_rx.next().await {
        match msg {
            Message::Binary(data) => state.ingest_binary_frame(&device_id, data),
            Message::Text(text) => handle_agent_text(&state, &device_id, tenant, &tx, &text),
            Message::Close(_) => break,
            _ => {}
        }
    }

    // Offline broadcast precedes removal from the registry, unless a
    // replacement session already took over the device.
    if state.sessions.agent_session_is(&device_id, session_id) {
        state.store.set_connected(&device_id, false, None);
        state.broadcast_presence(&device_id);
        state.sessions.remove_agent(&device_id, session_id);
        state.store.append_log(
            "info",
            "agent disconnected",
            json!({ "deviceId": device_id }),
        );
        tracing::info!("🔌 Agent disconnected: {device_id}");
    }
    writer.abort();
}

fn handle_agent_text(
    state: &SharedState,
    device_id: &str,
    tenant: Tenant,
    tx: &OutboundTx,
    text: &str,
) {
    let msg: AgentMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            // malformed traffic is dropped, the connection survives
            tracing::warn!("Unrecognized agent message from {device_id}: {e}");
            return;
        }
    };
    match msg {
        AgentMessage::Ping => {
            state.touch_agent(device_id, Utc::now().timestamp_millis());
            let _ = tx.try_send(Message::Text(json!({ "type": "pong" }).to_string().into()));
        }
        AgentMessage::ConsentResponse { accepted } => {
            tracing::info!("Consent response from {device_id}: accepted={accepted}");
            state.store.append_log(
                "info",
                "consent response",
                json!({ "deviceId": device_id, "accepted": accepted }),
            );
            state.sessions.broadcast_admins(
                tenant,
                &AdminEvent::ConsentResponse {
                    device_id: device_id.to_string(),
                    accepted,
                    reason: None,
                },
            );
        }
        AgentMessage::Frame(payload) => match decode_frame_field(&payload.jpeg_base64) {
            Some((bytes, mime)) => state.ingest_frame(device_id, bytes, &mime),
            None => tracing::warn!("Undecodable frame payload from {device_id}"),
        },
        AgentMessage::Compliance(report) => {
            if let Err(e) = state.record_compliance(device_id, report) {
                tracing::error!("Failed to record compliance event from {device_id}: {e}");
                state.store.append_log(
                    "error",
                    "compliance persist failed",
                    json!({ "deviceId": device_id }),
                );
            }
        }
    }
}

// ── Admin sessions ───────────────────────────────────────

async fn run_admin_session(socket: WebSocket, state: SharedState, claims: Claims) {
    let (sink, mut ws_rx) = socket.split();
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    let writer = spawn_writer(sink, rx);
    let admin_id = Uuid::new_v4();

    state.sessions.insert_admin(AdminSession {
        id: admin_id,
        username: claims.sub.clone(),
        scope: claims.tenants.clone(),
        tx: tx.clone(),
    });
    tracing::info!(
        "Admin connected: {} (admins: {})",
        claims.sub,
        state.sessions.admin_count()
    );

    send_event(
        &tx,
        &AdminEvent::DevicesSnapshot {
            devices: state.devices_for(&claims.tenants),
        },
    );

    while let Some(Ok(msg)) = ws_rx.next().await {
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        let cmd: AdminCommand = match serde_json::from_str(&text) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!("Unrecognized admin message from {}: {e}", claims.sub);
                continue;
            }
        };
        match cmd {
            AdminCommand::RequestRemoteAccess { device_id } => {
                handle_remote_access(&state, &claims, &tx, &device_id);
            }
        }
    }

    state.sessions.remove_admin(admin_id);
    tracing::info!("Admin disconnected: {}", claims.sub);
    writer.abort();
}

/// Consent coordination: forward the request to the device's agent, or
/// answer with a synthetic rejection when no agent is live. The agent's
/// eventual decision is broadcast tenant-wide from its own session.
fn handle_remote_access(state: &SharedState, claims: &Claims, tx: &OutboundTx, device_id: &str) {
    if device_id.is_empty() {
        send_event(
            tx,
            &AdminEvent::Error {
                message: "deviceId required".to_string(),
            },
        );
        return;
    }
    let tenant = state.store.device_tenant(device_id);
    if !policy::can_access_device(&claims.tenants, tenant) {
        send_event(
            tx,
            &AdminEvent::Error {
                message: "forbidden".to_string(),
            },
        );
        return;
    }

    let request = json!({ "type": "consent_request", "admin": claims.sub }).to_string();
    if state.sessions.agent_connected(device_id)
        && state
            .sessions
            .send_to_agent(device_id, Message::Text(request.into()))
    {
        state.store.append_log(
            "info",
            "consent request forwarded",
            json!({ "deviceId": device_id, "admin": claims.sub }),
        );
        send_event(
            tx,
            &AdminEvent::ConsentStatus {
                device_id: device_id.to_string(),
                status: "sent_to_agent".to_string(),
            },
        );
    } else {
        state.store.append_log(
            "info",
            "consent request while agent offline",
            json!({ "deviceId": device_id, "admin": claims.sub }),
        );
        send_event(
            tx,
            &AdminEvent::ConsentResponse {
                device_id: device_id.to_string(),
                accepted: false,
                reason: Some("agent_offline".to_string()),
            },
        );
    }
}
