//! Frame serving: the single-image endpoint and the multipart live
//! viewer. Each open viewer response holds a gate ticket; dropping the
//! response releases it, which is what drives stream-enable/disable
//! signalling to the agent.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::{BufMut, Bytes, BytesMut};
use serde_json::json;

use crate::frames::FrameData;
use crate::policy;
use crate::routes::{require_admin, ApiError};
use crate::state::SharedState;

const BOUNDARY: &str = "frame";

/// GET /api/devices/{id}/frame — the current latest frame as one image.
pub async fn frame(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    authorize_viewer(&state, &device_id, &headers, &query)?;
    let frame = state
        .frames
        .latest(&device_id)
        .ok_or(ApiError::NotFound("no frame available"))?;

    let mime = HeaderValue::from_str(&frame.mime)
        .unwrap_or(HeaderValue::from_static("image/jpeg"));
    let mut res = Response::new(Body::from(frame.bytes.clone()));
    res.headers_mut().insert(header::CONTENT_TYPE, mime);
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(res)
}

/// GET /api/devices/{id}/mjpeg — multipart/x-mixed-replace stream, one
/// part per tick with whichever latest frame is current. Accepted even
/// while the agent is offline; parts start once frames exist.
pub async fn mjpeg(
    State(state): State<SharedState>,
    Path(device_id): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    authorize_viewer(&state, &device_id, &headers, &query)?;

    let ticket = ViewerTicket::open(state.clone(), device_id.clone());
    let interval = tokio::time::interval(Duration::from_millis(state.config.viewer_tick_ms.max(1)));
    let stream = futures::stream::unfold(
        (interval, ticket, state, device_id),
        |(mut interval, ticket, state, device_id)| async move {
            interval.tick().await;
            let chunk = match state.frames.latest(&device_id) {
                Some(frame) => multipart_chunk(&frame),
                None => Bytes::new(),
            };
            Some((Ok::<Bytes, Infallible>(chunk), (interval, ticket, state, device_id)))
        },
    );

    let mut res = Response::new(Body::from_stream(stream));
    *res.status_mut() = StatusCode::OK;
    res.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("multipart/x-mixed-replace; boundary=frame"),
    );
    res.headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    Ok(res)
}

fn authorize_viewer(
    state: &SharedState,
    device_id: &str,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<(), ApiError> {
    let claims = require_admin(state, headers, query)?;
    let tenant = state.store.device_tenant(device_id);
    if !policy::can_access_device(&claims.tenants, tenant) {
        return Err(ApiError::Forbidden);
    }
    Ok(())
}

fn multipart_chunk(frame: &Arc<FrameData>) -> Bytes {
    let header = format!(
        "--{BOUNDARY}\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        frame.mime,
        frame.bytes.len()
    );
    let mut chunk = BytesMut::with_capacity(header.len() + frame.bytes.len() + 2);
    chunk.put_slice(header.as_bytes());
    chunk.put_slice(&frame.bytes);
    chunk.put_slice(b"\r\n");
    chunk.freeze()
}

/// One viewer attachment. Creation takes the 0→1 edge, drop takes the
/// N→0 edge; the edges are the only times the agent hears about it.
struct ViewerTicket {
    state: SharedState,
    device_id: String,
}

impl ViewerTicket {
    fn open(state: SharedState, device_id: String) -> Self {
        if state.viewers.attach(&device_id) == 1 {
            tracing::info!("👁️  First viewer for {device_id} — enabling stream");
            state.stream_toggle(&device_id, true);
        }
        state.store.append_log(
            "info",
            "viewer attached",
            json!({ "deviceId": device_id, "viewers": state.viewers.count(&device_id) }),
        );
        ViewerTicket { state, device_id }
    }
}

impl Drop for ViewerTicket {
    fn drop(&mut self) {
        let remaining = self.state.viewers.detach(&self.device_id);
        if remaining == 0 {
            tracing::info!("👁️  Last viewer left {} — disabling stream", self.device_id);
            self.state.stream_toggle(&self.device_id, false);
        }
        self.state.store.append_log(
            "info",
            "viewer detached",
            json!({ "deviceId": self.device_id, "viewers": remaining }),
        );
    }
}
