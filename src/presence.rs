//! Presence sweeper: devices that stop producing heartbeats or frames
//! go offline after the TTL. The socket is left alone; it dies on its
//! own close or the next failed send.

use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::state::SharedState;

pub async fn run(state: SharedState) {
    let mut interval =
        tokio::time::interval(Duration::from_secs(state.config.sweep_interval_secs.max(1)));
    let ttl_ms = state.config.presence_ttl_secs as i64 * 1000;
    loop {
        interval.tick().await;
        sweep(&state, ttl_ms);
    }
}

fn sweep(state: &SharedState, ttl_ms: i64) {
    let now_ms = Utc::now().timestamp_millis();
    for device in state.store.devices_snapshot() {
        if !device.connected {
            continue;
        }
        let stale = device
            .last_seen_ms
            .map_or(true, |last| now_ms - last > ttl_ms);
        if stale {
            tracing::info!("Presence timeout for {} — marking offline", device.id);
            state.store.set_connected(&device.id, false, None);
            state.store.append_log(
                "warn",
                "presence timeout",
                json!({ "deviceId": device.id, "lastSeen": device.last_seen_ms }),
            );
            state.broadcast_presence(&device.id);
        }
    }
}
