use std::sync::Arc;

use axum::extract::ws::Message;
use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use crate::config::Config;
use crate::frames::{FrameRouter, ViewerGate, DEFAULT_FRAME_MIME};
use crate::models::{
    AdminEvent, ComplianceAggregate, ComplianceEvent, ComplianceReport, Device, DeviceDto,
    TenantScope,
};
use crate::policy;
use crate::sessions::SessionRegistry;
use crate::store::{Store, StoreError};

pub type SharedState = Arc<AppState>;

pub struct AppState {
    pub config: Config,
    pub store: Store,
    pub sessions: SessionRegistry,
    pub frames: FrameRouter,
    pub viewers: ViewerGate,
}

impl AppState {
    pub fn new(config: Config, store: Store) -> Self {
        let frames = FrameRouter::new(config.min_frame_interval_ms);
        AppState {
            config,
            store,
            sessions: SessionRegistry::new(),
            frames,
            viewers: ViewerGate::new(),
        }
    }

    // ── Device views ─────────────────────────────────────

    pub fn device_dto(&self, device: &Device) -> DeviceDto {
        let name = self
            .store
            .get_alias(&device.id)
            .map(|a| a.label)
            .filter(|l| !l.is_empty())
            .unwrap_or_else(|| device.id.clone());
        let agg = self.store.aggregate(&device.id).unwrap_or_default();
        DeviceDto {
            id: device.id.clone(),
            device_id: device.id.clone(),
            name,
            tenant: device.tenant,
            connected: device.connected,
            online: device.connected,
            last_seen: device.last_seen_ms,
            agent_version: device.agent_version.clone(),
            compliance_flag: agg.count > 0,
            compliance_count: agg.count,
            compliance_last_at: agg.last_at,
            compliance_last_severity: agg.last_severity,
        }
    }

    /// Tenant-filtered device list, shared by REST and the WS snapshot.
    pub fn devices_for(&self, scope: &TenantScope) -> Vec<DeviceDto> {
        let mut devices: Vec<DeviceDto> = self
            .store
            .devices_snapshot()
            .iter()
            .filter(|d| policy::can_access_device(scope, d.tenant))
            .map(|d| self.device_dto(d))
            .collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    // ── Presence ─────────────────────────────────────────

    pub fn broadcast_presence(&self, device_id: &str) {
        let Some(device) = self.store.device(device_id) else {
            return;
        };
        let Some(tenant) = device.tenant else {
            return;
        };
        self.sessions.broadcast_admins(
            tenant,
            &AdminEvent::DevicePresence {
                device_id: device.id,
                online: device.connected,
                last_seen: device.last_seen_ms,
                agent_version: device.agent_version,
            },
        );
    }

    /// Refresh liveness from agent traffic; a device the sweeper marked
    /// offline comes back online and the transition is re-broadcast.
    pub fn touch_agent(&self, device_id: &str, now_ms: i64) {
        if self.store.touch(device_id, now_ms) {
            self.store.append_log(
                "info",
                "device back online",
                json!({ "deviceId": device_id }),
            );
            self.broadcast_presence(device_id);
        }
    }

    // ── Frames ───────────────────────────────────────────

    /// Route one frame into the latest-frame store. Arrival refreshes
    /// liveness even when the frame itself is throttled away.
    pub fn ingest_frame(&self, device_id: &str, bytes: bytes::Bytes, mime: &str) {
        let now_ms = Utc::now().timestamp_millis();
        self.frames.ingest(device_id, bytes, mime, now_ms);
        self.touch_agent(device_id, now_ms);
    }

    pub fn ingest_binary_frame(&self, device_id: &str, bytes: bytes::Bytes) {
        self.ingest_frame(device_id, bytes, DEFAULT_FRAME_MIME);
    }

    // ── Stream control ───────────────────────────────────

    /// Ask the device's agent to start or stop streaming. Both wire
    /// spellings are emitted so older agents keep working.
    pub fn stream_toggle(&self, device_id: &str, enable: bool) {
        let verbs: [&str; 2] = if enable {
            ["stream-enable", "stream_enable"]
        } else {
            ["stream-disable", "stream_disable"]
        };
        for verb in verbs {
            let msg = json!({ "type": verb }).to_string();
            if !self.sessions.send_to_agent(device_id, Message::Text(msg.into())) {
                return;
            }
        }
        self.store.append_log(
            "info",
            if enable { "stream enabled" } else { "stream disabled" },
            json!({ "deviceId": device_id }),
        );
    }

    // ── Compliance ───────────────────────────────────────

    /// Persist an agent compliance report and notify the tenant's
    /// admins. The broadcast carries the updated aggregate.
    pub fn record_compliance(
        &self,
        device_id: &str,
        report: ComplianceReport,
    ) -> Result<ComplianceAggregate, StoreError> {
        let event = ComplianceEvent {
            id: Uuid::new_v4(),
            device_id: device_id.to_string(),
            author: report.author,
            context: report.context,
            timestamp: Utc::now(),
            content: report.content,
            matches: report.matches,
            severity: report.severity,
            suspicious: report.suspicious,
        };
        let ts = event.timestamp;
        let severity = event.severity;
        let agg = self.store.append_compliance(event)?;
        self.store.append_log(
            "warn",
            "compliance event",
            json!({ "deviceId": device_id, "severity": severity, "count": agg.count }),
        );
        if let Some(tenant) = self.store.device_tenant(device_id) {
            self.sessions.broadcast_admins(
                tenant,
                &AdminEvent::ComplianceEvent {
                    device_id: device_id.to_string(),
                    count: agg.count,
                    severity,
                    ts,
                },
            );
        }
        Ok(agg)
    }
}
