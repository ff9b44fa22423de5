//! In-memory registry of devices, aliases, compliance events and the
//! operational log ring, with JSON file persistence for the first two.
//!
//! Alias and compliance mutations rewrite their whole file through a
//! write-to-temp-then-rename; a failed write rolls the in-memory state
//! back so callers never observe a half-applied mutation.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::{fs, io};

use chrono::Utc;
use dashmap::DashMap;
use thiserror::Error;

use crate::models::{
    AliasEntry, ComplianceAggregate, ComplianceEvent, Device, LogEntry, Tenant,
};

const ALIAS_FILE: &str = "device-aliases.json";
const COMPLIANCE_FILE: &str = "compliance-events.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("device {device} is bound to tenant {bound}, refusing {requested}")]
    TenantMismatch {
        device: String,
        bound: Tenant,
        requested: Tenant,
    },
    #[error("failed to persist {file}: {source}")]
    Persist {
        file: &'static str,
        #[source]
        source: io::Error,
    },
}

#[derive(Default)]
struct ComplianceState {
    events: Vec<ComplianceEvent>,
    aggregates: HashMap<String, ComplianceAggregate>,
}

pub struct Store {
    data_dir: PathBuf,
    devices: DashMap<String, Device>,
    aliases: Mutex<HashMap<String, AliasEntry>>,
    compliance: Mutex<ComplianceState>,
    logs: Mutex<VecDeque<LogEntry>>,
    log_capacity: usize,
}

impl Store {
    /// Open the store, creating `data_dir` if needed and replaying the
    /// alias and compliance files. Unreadable files start empty with a
    /// warning, matching how the config loader treats a bad file.
    pub fn open(data_dir: impl AsRef<Path>, log_capacity: usize) -> io::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        fs::create_dir_all(&data_dir)?;

        let aliases: HashMap<String, AliasEntry> =
            load_json(&data_dir.join(ALIAS_FILE)).unwrap_or_default();
        let events: Vec<ComplianceEvent> =
            load_json(&data_dir.join(COMPLIANCE_FILE)).unwrap_or_default();

        let mut aggregates: HashMap<String, ComplianceAggregate> = HashMap::new();
        for evt in &events {
            apply_to_aggregate(aggregates.entry(evt.device_id.clone()).or_default(), evt);
        }
        if !events.is_empty() {
            tracing::info!(
                "Replayed {} compliance events for {} devices",
                events.len(),
                aggregates.len()
            );
        }

        Ok(Store {
            data_dir,
            devices: DashMap::new(),
            aliases: Mutex::new(aliases),
            compliance: Mutex::new(ComplianceState { events, aggregates }),
            logs: Mutex::new(VecDeque::new()),
            log_capacity,
        })
    }

    // ── Devices ──────────────────────────────────────────

    /// Upsert a device for an incoming agent connection and resolve its
    /// tenant. The first valid connection pins the tenant; a later
    /// connection asserting a different one is refused.
    pub fn bind_agent_device(
        &self,
        id: &str,
        requested: Option<Tenant>,
        default: Tenant,
    ) -> Result<Tenant, StoreError> {
        let mut entry = self
            .devices
            .entry(id.to_string())
            .or_insert_with(|| Device::new(id));
        match (entry.tenant, requested) {
            (None, Some(t)) => {
                entry.tenant = Some(t);
                Ok(t)
            }
            (None, None) => {
                entry.tenant = Some(default);
                Ok(default)
            }
            (Some(bound), Some(t)) if t != bound => Err(StoreError::TenantMismatch {
                device: id.to_string(),
                bound,
                requested: t,
            }),
            (Some(bound), _) => Ok(bound),
        }
    }

    pub fn device(&self, id: &str) -> Option<Device> {
        self.devices.get(id).map(|d| d.clone())
    }

    pub fn device_tenant(&self, id: &str) -> Option<Tenant> {
        self.devices.get(id).and_then(|d| d.tenant)
    }

    pub fn devices_snapshot(&self) -> Vec<Device> {
        self.devices.iter().map(|d| d.clone()).collect()
    }

    /// `last_seen` of `None` leaves the existing timestamp in place.
    pub fn set_connected(&self, id: &str, connected: bool, last_seen_ms: Option<i64>) {
        let mut entry = self
            .devices
            .entry(id.to_string())
            .or_insert_with(|| Device::new(id));
        entry.connected = connected;
        if let Some(ts) = last_seen_ms {
            entry.last_seen_ms = Some(entry.last_seen_ms.map_or(ts, |old| old.max(ts)));
        }
    }

    pub fn set_agent_version(&self, id: &str, version: Option<String>) {
        if let Some(mut d) = self.devices.get_mut(id) {
            d.agent_version = version;
        }
    }

    /// Refresh liveness from agent traffic. Returns true when the device
    /// transitioned back from offline so the caller can re-broadcast.
    pub fn touch(&self, id: &str, now_ms: i64) -> bool {
        let mut entry = self
            .devices
            .entry(id.to_string())
            .or_insert_with(|| Device::new(id));
        entry.last_seen_ms = Some(entry.last_seen_ms.map_or(now_ms, |old| old.max(now_ms)));
        let came_online = !entry.connected;
        entry.connected = true;
        came_online
    }

    // ── Aliases ──────────────────────────────────────────

    pub fn get_alias(&self, id: &str) -> Option<AliasEntry> {
        self.lock_aliases().get(id).cloned()
    }

    pub fn list_aliases(&self) -> HashMap<String, AliasEntry> {
        self.lock_aliases().clone()
    }

    /// An empty label deletes the entry. Returns the stored entry, or
    /// `None` after a delete.
    pub fn put_alias(&self, id: &str, label: &str) -> Result<Option<AliasEntry>, StoreError> {
        let mut map = self.lock_aliases();
        let previous = map.clone();
        let stored = if label.is_empty() {
            map.remove(id);
            None
        } else {
            let entry = AliasEntry {
                label: label.to_string(),
                updated_at: Utc::now(),
            };
            map.insert(id.to_string(), entry.clone());
            Some(entry)
        };
        if let Err(source) = write_atomic(&self.data_dir.join(ALIAS_FILE), &*map) {
            *map = previous;
            return Err(StoreError::Persist {
                file: ALIAS_FILE,
                source,
            });
        }
        Ok(stored)
    }

    // ── Compliance ───────────────────────────────────────

    /// Append an event and update the device aggregate. The device is
    /// upserted if it has never connected.
    pub fn append_compliance(
        &self,
        evt: ComplianceEvent,
    ) -> Result<ComplianceAggregate, StoreError> {
        self.devices
            .entry(evt.device_id.clone())
            .or_insert_with(|| Device::new(&evt.device_id));

        let mut state = self.lock_compliance();
        let previous_agg = state.aggregates.get(&evt.device_id).cloned();
        let device_id = evt.device_id.clone();
        apply_to_aggregate(state.aggregates.entry(device_id.clone()).or_default(), &evt);
        state.events.push(evt);

        if let Err(source) = write_atomic(&self.data_dir.join(COMPLIANCE_FILE), &state.events) {
            state.events.pop();
            match previous_agg {
                Some(agg) => state.aggregates.insert(device_id, agg),
                None => state.aggregates.remove(&device_id),
            };
            return Err(StoreError::Persist {
                file: COMPLIANCE_FILE,
                source,
            });
        }
        Ok(state.aggregates[&device_id].clone())
    }

    /// Events, newest first, optionally restricted to one device.
    pub fn list_compliance(&self, device_id: Option<&str>) -> Vec<ComplianceEvent> {
        let state = self.lock_compliance();
        let mut events: Vec<ComplianceEvent> = state
            .events
            .iter()
            .filter(|e| device_id.map_or(true, |id| e.device_id == id))
            .cloned()
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events
    }

    pub fn aggregate(&self, device_id: &str) -> Option<ComplianceAggregate> {
        self.lock_compliance().aggregates.get(device_id).cloned()
    }

    // ── Operational log ring ─────────────────────────────

    pub fn append_log(&self, level: &str, msg: &str, meta: serde_json::Value) {
        let mut logs = self.lock_logs();
        logs.push_back(LogEntry {
            ts: Utc::now(),
            level: level.to_string(),
            msg: msg.to_string(),
            meta,
        });
        while logs.len() > self.log_capacity {
            logs.pop_front();
        }
    }

    /// Newest first.
    pub fn logs(&self) -> Vec<LogEntry> {
        self.lock_logs().iter().rev().cloned().collect()
    }

    // a poisoned lock still holds consistent data: mutations roll back
    // before the error propagates
    fn lock_aliases(&self) -> MutexGuard<'_, HashMap<String, AliasEntry>> {
        self.aliases.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_compliance(&self) -> MutexGuard<'_, ComplianceState> {
        self.compliance.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_logs(&self) -> MutexGuard<'_, VecDeque<LogEntry>> {
        self.logs.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn apply_to_aggregate(agg: &mut ComplianceAggregate, evt: &ComplianceEvent) {
    agg.count += 1;
    agg.last_at = Some(evt.timestamp);
    agg.last_severity = evt.severity;
}

fn load_json<T: serde::de::DeserializeOwned>(path: &Path) -> Option<T> {
    let content = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&content) {
        Ok(v) => Some(v),
        Err(e) => {
            tracing::warn!("Failed to parse {}: {e}, starting empty", path.display());
            None
        }
    }
}

fn write_atomic<T: serde::Serialize>(path: &Path, value: &T) -> io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, &json)?;
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use uuid::Uuid;

    fn event(device: &str, severity: Option<Severity>) -> ComplianceEvent {
        ComplianceEvent {
            id: Uuid::new_v4(),
            device_id: device.to_string(),
            author: "scanner".into(),
            context: "chat".into(),
            timestamp: Utc::now(),
            content: "flagged".into(),
            matches: vec!["bad".into()],
            severity,
            suspicious: severity == Some(Severity::High),
        }
    }

    #[test]
    fn alias_survives_reopen_and_empty_label_deletes() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path(), 10).unwrap();
            store.put_alias("dev-1", "Front desk").unwrap();
        }
        {
            let store = Store::open(dir.path(), 10).unwrap();
            assert_eq!(store.get_alias("dev-1").unwrap().label, "Front desk");
            store.put_alias("dev-1", "").unwrap();
            assert!(store.get_alias("dev-1").is_none());
        }
        let store = Store::open(dir.path(), 10).unwrap();
        assert!(store.get_alias("dev-1").is_none());
        assert!(!dir.path().join("device-aliases.json.tmp").exists());
    }

    #[test]
    fn alias_put_is_idempotent_modulo_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        let first = store.put_alias("dev-1", "Kiosk").unwrap().unwrap();
        let second = store.put_alias("dev-1", "Kiosk").unwrap().unwrap();
        assert_eq!(first.label, second.label);
        assert!(second.updated_at >= first.updated_at);
        assert_eq!(store.list_aliases().len(), 1);
    }

    #[test]
    fn alias_rolls_back_when_the_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store.put_alias("dev-1", "Original").unwrap();
        fs::remove_dir_all(dir.path()).unwrap();
        assert!(store.put_alias("dev-1", "Changed").is_err());
        assert_eq!(store.get_alias("dev-1").unwrap().label, "Original");
    }

    #[test]
    fn compliance_replay_rebuilds_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = Store::open(dir.path(), 10).unwrap();
            store.append_compliance(event("dev-1", Some(Severity::Low))).unwrap();
            store.append_compliance(event("dev-1", Some(Severity::High))).unwrap();
            store.append_compliance(event("dev-2", None)).unwrap();
        }
        let store = Store::open(dir.path(), 10).unwrap();
        let agg = store.aggregate("dev-1").unwrap();
        assert_eq!(agg.count, 2);
        assert_eq!(agg.last_severity, Some(Severity::High));
        assert_eq!(store.aggregate("dev-2").unwrap().count, 1);
        assert_eq!(store.list_compliance(None).len(), 3);
        assert_eq!(store.list_compliance(Some("dev-2")).len(), 1);
    }

    #[test]
    fn compliance_append_rolls_back_when_the_write_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store.append_compliance(event("dev-1", Some(Severity::Low))).unwrap();
        fs::remove_dir_all(dir.path()).unwrap();
        assert!(store.append_compliance(event("dev-1", Some(Severity::High))).is_err());
        let agg = store.aggregate("dev-1").unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.last_severity, Some(Severity::Low));
        assert_eq!(store.list_compliance(None).len(), 1);
    }

    #[test]
    fn compliance_listing_is_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        let mut early = event("dev-1", None);
        early.timestamp = Utc::now() - chrono::Duration::seconds(60);
        let late = event("dev-1", None);
        store.append_compliance(early.clone()).unwrap();
        store.append_compliance(late.clone()).unwrap();
        let listed = store.list_compliance(None);
        assert_eq!(listed[0].id, late.id);
        assert_eq!(listed[1].id, early.id);
    }

    #[test]
    fn tenant_pins_on_first_bind() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        assert_eq!(
            store.bind_agent_device("dev-1", None, Tenant::CLA1).unwrap(),
            Tenant::CLA1
        );
        // same tenant, and no tenant at all, both resolve to the bound one
        assert_eq!(
            store.bind_agent_device("dev-1", Some(Tenant::CLA1), Tenant::DLA1).unwrap(),
            Tenant::CLA1
        );
        assert_eq!(
            store.bind_agent_device("dev-1", None, Tenant::DLA1).unwrap(),
            Tenant::CLA1
        );
        assert!(store.bind_agent_device("dev-1", Some(Tenant::DLA2), Tenant::CLA1).is_err());
    }

    #[test]
    fn touch_is_monotonic_and_reports_resurrection() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 10).unwrap();
        store.bind_agent_device("dev-1", Some(Tenant::CLA1), Tenant::CLA1).unwrap();
        assert!(store.touch("dev-1", 1000));
        assert!(!store.touch("dev-1", 2000));
        // stale timestamps never move lastSeen backwards
        assert!(!store.touch("dev-1", 1500));
        assert_eq!(store.device("dev-1").unwrap().last_seen_ms, Some(2000));

        store.set_connected("dev-1", false, None);
        assert_eq!(store.device("dev-1").unwrap().last_seen_ms, Some(2000));
        assert!(store.touch("dev-1", 3000));
    }

    #[test]
    fn log_ring_keeps_only_the_newest() {
        let dir = tempfile::tempdir().unwrap();
        let store = Store::open(dir.path(), 3).unwrap();
        for i in 0..5 {
            store.append_log("info", &format!("entry {i}"), serde_json::json!({}));
        }
        let logs = store.logs();
        assert_eq!(logs.len(), 3);
        assert_eq!(logs[0].msg, "entry 4");
        assert_eq!(logs[2].msg, "entry 2");
    }
}
