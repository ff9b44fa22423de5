use chrono::{DateTime, Utc};
use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

// ── Tenants ──────────────────────────────────────────────

/// Closed set of store/unit codes a device can belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tenant {
    CLA1,
    CLA2,
    DLA1,
    DLA2,
}

impl Tenant {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tenant::CLA1 => "CLA1",
            Tenant::CLA2 => "CLA2",
            Tenant::DLA1 => "DLA1",
            Tenant::DLA2 => "DLA2",
        }
    }
}

impl std::fmt::Display for Tenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownTenant(pub String);

impl std::fmt::Display for UnknownTenant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unknown tenant code: {}", self.0)
    }
}

impl std::str::FromStr for Tenant {
    type Err = UnknownTenant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CLA1" => Ok(Tenant::CLA1),
            "CLA2" => Ok(Tenant::CLA2),
            "DLA1" => Ok(Tenant::DLA1),
            "DLA2" => Ok(Tenant::DLA2),
            other => Err(UnknownTenant(other.to_string())),
        }
    }
}

/// Which tenants an admin may see: the master wildcard or an explicit set.
/// On the wire this is `["*"]` or a list of tenant codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TenantScope {
    All,
    Tenants(Vec<Tenant>),
}

impl Serialize for TenantScope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            TenantScope::All => vec!["*"].serialize(serializer),
            TenantScope::Tenants(ts) => ts.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for TenantScope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: Vec<String> = Vec::deserialize(deserializer)?;
        if raw.iter().any(|s| s == "*") {
            return Ok(TenantScope::All);
        }
        let tenants = raw
            .iter()
            .map(|s| s.parse().map_err(|e: UnknownTenant| D::Error::custom(e)))
            .collect::<Result<Vec<Tenant>, _>>()?;
        Ok(TenantScope::Tenants(tenants))
    }
}

// ── Devices ──────────────────────────────────────────────

/// A managed machine. Created on first agent contact, never destroyed;
/// `tenant` is pinned by the first valid agent connection.
#[derive(Debug, Clone)]
pub struct Device {
    pub id: String,
    pub tenant: Option<Tenant>,
    pub connected: bool,
    pub last_seen_ms: Option<i64>,
    pub agent_version: Option<String>,
}

impl Device {
    pub fn new(id: &str) -> Self {
        Device {
            id: id.to_string(),
            tenant: None,
            connected: false,
            last_seen_ms: None,
            agent_version: None,
        }
    }
}

/// Shape shared by `GET /api/devices` and the WS `devices_snapshot`.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceDto {
    pub id: String,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub name: String,
    pub tenant: Option<Tenant>,
    pub connected: bool,
    pub online: bool,
    #[serde(rename = "lastSeen")]
    pub last_seen: Option<i64>,
    #[serde(rename = "agentVersion")]
    pub agent_version: Option<String>,
    #[serde(rename = "complianceFlag")]
    pub compliance_flag: bool,
    #[serde(rename = "complianceCount")]
    pub compliance_count: u64,
    #[serde(rename = "complianceLastAt")]
    pub compliance_last_at: Option<DateTime<Utc>>,
    #[serde(rename = "complianceLastSeverity")]
    pub compliance_last_severity: Option<Severity>,
}

// ── Aliases ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasEntry {
    pub label: String,
    #[serde(rename = "updatedAt")]
    pub updated_at: DateTime<Utc>,
}

// ── Compliance ───────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceEvent {
    pub id: Uuid,
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub author: String,
    pub context: String,
    pub timestamp: DateTime<Utc>,
    pub content: String,
    #[serde(default)]
    pub matches: Vec<String>,
    pub severity: Option<Severity>,
    #[serde(default)]
    pub suspicious: bool,
}

/// Per-device rollup, rebuilt from the event log at startup.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ComplianceAggregate {
    pub count: u64,
    #[serde(rename = "lastAt")]
    pub last_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastSeverity")]
    pub last_severity: Option<Severity>,
}

// ── Operational log ──────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct LogEntry {
    pub ts: DateTime<Utc>,
    pub level: String,
    pub msg: String,
    pub meta: serde_json::Value,
}

// ── Wire: agent → server ─────────────────────────────────

/// JSON text messages an agent may send. Binary WebSocket messages are
/// whole JPEG frames and never reach this decoder.
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AgentMessage {
    #[serde(rename = "ping")]
    Ping,
    #[serde(rename = "consent_response")]
    ConsentResponse { accepted: bool },
    #[serde(rename = "frame", alias = "screen_frame")]
    Frame(FramePayload),
    #[serde(rename = "compliance_event")]
    Compliance(ComplianceReport),
}

/// Legacy JSON frame carrier. The string is raw base64 or a
/// `data:image/...;base64,` URL.
#[derive(Debug, Deserialize)]
pub struct FramePayload {
    #[serde(rename = "jpegBase64", alias = "jpeg")]
    pub jpeg_base64: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ComplianceReport {
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub context: String,
    pub content: String,
    #[serde(default)]
    pub matches: Vec<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    pub suspicious: bool,
}

// ── Wire: admin → server ─────────────────────────────────

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
pub enum AdminCommand {
    #[serde(rename = "request_remote_access")]
    RequestRemoteAccess {
        #[serde(rename = "deviceId")]
        device_id: String,
    },
}

// ── Wire: server → admin ─────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AdminEvent {
    DevicesSnapshot {
        devices: Vec<DeviceDto>,
    },
    DevicePresence {
        #[serde(rename = "deviceId")]
        device_id: String,
        online: bool,
        #[serde(rename = "lastSeen")]
        last_seen: Option<i64>,
        #[serde(rename = "agentVersion")]
        agent_version: Option<String>,
    },
    ConsentResponse {
        #[serde(rename = "deviceId")]
        device_id: String,
        accepted: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    ConsentStatus {
        #[serde(rename = "deviceId")]
        device_id: String,
        status: String,
    },
    ComplianceEvent {
        #[serde(rename = "deviceId")]
        device_id: String,
        count: u64,
        severity: Option<Severity>,
        ts: DateTime<Utc>,
    },
    Error {
        message: String,
    },
}
