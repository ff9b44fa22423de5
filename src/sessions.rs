//! Live admin and agent session registry.
//!
//! Every session owns a bounded outbound mailbox drained by a single
//! writer task, so any component may send to any session without
//! touching the socket. A full or closed mailbox closes that session;
//! nothing else is affected.

use axum::extract::ws::{Message, Utf8Bytes};
use dashmap::DashMap;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::models::{AdminEvent, Tenant, TenantScope};
use crate::policy;

pub const MAILBOX_CAPACITY: usize = 256;

pub type OutboundTx = mpsc::Sender<Message>;

pub struct AdminSession {
    pub id: Uuid,
    pub username: String,
    pub scope: TenantScope,
    pub tx: OutboundTx,
}

pub struct AgentSession {
    pub session_id: Uuid,
    pub device_id: String,
    pub tenant: Tenant,
    pub agent_version: Option<String>,
    pub tx: OutboundTx,
}

pub struct SessionRegistry {
    admins: DashMap<Uuid, AdminSession>,
    agents: DashMap<String, AgentSession>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        SessionRegistry {
            admins: DashMap::new(),
            agents: DashMap::new(),
        }
    }

    // ── Admins ───────────────────────────────────────────

    pub fn insert_admin(&self, session: AdminSession) {
        self.admins.insert(session.id, session);
    }

    pub fn remove_admin(&self, id: Uuid) {
        self.admins.remove(&id);
    }

    pub fn admin_count(&self) -> usize {
        self.admins.len()
    }

    /// Push an event to every admin whose scope covers `tenant`.
    /// Sessions whose mailbox is full or gone are dropped; broadcast
    /// failures are never retried and never fatal.
    pub fn broadcast_admins(&self, tenant: Tenant, event: &AdminEvent) {
        let text: Utf8Bytes = match serde_json::to_string(event) {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::warn!("Failed to encode admin event: {e}");
                return;
            }
        };
        let mut dead = Vec::new();
        for session in self.admins.iter() {
            if !policy::can_access_tenant(&session.scope, tenant) {
                continue;
            }
            if session.tx.try_send(Message::Text(text.clone())).is_err() {
                dead.push(session.id);
            }
        }
        for id in dead {
            tracing::warn!("Dropping admin session {id}: outbound mailbox stalled");
            self.admins.remove(&id);
        }
    }

    // ── Agents ───────────────────────────────────────────

    /// Remove and return the current session for a device so the caller
    /// can force-close it before inserting a replacement.
    pub fn supplant_agent(&self, device_id: &str) -> Option<AgentSession> {
        self.agents.remove(device_id).map(|(_, session)| session)
    }

    pub fn insert_agent(&self, session: AgentSession) {
        self.agents.insert(session.device_id.clone(), session);
    }

    /// Remove the device's session only if it is still the given one;
    /// a supplanted session's cleanup must not evict its replacement.
    pub fn remove_agent(&self, device_id: &str, session_id: Uuid) -> bool {
        self.agents
            .remove_if(device_id, |_, s| s.session_id == session_id)
            .is_some()
    }

    pub fn agent_connected(&self, device_id: &str) -> bool {
        self.agents.contains_key(device_id)
    }

    pub fn agent_session_is(&self, device_id: &str, session_id: Uuid) -> bool {
        self.agents
            .get(device_id)
            .map(|s| s.session_id == session_id)
            .unwrap_or(false)
    }

    /// Send one message to a device's agent. Returns false if there is
    /// no session or the mailbox rejected the message, in which case the
    /// session is evicted.
    pub fn send_to_agent(&self, device_id: &str, msg: Message) -> bool {
        let (tx, session_id) = match self.agents.get(device_id) {
            Some(s) => (s.tx.clone(), s.session_id),
            None => return false,
        };
        match tx.try_send(msg) {
            Ok(()) => true,
            Err(_) => {
                tracing::warn!("Dropping agent session for {device_id}: outbound mailbox stalled");
                self.agents.remove_if(device_id, |_, s| s.session_id == session_id);
                false
            }
        }
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
