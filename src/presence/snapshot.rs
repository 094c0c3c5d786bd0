/// Presence payloads published on `presence.user.*` and read-side views
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::topics::{PRESENCE_USER_OFFLINE, PRESENCE_USER_ONLINE};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceKind {
    Online,
    Offline,
}

impl PresenceKind {
    pub fn topic(&self) -> &'static str {
        match self {
            PresenceKind::Online => PRESENCE_USER_ONLINE,
            PresenceKind::Offline => PRESENCE_USER_OFFLINE,
        }
    }
}

/// `{type, userId, users}` with `users` sorted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    #[serde(rename = "type")]
    pub kind: PresenceKind,
    pub user_id: String,
    pub users: Vec<String>,
}

/// `{type: "status", users, counts}` published on `presence.user.status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    #[serde(rename = "type")]
    pub kind: String,
    pub users: Vec<String>,
    pub counts: BTreeMap<String, usize>,
}

impl StatusSnapshot {
    pub fn new(counts: BTreeMap<String, usize>) -> Self {
        Self {
            kind: "status".to_string(),
            users: counts.keys().cloned().collect(),
            counts,
        }
    }
}

/// One live connection of a user
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientPresence {
    pub client_id: String,
    pub connected_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
}

/// Read-side copy of one user's aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPresence {
    pub user_id: String,
    pub online: bool,
    /// True while the offline debounce window is running
    pub pending_offline: bool,
    pub clients: Vec<ClientPresence>,
}

impl UserPresence {
    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }
}
