/// Presence aggregate owned by the presence task
///
/// Pure state machine: every method takes `now` and returns the snapshots
/// that are due, so the owning task stays a thin select loop.
use super::options::PresenceOptions;
use super::snapshot::{ClientPresence, PresenceKind, PresenceSnapshot, UserPresence};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PresenceEvent {
    Ready { user_id: String, client_id: String },
    Disconnected { user_id: String, client_id: String },
    Heartbeat { user_id: String, client_id: String },
}

#[derive(Debug)]
struct ClientRecord {
    connected_at: DateTime<Utc>,
    last_heartbeat: DateTime<Utc>,
    seen: Instant,
}

#[derive(Debug, Default)]
struct UserAggregate {
    clients: HashMap<String, ClientRecord>,
    online: bool,
    pending_offline: Option<Instant>,
}

/// Per-user rate limiter state; outlives the aggregate so a quick
/// offline/online flap still respects the window
#[derive(Debug, Default)]
struct EmitState {
    last_emit: Option<Instant>,
    last_kind: Option<PresenceKind>,
    pending: bool,
}

#[derive(Debug)]
pub struct PresenceState {
    options: PresenceOptions,
    users: HashMap<String, UserAggregate>,
    emits: HashMap<String, EmitState>,
    /// Disconnects that arrived before their ready event
    tombstones: HashMap<String, Instant>,
}

impl PresenceState {
    pub fn new(options: PresenceOptions) -> Self {
        Self {
            options,
            users: HashMap::new(),
            emits: HashMap::new(),
            tombstones: HashMap::new(),
        }
    }

    /// Apply one lifecycle event and return snapshots that are due right away
    pub fn apply(&mut self, event: PresenceEvent, now: Instant) -> Vec<PresenceSnapshot> {
        match event {
            PresenceEvent::Ready { user_id, client_id } => self.on_ready(user_id, client_id, now),
            PresenceEvent::Disconnected { user_id, client_id } => {
                self.on_disconnected(&user_id, &client_id, now)
            }
            PresenceEvent::Heartbeat { user_id, client_id } => {
                self.on_heartbeat(&user_id, &client_id, now);
            }
        }
        self.poll(now)
    }

    fn on_ready(&mut self, user_id: String, client_id: String, now: Instant) {
        if self.tombstones.remove(&client_id).is_some() {
            return;
        }
        let stamp = Utc::now();
        let user = self.users.entry(user_id.clone()).or_default();
        user.clients.insert(
            client_id,
            ClientRecord {
                connected_at: stamp,
                last_heartbeat: stamp,
                seen: now,
            },
        );
        // Reconnect during the debounce window: the user never went offline.
        user.pending_offline = None;
        if !user.online {
            user.online = true;
            self.mark_dirty(&user_id);
        }
    }

    fn on_disconnected(&mut self, user_id: &str, client_id: &str, now: Instant) {
        let Some(user) = self.users.get_mut(user_id) else {
            self.tombstones.insert(client_id.to_string(), now);
            return;
        };
        if user.clients.remove(client_id).is_none() {
            self.tombstones.insert(client_id.to_string(), now);
            return;
        }
        if user.clients.is_empty() && user.pending_offline.is_none() {
            user.pending_offline = Some(now + self.options.offline_debounce);
        }
    }

    fn on_heartbeat(&mut self, user_id: &str, client_id: &str, now: Instant) {
        if let Some(record) = self
            .users
            .get_mut(user_id)
            .and_then(|user| user.clients.get_mut(client_id))
        {
            record.last_heartbeat = Utc::now();
            record.seen = now;
        }
    }

    /// Expire debounce windows and release coalesced snapshots
    pub fn poll(&mut self, now: Instant) -> Vec<PresenceSnapshot> {
        let expired: Vec<String> = self
            .users
            .iter()
            .filter(|(_, user)| {
                user.clients.is_empty() && user.pending_offline.is_some_and(|deadline| deadline <= now)
            })
            .map(|(user_id, _)| user_id.clone())
            .collect();
        for user_id in expired {
            self.users.remove(&user_id);
            self.mark_dirty(&user_id);
        }

        let window = self.options.rate_limit;
        let due: Vec<String> = self
            .emits
            .iter()
            .filter(|(_, emit)| {
                emit.pending && emit.last_emit.map_or(true, |last| last + window <= now)
            })
            .map(|(user_id, _)| user_id.clone())
            .collect();

        let mut out = Vec::new();
        for user_id in due {
            let kind = self.current_kind(&user_id);
            let Some(emit) = self.emits.get_mut(&user_id) else {
                continue;
            };
            emit.pending = false;
            // Net change cancelled out inside the window.
            if emit.last_kind == Some(kind) {
                continue;
            }
            emit.last_emit = Some(now);
            emit.last_kind = Some(kind);
            out.push(PresenceSnapshot {
                kind,
                user_id,
                users: Vec::new(),
            });
        }

        if !out.is_empty() {
            let users = self.online_users();
            for snapshot in &mut out {
                snapshot.users = users.clone();
            }
            out.sort_by(|a, b| a.user_id.cmp(&b.user_id));
        }
        out
    }

    /// Drop connections that have not been heard from within the stale threshold.
    ///
    /// Reclaimed connections go through the ordinary debounced disconnect path.
    pub fn sweep_stale(&mut self, now: Instant) -> usize {
        let stale_after = self.options.stale_threshold;
        let debounce = self.options.offline_debounce;
        let mut removed = 0;

        for user in self.users.values_mut() {
            let before = user.clients.len();
            user.clients
                .retain(|_, record| now.saturating_duration_since(record.seen) <= stale_after);
            let reclaimed = before - user.clients.len();
            if reclaimed > 0 && user.clients.is_empty() && user.pending_offline.is_none() {
                user.pending_offline = Some(now + debounce);
            }
            removed += reclaimed;
        }

        self.tombstones
            .retain(|_, at| now.saturating_duration_since(*at) <= stale_after);

        let window = self.options.rate_limit;
        let users = &self.users;
        self.emits.retain(|user_id, emit| {
            emit.pending
                || users.contains_key(user_id)
                || emit.last_emit.map_or(false, |last| last + window > now)
        });

        removed
    }

    fn mark_dirty(&mut self, user_id: &str) {
        self.emits.entry(user_id.to_string()).or_default().pending = true;
    }

    fn current_kind(&self, user_id: &str) -> PresenceKind {
        if self.is_online(user_id) {
            PresenceKind::Online
        } else {
            PresenceKind::Offline
        }
    }

    /// Earliest instant at which `poll` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        let window = self.options.rate_limit;
        let offline = self
            .users
            .values()
            .filter(|user| user.clients.is_empty())
            .filter_map(|user| user.pending_offline);
        let emits = self
            .emits
            .values()
            .filter(|emit| emit.pending)
            .map(|emit| emit.last_emit.map(|last| last + window));
        let mut earliest: Option<Instant> = None;
        for deadline in offline.chain(emits.flatten()) {
            earliest = Some(earliest.map_or(deadline, |current| current.min(deadline)));
        }
        earliest
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.users.get(user_id).is_some_and(|user| user.online)
    }

    /// Sorted ids of online users
    pub fn online_users(&self) -> Vec<String> {
        let mut users: Vec<String> = self
            .users
            .iter()
            .filter(|(_, user)| user.online)
            .map(|(user_id, _)| user_id.clone())
            .collect();
        users.sort();
        users
    }

    /// Snapshots coalesced but not yet emitted
    pub fn pending_snapshots(&self) -> usize {
        self.emits.values().filter(|emit| emit.pending).count()
    }

    pub fn view(&self) -> BTreeMap<String, UserPresence> {
        self.users
            .iter()
            .map(|(user_id, user)| {
                let mut clients: Vec<ClientPresence> = user
                    .clients
                    .iter()
                    .map(|(client_id, record)| ClientPresence {
                        client_id: client_id.clone(),
                        connected_at: record.connected_at,
                        last_heartbeat: record.last_heartbeat,
                    })
                    .collect();
                clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
                (
                    user_id.clone(),
                    UserPresence {
                        user_id: user_id.clone(),
                        online: user.online,
                        pending_offline: user.pending_offline.is_some(),
                        clients,
                    },
                )
            })
            .collect()
    }
}
