/// Client sessions owned by a bridge
use super::egress::{EgressQueue, PushOutcome};
use super::frame::WsFrame;
use super::kind::EndpointKind;
use super::metrics::{ClientMetrics, ClientMetricsSnapshot};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Client ids in use across every bridge sharing this directory
#[derive(Debug, Clone, Default)]
pub struct ClientDirectory {
    ids: Arc<Mutex<HashSet<String>>>,
}

impl ClientDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `id`; false when it is already taken
    pub fn claim(&self, id: &str) -> bool {
        self.ids.lock().insert(id.to_string())
    }

    pub fn release(&self, id: &str) {
        self.ids.lock().remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.lock().contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct Client {
    pub id: String,
    pub kind: EndpointKind,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub(crate) egress: EgressQueue,
    pub(crate) metrics: Arc<ClientMetrics>,
    /// Cancelled when either the reader or the writer exits
    pub(crate) cancel: CancellationToken,
    topics: Mutex<HashSet<String>>,
    last_seen: Mutex<DateTime<Utc>>,
    closed: AtomicBool,
}

impl Client {
    pub(crate) fn new(
        id: String,
        kind: EndpointKind,
        user_id: Option<String>,
        egress_capacity: usize,
        cancel: CancellationToken,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            kind,
            user_id,
            connected_at: now,
            egress: EgressQueue::new(egress_capacity),
            metrics: ClientMetrics::new(),
            cancel,
            topics: Mutex::new(HashSet::new()),
            last_seen: Mutex::new(now),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a frame; counts an eviction as one dropped message
    pub(crate) fn enqueue(&self, frame: WsFrame) -> PushOutcome {
        let outcome = self.egress.push(frame);
        if outcome == PushOutcome::DroppedOldest {
            self.metrics.inc_dropped();
        }
        self.metrics.set_queue_size(self.egress.len());
        outcome
    }

    pub(crate) fn touch(&self) {
        *self.last_seen.lock() = Utc::now();
    }

    pub(crate) fn add_topic(&self, topic: &str) -> bool {
        self.topics.lock().insert(topic.to_string())
    }

    pub(crate) fn remove_topic(&self, topic: &str) -> bool {
        self.topics.lock().remove(topic)
    }

    pub(crate) fn take_topics(&self) -> Vec<String> {
        self.topics.lock().drain().collect()
    }

    /// First caller wins; later calls return false
    pub(crate) fn mark_closed(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics.lock().contains(topic)
    }

    pub fn matches_user(&self, user_id: &str) -> bool {
        self.user_id.as_deref() == Some(user_id)
    }

    pub fn info(&self) -> ClientInfo {
        let mut topics: Vec<String> = self.topics.lock().iter().cloned().collect();
        topics.sort();
        ClientInfo {
            client_id: self.id.clone(),
            endpoint: self.kind,
            user_id: self.user_id.clone(),
            connected_at: self.connected_at,
            last_seen: *self.last_seen.lock(),
            topics,
            metrics: self.metrics.snapshot(),
        }
    }
}

/// Serializable view of a client
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientInfo {
    pub client_id: String,
    pub endpoint: EndpointKind,
    pub user_id: Option<String>,
    pub connected_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub topics: Vec<String>,
    pub metrics: ClientMetricsSnapshot,
}
