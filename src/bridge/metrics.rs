use serde::Serialize;
/// Bridge metrics collection
///
/// Per-client and per-bridge counters for monitoring and debugging.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

// ============================================================================
// CLIENT METRICS
// ============================================================================

/// Per-client metrics (thread-safe)
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Frames written to the socket
    messages_sent: AtomicU64,

    /// Frames evicted from a full egress queue
    messages_dropped: AtomicU64,

    /// Malformed or rejected inbound frames
    ingress_errors: AtomicU64,

    /// Current queue size
    queue_size: AtomicUsize,

    /// Peak queue size
    peak_queue_size: AtomicUsize,
}

impl ClientMetrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn inc_sent(&self) {
        self.messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_ingress_errors(&self) {
        self.ingress_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Update queue size and peak
    pub fn set_queue_size(&self, size: usize) {
        self.queue_size.store(size, Ordering::Relaxed);
        self.peak_queue_size.fetch_max(size, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ClientMetricsSnapshot {
        ClientMetricsSnapshot {
            messages_sent: self.messages_sent.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            ingress_errors: self.ingress_errors.load(Ordering::Relaxed),
            queue_size: self.queue_size.load(Ordering::Relaxed),
            peak_queue_size: self.peak_queue_size.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot (serializable)
#[derive(Debug, Clone, Default, Serialize)]
pub struct ClientMetricsSnapshot {
    pub messages_sent: u64,
    pub messages_dropped: u64,
    pub ingress_errors: u64,
    pub queue_size: usize,
    pub peak_queue_size: usize,
}

// ============================================================================
// BRIDGE METRICS
// ============================================================================

/// Bridge-level metrics (aggregate across all clients)
#[derive(Debug, Default)]
pub struct BridgeMetrics {
    total_connections: AtomicU64,
    active_connections: AtomicUsize,
    total_messages_sent: AtomicU64,
    total_messages_dropped: AtomicU64,
    total_ingress_errors: AtomicU64,
    /// Client `publish` frames forwarded to the bus
    inbound_published: AtomicU64,
    heartbeat_timeouts: AtomicU64,
}

impl BridgeMetrics {
    pub fn connection_opened(&self) {
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn message_sent(&self) {
        self.total_messages_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn message_dropped(&self) {
        self.total_messages_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn ingress_error(&self) {
        self.total_ingress_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inbound_published(&self) {
        self.inbound_published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn heartbeat_timeout(&self) {
        self.heartbeat_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BridgeMetricsSnapshot {
        BridgeMetricsSnapshot {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            total_messages_sent: self.total_messages_sent.load(Ordering::Relaxed),
            total_messages_dropped: self.total_messages_dropped.load(Ordering::Relaxed),
            total_ingress_errors: self.total_ingress_errors.load(Ordering::Relaxed),
            inbound_published: self.inbound_published.load(Ordering::Relaxed),
            heartbeat_timeouts: self.heartbeat_timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Bridge metrics snapshot
#[derive(Debug, Clone, Default, Serialize)]
pub struct BridgeMetricsSnapshot {
    pub total_connections: u64,
    pub active_connections: usize,
    pub total_messages_sent: u64,
    pub total_messages_dropped: u64,
    pub total_ingress_errors: u64,
    pub inbound_published: u64,
    pub heartbeat_timeouts: u64,
}
