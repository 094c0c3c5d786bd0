/// Bus-level counters
use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct BusMetrics {
    published: AtomicU64,
    delivered: AtomicU64,
    /// Messages lost to a full subscriber queue
    dropped: AtomicU64,
    active_subscribers: AtomicUsize,
}

impl BusMetrics {
    pub fn inc_published(&self) {
        self.published.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_delivered(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_added(&self) {
        self.active_subscribers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_removed(&self) {
        self.active_subscribers.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> BusStats {
        BusStats {
            published: self.published.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            active_subscribers: self.active_subscribers.load(Ordering::Relaxed),
        }
    }
}

/// Metrics snapshot (serializable)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStats {
    pub published: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub active_subscribers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bus_metrics() {
        let metrics = BusMetrics::default();
        metrics.inc_published();
        metrics.inc_delivered();
        metrics.inc_delivered();
        metrics.inc_dropped();
        metrics.subscriber_added();
        metrics.subscriber_added();
        metrics.subscriber_removed();

        assert_eq!(
            metrics.snapshot(),
            BusStats {
                published: 1,
                delivered: 2,
                dropped: 1,
                active_subscribers: 1,
            }
        );
    }
}
