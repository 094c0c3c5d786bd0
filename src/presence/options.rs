use crate::config::PresenceConfig;
use std::time::Duration;

/// Presence timing knobs
///
/// Built from `PresenceConfig` at boot; tests tweak single values with the
/// `with_*` methods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceOptions {
    /// Grace period after a user's last connection closes
    pub offline_debounce: Duration,
    /// Maximum age of a connection record without a heartbeat
    pub stale_threshold: Duration,
    /// GC period
    pub cleanup_interval: Duration,
    /// Minimum spacing between snapshots for the same user
    pub rate_limit: Duration,
}

impl Default for PresenceOptions {
    fn default() -> Self {
        Self {
            offline_debounce: Duration::from_secs(5),
            stale_threshold: Duration::from_secs(300),
            cleanup_interval: Duration::from_secs(30),
            rate_limit: Duration::from_secs(1),
        }
    }
}

impl PresenceOptions {
    pub fn with_offline_debounce(mut self, debounce: Duration) -> Self {
        self.offline_debounce = debounce;
        self
    }

    pub fn with_stale_threshold(mut self, threshold: Duration) -> Self {
        self.stale_threshold = threshold;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_rate_limit(mut self, window: Duration) -> Self {
        self.rate_limit = window;
        self
    }
}

impl From<&PresenceConfig> for PresenceOptions {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            offline_debounce: config.offline_debounce,
            stale_threshold: config.stale_threshold,
            cleanup_interval: config.cleanup_interval,
            rate_limit: config.rate_limit,
        }
    }
}
