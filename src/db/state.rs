use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

/// Connection state machine of the reliable client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    /// Signed in and namespace selected, first health ping pending
    Authenticated,
    Healthy,
    /// Last health ping failed; reconnection is scheduled
    Degraded,
    Closed,
}

impl ConnectionState {
    /// States in which calls are attempted on the current connection
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            ConnectionState::Authenticated | ConnectionState::Healthy | ConnectionState::Degraded
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Authenticated => "authenticated",
            ConnectionState::Healthy => "healthy",
            ConnectionState::Degraded => "degraded",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Health record exposed on `/health`
#[derive(Debug, Clone, Serialize)]
pub struct DbHealth {
    pub state: ConnectionState,
    pub url: String,
    pub latency_ms: Option<u64>,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub reconnects: u64,
    pub last_error: Option<String>,
}

impl DbHealth {
    pub fn new(redacted_url: String) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            url: redacted_url,
            latency_ms: None,
            last_check: None,
            last_success: None,
            consecutive_failures: 0,
            reconnects: 0,
            last_error: None,
        }
    }

    pub(crate) fn record_success(&mut self, latency_ms: u64) {
        let now = Utc::now();
        self.state = ConnectionState::Healthy;
        self.latency_ms = Some(latency_ms);
        self.last_check = Some(now);
        self.last_success = Some(now);
        self.consecutive_failures = 0;
        self.last_error = None;
    }

    pub(crate) fn record_failure(&mut self, state: ConnectionState, error: &str) {
        self.state = state;
        self.last_check = Some(Utc::now());
        self.consecutive_failures += 1;
        self.last_error = Some(error.to_string());
    }
}
