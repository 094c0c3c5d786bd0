/// Connection liveness and ingress abuse tracking
///
/// Uses tokio's clock so heartbeat behaviour is testable with paused time.
use std::time::Duration;
use tokio::time::Instant;

// ============================================================================
// HEARTBEAT
// ============================================================================

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Server ping period
    pub heartbeat_interval: Duration,
    /// Consecutive unanswered pings before the client is dropped
    pub max_missed_pongs: u32,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(30),
            max_missed_pongs: 3,
        }
    }
}

/// Connection health state
#[derive(Debug)]
pub struct ConnectionHealth {
    last_activity: Instant,
    last_pong: Option<Instant>,
    /// Pings sent since the last pong
    outstanding_pings: u32,
    config: HealthConfig,
}

impl ConnectionHealth {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            last_activity: Instant::now(),
            last_pong: None,
            outstanding_pings: 0,
            config,
        }
    }

    /// Record client activity (any frame received)
    pub fn record_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn record_ping(&mut self) {
        self.outstanding_pings += 1;
    }

    pub fn record_pong(&mut self) {
        let now = Instant::now();
        self.last_pong = Some(now);
        self.last_activity = now;
        self.outstanding_pings = 0;
    }

    pub fn missed_pongs(&self) -> u32 {
        self.outstanding_pings
    }

    /// True once `max_missed_pongs` pings went unanswered
    pub fn is_timed_out(&self) -> bool {
        self.outstanding_pings >= self.config.max_missed_pongs
    }

    pub fn since_activity(&self) -> Duration {
        self.last_activity.elapsed()
    }

    pub fn heartbeat_interval(&self) -> Duration {
        self.config.heartbeat_interval
    }
}

// ============================================================================
// INGRESS BUDGET
// ============================================================================

/// Fixed one-minute window counter for malformed client frames
#[derive(Debug)]
pub struct IngressBudget {
    window_start: Instant,
    window: Duration,
    errors: u32,
    max_errors: u32,
}

impl IngressBudget {
    pub fn per_minute(max_errors: u32) -> Self {
        Self {
            window_start: Instant::now(),
            window: Duration::from_secs(60),
            errors: 0,
            max_errors,
        }
    }

    /// Count one error; true when the budget for this window is exceeded
    pub fn record_error(&mut self) -> bool {
        let now = Instant::now();
        if now.duration_since(self.window_start) >= self.window {
            self.window_start = now;
            self.errors = 0;
        }
        self.errors += 1;
        self.errors > self.max_errors
    }

    pub fn errors_in_window(&self) -> u32 {
        self.errors
    }
}
