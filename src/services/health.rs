use serde::Serialize;
use std::fmt;

/// Service health status
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "detail", rename_all = "lowercase")]
pub enum ServiceHealth {
    /// Service is operating normally
    Healthy,

    /// Service is operating but with degraded performance
    Degraded(String),

    /// Service has failed
    Unhealthy(String),

    /// Service is registered but not started
    Starting,

    /// Service is shutting down
    Stopping,
}

impl ServiceHealth {
    pub fn is_healthy(&self) -> bool {
        matches!(self, ServiceHealth::Healthy)
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, ServiceHealth::Degraded(_))
    }

    pub fn is_unhealthy(&self) -> bool {
        matches!(self, ServiceHealth::Unhealthy(_))
    }
}

impl fmt::Display for ServiceHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceHealth::Healthy => f.write_str("healthy"),
            ServiceHealth::Degraded(detail) => write!(f, "degraded ({})", detail),
            ServiceHealth::Unhealthy(detail) => write!(f, "unhealthy ({})", detail),
            ServiceHealth::Starting => f.write_str("starting"),
            ServiceHealth::Stopping => f.write_str("stopping"),
        }
    }
}
