/// Environment loading and validation
///
/// Values come from the process environment, optionally seeded from a `.env`
/// file. Durations use humantime syntax (`100ms`, `5s`, `5m`).
use super::schemas::FabricConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// An environment variable that could not be applied
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid value {value:?} for {key}: {reason}")]
pub struct ConfigError {
    pub key: String,
    pub value: String,
    pub reason: String,
}

impl ConfigError {
    fn new(key: &str, value: impl fmt::Display, reason: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }
}

/// Variable lookup; swapped out in tests
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads the real process environment
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl<F> EnvSource for F
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        self(key)
    }
}

/// Load `.env` (if present) and build the configuration from the environment
pub fn load_config() -> Result<FabricConfig, ConfigError> {
    // A missing .env is the normal case in production.
    let _ = dotenv::dotenv();
    let config = load_config_from(&ProcessEnv)?;
    config.validate()?;
    Ok(config)
}

/// Build the configuration from an arbitrary variable source
pub fn load_config_from(env: &dyn EnvSource) -> Result<FabricConfig, ConfigError> {
    let mut config = FabricConfig::default();
    config.server.apply_env(env)?;
    config.bridge.apply_env(env)?;
    config.bus.apply_env(env)?;
    config.presence.apply_env(env)?;
    config.db.apply_env(env)?;

    if let Some(url) = non_empty(env, "DB_URL") {
        url::Url::parse(&url).map_err(|e| {
            ConfigError::new("DB_URL", crate::db::redact_url(&url), e.to_string())
        })?;
    }

    Ok(config)
}

impl FabricConfig {
    /// Reject settings that would make a component spin or drop everything
    pub fn validate(&self) -> Result<(), ConfigError> {
        let durations = [
            ("SHUTDOWN_TIMEOUT", self.server.shutdown_timeout),
            ("WS_HEARTBEAT_INTERVAL", self.bridge.heartbeat_interval),
            ("PRESENCE_CLEANUP_INTERVAL", self.presence.cleanup_interval),
            ("PRESENCE_STALE_THRESHOLD", self.presence.stale_threshold),
            ("DB_QUERY_TIMEOUT", self.db.query_timeout),
            ("DB_EXECUTE_TIMEOUT", self.db.execute_timeout),
            ("DB_HEALTH_INTERVAL", self.db.health_interval),
        ];
        for (key, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::new(
                    key,
                    humantime::format_duration(value),
                    "must be greater than zero",
                ));
            }
        }

        let sizes = [
            ("WS_EGRESS_QUEUE", self.bridge.egress_queue_capacity),
            ("BUS_QUEUE_CAPACITY", self.bus.queue_capacity),
            (
                "WS_MAX_INGRESS_ERRORS",
                self.bridge.max_ingress_errors_per_minute as usize,
            ),
        ];
        for (key, value) in sizes {
            if value == 0 {
                return Err(ConfigError::new(key, value, "must be greater than zero"));
            }
        }

        Ok(())
    }
}

fn non_empty(env: &dyn EnvSource, key: &str) -> Option<String> {
    env.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Parsing of a single environment value into a config field type
pub trait FromEnv: Sized {
    fn parse_env(value: &str) -> Result<Self, String>;
}

impl FromEnv for String {
    fn parse_env(value: &str) -> Result<Self, String> {
        Ok(value.to_string())
    }
}

impl FromEnv for Duration {
    fn parse_env(value: &str) -> Result<Self, String> {
        humantime::parse_duration(value).map_err(|e| e.to_string())
    }
}

impl FromEnv for bool {
    fn parse_env(value: &str) -> Result<Self, String> {
        match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err("expected true or false".to_string()),
        }
    }
}

macro_rules! from_env_via_from_str {
    ($($ty:ty),*) => {
        $(
            impl FromEnv for $ty {
                fn parse_env(value: &str) -> Result<Self, String> {
                    value.parse().map_err(|e: <$ty as FromStr>::Err| e.to_string())
                }
            }
        )*
    };
}

from_env_via_from_str!(u16, u32, u64, usize);

/// Override `target` from `key` when the variable is set and not blank
pub fn apply_env_value<T: FromEnv>(
    env: &dyn EnvSource,
    key: &str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(value) = non_empty(env, key) {
        *target = T::parse_env(&value).map_err(|reason| ConfigError::new(key, &value, reason))?;
    }
    Ok(())
}
