/// Configuration schemas - all config structures defined once with defaults
///
/// Each section is a `config_struct!`: field, default, and the environment
/// variable that overrides it, declared together.
use crate::config_struct;
use std::time::Duration;

// ============================================================================
// SERVER CONFIGURATION
// ============================================================================

config_struct! {
    /// HTTP host for the two WebSocket endpoints
    pub struct ServerConfig {
        host: String = "127.0.0.1".to_string() => "SERVER_HOST",
        port: u16 = 8080 => "SERVER_PORT",
        /// Single deadline for the whole hierarchical shutdown
        shutdown_timeout: Duration = Duration::from_secs(15) => "SHUTDOWN_TIMEOUT",
        /// Take user ids from the `x-user-id` header or `user` query parameter.
        /// Clients can claim any identity, so this is for development only.
        trust_client_identity: bool = false => "WS_TRUST_CLIENT_IDENTITY",
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// BRIDGE CONFIGURATION
// ============================================================================

config_struct! {
    /// Per-client policy shared by the html and data bridges
    pub struct BridgeConfig {
        heartbeat_interval: Duration = Duration::from_secs(30) => "WS_HEARTBEAT_INTERVAL",
        /// Pongs missed in a row before the connection is closed
        max_missed_pongs: u32 = 3,
        egress_queue_capacity: usize = 256 => "WS_EGRESS_QUEUE",
        /// Malformed frames tolerated per minute before disconnecting
        max_ingress_errors_per_minute: u32 = 10 => "WS_MAX_INGRESS_ERRORS",
        /// Close frame write deadline during shutdown
        close_timeout: Duration = Duration::from_secs(2),
    }
}

// ============================================================================
// BUS CONFIGURATION
// ============================================================================

config_struct! {
    pub struct BusConfig {
        /// Bounded delivery queue per subscriber
        queue_capacity: usize = 1024 => "BUS_QUEUE_CAPACITY",
    }
}

// ============================================================================
// PRESENCE CONFIGURATION
// ============================================================================

config_struct! {
    pub struct PresenceConfig {
        offline_debounce: Duration = Duration::from_secs(5) => "PRESENCE_OFFLINE_DEBOUNCE",
        stale_threshold: Duration = Duration::from_secs(300) => "PRESENCE_STALE_THRESHOLD",
        cleanup_interval: Duration = Duration::from_secs(30) => "PRESENCE_CLEANUP_INTERVAL",
        rate_limit: Duration = Duration::from_secs(1) => "PRESENCE_RATE_LIMIT",
    }
}

// ============================================================================
// DATABASE CONFIGURATION
// ============================================================================

config_struct! {
    pub struct DbConfig {
        /// Empty disables the database layer
        url: String = String::new() => "DB_URL",
        namespace: String = "app".to_string() => "DB_NS",
        database: String = "app".to_string() => "DB_DB",
        username: String = String::new() => "DB_USER",
        password: String = String::new() => "DB_PASS",
        query_timeout: Duration = Duration::from_secs(5) => "DB_QUERY_TIMEOUT",
        execute_timeout: Duration = Duration::from_secs(15) => "DB_EXECUTE_TIMEOUT",
        health_interval: Duration = Duration::from_secs(30) => "DB_HEALTH_INTERVAL",
    }
}

impl DbConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

// ============================================================================
// ROOT CONFIGURATION
// ============================================================================

config_struct! {
    /// Root configuration for the realtime fabric
    pub struct FabricConfig {
        server: ServerConfig = ServerConfig::default(),
        bridge: BridgeConfig = BridgeConfig::default(),
        bus: BusConfig = BusConfig::default(),
        presence: PresenceConfig = PresenceConfig::default(),
        db: DbConfig = DbConfig::default(),
    }
}
