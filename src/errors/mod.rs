/// Structured error types for the realtime fabric
///
/// One enum per component; `FabricError` aggregates them for the boot path.
use crate::config::ConfigError;
use thiserror::Error;

// =============================================================================
// TOPIC REGISTRY
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("invalid topic name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    #[error("topic {name} is already registered")]
    AlreadyRegistered { name: String },

    #[error("topic {name} is not registered")]
    NotRegistered { name: String },

    #[error("module {module:?} may not {role} topic {name}: {reason}")]
    AccessDenied {
        name: String,
        module: String,
        role: String,
        reason: String,
    },
}

impl RegistryError {
    pub fn invalid_name(name: impl Into<String>, reason: impl Into<String>) -> Self {
        RegistryError::InvalidName {
            name: name.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// PUBSUB BUS
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusError {
    #[error("invalid topic {topic:?}: {reason}")]
    InvalidTopic { topic: String, reason: String },

    #[error("subscriber queue for {topic} is full")]
    QueueFull { topic: String },

    #[error("subscriber for {topic} is gone")]
    SubscriberGone { topic: String },

    #[error("subscription cancelled")]
    Cancelled,

    #[error("bus failure: {reason}")]
    Fatal { reason: String },
}

impl From<RegistryError> for BusError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::InvalidName { name, reason } => BusError::InvalidTopic {
                topic: name,
                reason,
            },
            other => BusError::InvalidTopic {
                topic: String::new(),
                reason: other.to_string(),
            },
        }
    }
}

// =============================================================================
// WEBSOCKET BRIDGE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    #[error("malformed frame: {reason}")]
    MalformedFrame { reason: String },

    #[error("unknown action {action:?}")]
    UnknownAction { action: String },

    #[error("unknown topic {topic:?}")]
    UnknownTopic { topic: String },

    #[error("client {client_id} exceeded {errors} ingress errors per minute")]
    IngressOverload { client_id: String, errors: u32 },

    #[error("egress queue of client {client_id} overflowed")]
    EgressDropped { client_id: String },

    #[error("client {client_id} missed {missed} pongs")]
    HeartbeatTimeout { client_id: String, missed: u32 },

    #[error("bridge is shutting down")]
    ShuttingDown,

    #[error("client id {client_id} is already connected")]
    DuplicateClient { client_id: String },

    #[error("transport error: {message}")]
    Transport { message: String },

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Bus(#[from] BusError),
}

impl BridgeError {
    pub fn transport(message: impl std::fmt::Display) -> Self {
        BridgeError::Transport {
            message: message.to_string(),
        }
    }

    pub fn malformed(reason: impl std::fmt::Display) -> Self {
        BridgeError::MalformedFrame {
            reason: reason.to_string(),
        }
    }

    /// Errors that count against the client's ingress budget
    pub fn is_ingress_error(&self) -> bool {
        matches!(
            self,
            BridgeError::MalformedFrame { .. }
                | BridgeError::UnknownTopic { .. }
                | BridgeError::Registry(_)
        )
    }
}

// =============================================================================
// DATABASE CLIENT
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbError {
    #[error("database not connected")]
    NotConnected,

    #[error("authentication failed: {reason}")]
    AuthFailed { reason: String },

    #[error("cannot select namespace {namespace}/{database}: {reason}")]
    NamespaceFailed {
        namespace: String,
        database: String,
        reason: String,
    },

    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("gave up after {attempts} attempts: {last}")]
    RetryExhausted { attempts: u32, last: Box<DbError> },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("query failed: {message}")]
    Query { message: String },

    #[error("invalid database url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Message fragments that identify a broken transport
const CONNECTION_ERROR_MARKERS: &[&str] = &[
    "connection refused",
    "broken pipe",
    "unexpected eof",
    "connection reset",
    "connection closed",
    "connection aborted",
    "not connected",
    "connection lost",
    "context canceled",
    "use of closed network connection",
];

impl DbError {
    pub fn query(message: impl std::fmt::Display) -> Self {
        DbError::Query {
            message: message.to_string(),
        }
    }

    pub fn connection_lost(reason: impl std::fmt::Display) -> Self {
        DbError::ConnectionLost {
            reason: reason.to_string(),
        }
    }

    /// True when a forced reconnect may fix the failure
    pub fn is_connection_error(&self) -> bool {
        match self {
            DbError::NotConnected | DbError::ConnectionLost { .. } => true,
            DbError::Query { message } => is_connection_message(message),
            _ => false,
        }
    }
}

/// Classify a raw driver message as a transport failure
pub fn is_connection_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    CONNECTION_ERROR_MARKERS
        .iter()
        .any(|marker| lower.contains(marker))
}

// =============================================================================
// LIVE QUERY SERVICE
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiveQueryError {
    #[error("unexpected live query result: {shape}")]
    UnexpectedResult { shape: String },

    #[error("kill of live query {live_id} failed: {reason}")]
    KillFailed { live_id: String, reason: String },

    #[error("handler for subscription {sub_id} panicked: {message}")]
    HandlerPanic { sub_id: String, message: String },

    #[error("invalid live query {query:?}: {reason}")]
    InvalidQuery { query: String, reason: String },

    #[error("subscription {sub_id} not found")]
    NotFound { sub_id: String },

    #[error(transparent)]
    Db(#[from] DbError),
}

// =============================================================================
// RENDERING
// =============================================================================

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("cannot render {component}: {reason}")]
    Failed { component: String, reason: String },

    #[error(transparent)]
    Bus(#[from] BusError),
}

// =============================================================================
// AGGREGATE
// =============================================================================

#[derive(Debug, Error)]
pub enum FabricError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("bus: {0}")]
    Bus(#[from] BusError),

    #[error("bridge: {0}")]
    Bridge(#[from] BridgeError),

    #[error("database: {0}")]
    Db(#[from] DbError),

    #[error("live query: {0}")]
    LiveQuery(#[from] LiveQueryError),

    #[error("render: {0}")]
    Render(#[from] RenderError),

    #[error("configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("service {service}: {message}")]
    Service { service: String, message: String },
}

impl FabricError {
    pub fn service(service: impl Into<String>, message: impl Into<String>) -> Self {
        FabricError::Service {
            service: service.into(),
            message: message.into(),
        }
    }

    /// Conditions that must prevent the server from starting
    pub fn is_fatal_at_boot(&self) -> bool {
        matches!(
            self,
            FabricError::Registry(_) | FabricError::Bus(BusError::Fatal { .. }) | FabricError::Config(_)
        )
    }
}
