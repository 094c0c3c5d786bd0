//! Database layer
//!
//! - `client`: reconnecting client with backoff, deadlines and health checks
//! - `live`: live-query subscriptions with re-subscription on connection loss
//! - `rpc`: WebSocket JSON-RPC driver
//! - `memory`: scripted driver for tests and server-less runs

mod backoff;
mod client;
mod live;
pub mod memory;
mod redact;
pub mod rpc;
mod state;
mod transport;

pub use backoff::{BackoffPolicy, ExponentialBackoff};
pub use client::{Connection, ReliableClient};
pub use live::{
    extract_live_id, extract_table, LiveHandler, LiveQueryService, LiveSubscription, KILL_TIMEOUT,
};
pub use redact::redact_url;
pub use state::{ConnectionState, DbHealth};
pub use transport::{DbConnector, DbTransport, LiveAction, Notification, NOTIFICATION_BUFFER};
