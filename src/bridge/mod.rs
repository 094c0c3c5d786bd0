//! WebSocket bridge between the bus and browser connections
//!
//! Two endpoint kinds share one implementation:
//! - `html` clients receive payloads verbatim (server-rendered fragments)
//! - `data` clients receive `{topic, payload, meta}` JSON envelopes
//!
//! Each client has a bounded egress queue that drops the oldest frame when
//! full, so one slow browser never stalls the bus or its peers.

mod client;
mod connection;
mod egress;
mod frame;
mod health;
mod hub;
mod kind;
mod lifecycle;
mod metrics;
mod send;

pub mod memory;

pub use client::{ClientDirectory, ClientInfo};
pub use connection::WsConnection;
pub use egress::{EgressQueue, PushOutcome};
pub use frame::{DataEnvelope, InboundAction, InboundFrame, WsFrame};
pub use health::{ConnectionHealth, HealthConfig, IngressBudget};
pub use hub::{Bridge, BridgeStats};
pub use kind::EndpointKind;
pub use lifecycle::LifecycleEvent;
pub use metrics::{BridgeMetricsSnapshot, ClientMetricsSnapshot};
pub use send::{broadcast, direct, send_topic};
