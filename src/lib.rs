//! Realtime fabric: an in-process pub/sub bus relaying server events to
//! browsers over HTML and data WebSocket endpoints, with user presence and
//! database live queries feeding the same bus.

pub mod arguments;
pub mod bridge;
pub mod bus;
pub mod config;
pub mod db;
pub mod errors;
pub mod logger;
pub mod presence;
pub mod render;
pub mod runtime;
pub mod services;
pub mod topics;
pub mod webserver;

pub use errors::FabricError;
pub use runtime::Fabric;
