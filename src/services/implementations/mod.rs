//! Service wrappers for each fabric component
//!
//! Startup runs bus, database, bridges, presence, then the HTTP host. Stop
//! runs in reverse so HTTP stops taking connections before anything it
//! depends on goes away.

pub mod bridge_service;
pub mod bus_service;
pub mod db_service;
pub mod presence_service;
pub mod webserver_service;

pub use bridge_service::BridgeService;
pub use bus_service::BusService;
pub use db_service::DbService;
pub use presence_service::PresenceModule;
pub use webserver_service::WebserverService;
