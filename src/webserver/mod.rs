//! HTTP host for the two WebSocket endpoints and `/health`

pub mod auth;
mod routes;
mod server;
mod socket;
mod state;

pub use auth::{Anonymous, Authenticator, HeaderAuthenticator};
pub use routes::status::{gather_health, HealthResponse, PresenceSummary};
pub use server::WebServer;
pub use socket::AxumSocket;
pub use state::AppState;
