//! Configuration system
//!
//! - `macros`: the `config_struct!` macro (fields, defaults and env bindings in one place)
//! - `schemas`: all configuration structures
//! - `loader`: `.env` + environment loading, validation

pub mod macros;
pub mod loader;
pub mod schemas;

pub use loader::{
    apply_env_value, load_config, load_config_from, ConfigError, EnvSource, FromEnv, ProcessEnv,
};
pub use schemas::{BridgeConfig, BusConfig, DbConfig, FabricConfig, PresenceConfig, ServerConfig};
