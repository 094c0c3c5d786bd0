//! Driver seam of the database layer
//!
//! `DbConnector` opens connections; `DbTransport` is one open connection.
//! The production implementation is the WebSocket RPC driver in `rpc`; tests
//! use the scripted driver in `memory`.

use crate::errors::DbError;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Change kind carried by a live-query notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LiveAction {
    Create,
    Update,
    Delete,
    /// The server ended the live query
    Close,
}

impl LiveAction {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.to_ascii_uppercase().as_str() {
            "CREATE" => Some(LiveAction::Create),
            "UPDATE" => Some(LiveAction::Update),
            "DELETE" => Some(LiveAction::Delete),
            "CLOSE" | "KILLED" => Some(LiveAction::Close),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            LiveAction::Create => "create",
            LiveAction::Update => "update",
            LiveAction::Delete => "delete",
            LiveAction::Close => "close",
        }
    }
}

impl fmt::Display for LiveAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One change pushed by the server for a live query
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    pub live_id: String,
    pub action: LiveAction,
    pub result: Value,
}

/// Capacity of each live-query notification channel
pub const NOTIFICATION_BUFFER: usize = 256;

#[async_trait]
pub trait DbTransport: Send + Sync {
    async fn signin(&self, username: &str, password: &str) -> Result<(), DbError>;

    async fn use_ns(&self, namespace: &str, database: &str) -> Result<(), DbError>;

    /// Server version; doubles as the health ping
    async fn version(&self) -> Result<String, DbError>;

    async fn query(&self, sql: &str, params: Value) -> Result<Value, DbError>;

    async fn kill(&self, live_id: &str) -> Result<(), DbError>;

    /// Open the notification channel of a live query. Notifications the
    /// driver received for `live_id` before this call are delivered first.
    fn notifications(&self, live_id: &str) -> Result<mpsc::Receiver<Notification>, DbError>;

    /// Close the notification channel of a live query; the receiver sees the end of stream
    fn close_notifications(&self, live_id: &str);

    async fn close(&self);
}

#[async_trait]
pub trait DbConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> Result<Arc<dyn DbTransport>, DbError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing() {
        assert_eq!(LiveAction::parse("CREATE"), Some(LiveAction::Create));
        assert_eq!(LiveAction::parse("update"), Some(LiveAction::Update));
        assert_eq!(LiveAction::parse("KILLED"), Some(LiveAction::Close));
        assert_eq!(LiveAction::parse("DROP"), None);
        assert_eq!(LiveAction::Delete.to_string(), "delete");
    }
}
