//! Scripted in-memory database driver
//!
//! Every connection produced by one `MemoryConnector` shares the same script:
//! queued failures, live-query bookkeeping, and the log of kills. Used by the
//! database tests and by embedders running without a server.

use super::transport::{DbConnector, DbTransport, LiveAction, Notification, NOTIFICATION_BUFFER};
use crate::errors::DbError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use url::Url;

#[derive(Default)]
struct Script {
    connects: AtomicU32,
    failing_connects: AtomicU32,
    reject_auth: AtomicBool,
    query_failures: Mutex<VecDeque<DbError>>,
    live_result: Mutex<Option<Value>>,
    query_delay: Mutex<Option<Duration>>,
    queries: Mutex<Vec<String>>,
    killed: Mutex<Vec<String>>,
    transports: Mutex<Vec<Arc<MemoryTransport>>>,
}

#[derive(Clone, Default)]
pub struct MemoryConnector {
    script: Arc<Script>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The next `count` connection attempts fail with "connection refused"
    pub fn fail_next_connects(&self, count: u32) {
        self.script.failing_connects.store(count, Ordering::SeqCst);
    }

    pub fn reject_auth(&self, reject: bool) {
        self.script.reject_auth.store(reject, Ordering::SeqCst);
    }

    /// Queue errors returned by the next `query` calls, in order
    pub fn fail_next_queries(&self, errors: impl IntoIterator<Item = DbError>) {
        self.script.query_failures.lock().extend(errors);
    }

    /// Raw value returned for LIVE SELECT instead of a fresh uuid
    pub fn set_live_result(&self, result: Value) {
        *self.script.live_result.lock() = Some(result);
    }

    /// Every later `query` sleeps this long before answering
    pub fn set_query_delay(&self, delay: Duration) {
        *self.script.query_delay.lock() = Some(delay);
    }

    pub fn connect_count(&self) -> u32 {
        self.script.connects.load(Ordering::SeqCst)
    }

    pub fn queries(&self) -> Vec<String> {
        self.script.queries.lock().clone()
    }

    pub fn killed(&self) -> Vec<String> {
        self.script.killed.lock().clone()
    }

    /// Live ids with an open notification channel on the newest connection
    pub fn open_live_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .latest()
            .map(|transport| transport.channels.lock().keys().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    /// Push a notification to a live query on the newest connection
    pub async fn notify(&self, live_id: &str, action: LiveAction, result: Value) -> bool {
        let Some(transport) = self.latest() else {
            return false;
        };
        let sender = transport.channels.lock().get(live_id).cloned();
        match sender {
            Some(tx) => tx
                .send(Notification {
                    live_id: live_id.to_string(),
                    action,
                    result,
                })
                .await
                .is_ok(),
            None => false,
        }
    }

    /// Simulate the server dropping the newest connection
    pub fn drop_connection(&self) {
        if let Some(transport) = self.latest() {
            transport.shut();
        }
    }

    fn latest(&self) -> Option<Arc<MemoryTransport>> {
        self.script.transports.lock().last().cloned()
    }
}

#[async_trait]
impl DbConnector for MemoryConnector {
    async fn connect(&self, _url: &Url) -> Result<Arc<dyn DbTransport>, DbError> {
        self.script.connects.fetch_add(1, Ordering::SeqCst);
        let failing = self.script.failing_connects.load(Ordering::SeqCst);
        if failing > 0 {
            self.script
                .failing_connects
                .store(failing - 1, Ordering::SeqCst);
            return Err(DbError::query("dial tcp: connection refused"));
        }
        let transport = Arc::new(MemoryTransport {
            script: self.script.clone(),
            closed: AtomicBool::new(false),
            channels: Mutex::new(HashMap::new()),
        });
        self.script.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

pub struct MemoryTransport {
    script: Arc<Script>,
    closed: AtomicBool,
    channels: Mutex<HashMap<String, mpsc::Sender<Notification>>>,
}

impl MemoryTransport {
    fn shut(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.channels.lock().clear();
    }

    fn check_open(&self) -> Result<(), DbError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DbError::query("write: broken pipe"));
        }
        Ok(())
    }
}

#[async_trait]
impl DbTransport for MemoryTransport {
    async fn signin(&self, username: &str, _password: &str) -> Result<(), DbError> {
        self.check_open()?;
        if self.script.reject_auth.load(Ordering::SeqCst) {
            return Err(DbError::query(format!(
                "There was a problem with authentication for {}",
                username
            )));
        }
        Ok(())
    }

    async fn use_ns(&self, _namespace: &str, _database: &str) -> Result<(), DbError> {
        self.check_open()
    }

    async fn version(&self) -> Result<String, DbError> {
        self.check_open()?;
        Ok("memory-1.0.0".to_string())
    }

    async fn query(&self, sql: &str, _params: Value) -> Result<Value, DbError> {
        self.script.queries.lock().push(sql.to_string());
        let delay = *self.script.query_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = self.script.query_failures.lock().pop_front() {
            return Err(err);
        }
        self.check_open()?;

        if sql.trim_start().to_ascii_uppercase().starts_with("LIVE SELECT") {
            let result = self
                .script
                .live_result
                .lock()
                .clone()
                .unwrap_or_else(|| Value::String(uuid::Uuid::new_v4().to_string()));
            return Ok(json!([{ "status": "OK", "result": result }]));
        }
        Ok(json!([{ "status": "OK", "result": [] }]))
    }

    async fn kill(&self, live_id: &str) -> Result<(), DbError> {
        self.check_open()?;
        self.script.killed.lock().push(live_id.to_string());
        Ok(())
    }

    fn notifications(&self, live_id: &str) -> Result<mpsc::Receiver<Notification>, DbError> {
        self.check_open()?;
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        self.channels.lock().insert(live_id.to_string(), tx);
        Ok(rx)
    }

    fn close_notifications(&self, live_id: &str) {
        self.channels.lock().remove(live_id);
    }

    async fn close(&self) {
        self.shut();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url() -> Url {
        Url::parse("mem://local").unwrap()
    }

    #[tokio::test]
    async fn test_scripted_connect_failures() {
        let connector = MemoryConnector::new();
        connector.fail_next_connects(1);
        assert!(connector.connect(&url()).await.is_err());
        assert!(connector.connect(&url()).await.is_ok());
        assert_eq!(connector.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_live_notifications_flow_until_closed() {
        let connector = MemoryConnector::new();
        let transport = connector.connect(&url()).await.unwrap();
        let mut rx = transport.notifications("abc").unwrap();

        assert!(connector.notify("abc", LiveAction::Create, json!({"id": 1})).await);
        assert_eq!(rx.recv().await.unwrap().action, LiveAction::Create);

        transport.close_notifications("abc");
        assert!(rx.recv().await.is_none());
        assert!(!connector.notify("abc", LiveAction::Update, Value::Null).await);
    }

    #[tokio::test]
    async fn test_dropped_connection_breaks_calls() {
        let connector = MemoryConnector::new();
        let transport = connector.connect(&url()).await.unwrap();
        connector.drop_connection();
        let err = transport.version().await.unwrap_err();
        assert!(err.is_connection_error());
    }
}
