/// WebSocket JSON-RPC database driver
///
/// One socket per connection. Requests carry a numeric id and are answered
/// through a oneshot keyed by that id; frames without an id are live-query
/// notifications and are routed to the channel opened for their live id.
/// Notifications that beat the channel (the server pushes changes right after
/// the LIVE reply) are parked briefly and handed over when it opens.
use super::transport::{DbConnector, DbTransport, LiveAction, Notification, NOTIFICATION_BUFFER};
use crate::errors::DbError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message as WsMessage};
use tokio_util::sync::CancellationToken;
use url::Url;

/// Upper bound for a single RPC round trip; callers apply tighter deadlines
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// How long notifications for a not-yet-opened live id are kept
pub const UNCLAIMED_TTL: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct RpcRequest<'a> {
    id: u64,
    method: &'a str,
    params: Value,
}

#[derive(Deserialize)]
struct RpcError {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: String,
}

#[derive(Deserialize)]
struct RpcResponse {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<RpcError>,
}

#[derive(Deserialize)]
struct LiveFrame {
    id: Value,
    action: String,
    #[serde(default)]
    result: Value,
}

type Pending = Mutex<HashMap<u64, oneshot::Sender<Result<Value, DbError>>>>;

/// Notifications received before anyone opened their channel
struct Unclaimed {
    first_seen: Instant,
    queue: Vec<Notification>,
}

/// Open channels and parked notifications share one lock so a notification
/// is either sent to a channel or parked for the next `notifications` call
#[derive(Default)]
struct Routes {
    channels: HashMap<String, mpsc::Sender<Notification>>,
    unclaimed: HashMap<String, Unclaimed>,
}

impl Routes {
    fn park(&mut self, notification: Notification) {
        let now = Instant::now();
        self.unclaimed
            .retain(|_, parked| now.duration_since(parked.first_seen) < UNCLAIMED_TTL);
        let parked = self
            .unclaimed
            .entry(notification.live_id.clone())
            .or_insert_with(|| Unclaimed {
                first_seen: now,
                queue: Vec::new(),
            });
        if parked.queue.len() < NOTIFICATION_BUFFER {
            parked.queue.push(notification);
        }
    }

    fn open(&mut self, live_id: &str) -> mpsc::Receiver<Notification> {
        let (tx, rx) = mpsc::channel(NOTIFICATION_BUFFER);
        if let Some(parked) = self.unclaimed.remove(live_id) {
            if parked.first_seen.elapsed() < UNCLAIMED_TTL {
                for notification in parked.queue {
                    let _ = tx.try_send(notification);
                }
            }
        }
        self.channels.insert(live_id.to_string(), tx);
        rx
    }
}

#[derive(Debug, Clone)]
pub struct RpcConnector {
    request_timeout: Duration,
}

impl Default for RpcConnector {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl RpcConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

#[async_trait]
impl DbConnector for RpcConnector {
    async fn connect(&self, url: &Url) -> Result<Arc<dyn DbTransport>, DbError> {
        let (stream, _) = connect_async(url.as_str())
            .await
            .map_err(|e| DbError::connection_lost(format!("connect: {}", e)))?;
        let (mut sink, mut source) = stream.split();

        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            routes: Mutex::new(Routes::default()),
            closed: AtomicBool::new(false),
        });
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<WsMessage>();
        let cancel = CancellationToken::new();

        let writer_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = writer_cancel.cancelled() => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                    next = out_rx.recv() => match next {
                        Some(frame) => {
                            if let Err(e) = sink.send(frame).await {
                                logger::warning(LogTag::Database, &format!("RPC write failed: {}", e));
                                writer_cancel.cancel();
                                break;
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        let reader_shared = shared.clone();
        let reader_cancel = cancel.clone();
        let reader_out = out_tx.clone();
        tokio::spawn(async move {
            let reason = loop {
                tokio::select! {
                    _ = reader_cancel.cancelled() => break "connection closed".to_string(),
                    next = source.next() => match next {
                        Some(Ok(WsMessage::Text(text))) => reader_shared.dispatch(&text).await,
                        Some(Ok(WsMessage::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                            Ok(text) => reader_shared.dispatch(text).await,
                            Err(_) => logger::debug(LogTag::Database, "Ignoring non-UTF-8 RPC frame"),
                        },
                        Some(Ok(WsMessage::Ping(data))) => {
                            let _ = reader_out.send(WsMessage::Pong(data));
                        }
                        Some(Ok(WsMessage::Close(_))) | None => break "server closed the connection".to_string(),
                        Some(Ok(_)) => {}
                        Some(Err(e)) => break format!("read: {}", e),
                    }
                }
            };
            reader_cancel.cancel();
            reader_shared.fail_all(&reason);
        });

        Ok(Arc::new(RpcTransport {
            shared,
            out: out_tx,
            cancel,
            next_id: AtomicU64::new(1),
            request_timeout: self.request_timeout,
        }))
    }
}

struct Shared {
    pending: Pending,
    routes: Mutex<Routes>,
    closed: AtomicBool,
}

impl Shared {
    async fn dispatch(&self, text: &str) {
        let response: RpcResponse = match serde_json::from_str(text) {
            Ok(response) => response,
            Err(e) => {
                logger::debug(LogTag::Database, &format!("Ignoring malformed RPC frame: {}", e));
                return;
            }
        };

        let id = response.id.as_ref().and_then(|id| match id {
            Value::Number(n) => n.as_u64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        });
        match id {
            Some(id) => {
                let Some(reply) = self.pending.lock().remove(&id) else {
                    logger::debug(LogTag::Database, &format!("Response for unknown request {}", id));
                    return;
                };
                let outcome = match response.error {
                    Some(err) => Err(DbError::query(format!("{} (code {})", err.message, err.code))),
                    None => Ok(response.result.unwrap_or(Value::Null)),
                };
                let _ = reply.send(outcome);
            }
            None => {
                if let Some(result) = response.result {
                    self.route_notification(result).await;
                }
            }
        }
    }

    async fn route_notification(&self, raw: Value) {
        let frame: LiveFrame = match serde_json::from_value(raw) {
            Ok(frame) => frame,
            Err(e) => {
                logger::debug(LogTag::Database, &format!("Ignoring malformed notification: {}", e));
                return;
            }
        };
        let Ok(live_id) = super::live::extract_live_id(&frame.id) else {
            return;
        };
        let Some(action) = LiveAction::parse(&frame.action) else {
            logger::debug(
                LogTag::Database,
                &format!("Unknown live action {} for {}", frame.action, live_id),
            );
            return;
        };

        let notification = Notification {
            live_id: live_id.clone(),
            action,
            result: frame.result,
        };
        let tx = {
            let mut routes = self.routes.lock();
            match routes.channels.get(&live_id).cloned() {
                Some(tx) => tx,
                None => {
                    routes.park(notification);
                    return;
                }
            }
        };
        if tx.send(notification).await.is_err() {
            self.routes.lock().channels.remove(&live_id);
        }
        if action == LiveAction::Close {
            self.routes.lock().channels.remove(&live_id);
        }
    }

    fn fail_all(&self, reason: &str) {
        self.closed.store(true, Ordering::SeqCst);
        let pending: Vec<_> = self.pending.lock().drain().map(|(_, tx)| tx).collect();
        for reply in pending {
            let _ = reply.send(Err(DbError::connection_lost(reason)));
        }
        // Dropping the senders ends every listener's stream.
        let mut routes = self.routes.lock();
        routes.channels.clear();
        routes.unclaimed.clear();
        drop(routes);
        logger::warning(LogTag::Database, &format!("RPC connection ended: {}", reason));
    }
}

pub struct RpcTransport {
    shared: Arc<Shared>,
    out: mpsc::UnboundedSender<WsMessage>,
    cancel: CancellationToken,
    next_id: AtomicU64,
    request_timeout: Duration,
}

impl RpcTransport {
    async fn call(&self, method: &str, params: Value) -> Result<Value, DbError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DbError::connection_lost("connection closed"));
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = serde_json::to_string(&RpcRequest { id, method, params })
            .map_err(|e| DbError::query(format!("encode {}: {}", method, e)))?;

        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(id, tx);
        if self.out.send(WsMessage::Text(body)).is_err() {
            self.shared.pending.lock().remove(&id);
            return Err(DbError::connection_lost("writer stopped"));
        }

        match tokio::time::timeout(self.request_timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DbError::connection_lost("connection closed")),
            Err(_) => {
                self.shared.pending.lock().remove(&id);
                Err(DbError::Timeout {
                    operation: method.to_string(),
                    timeout_ms: self.request_timeout.as_millis() as u64,
                })
            }
        }
    }
}

/// Surface the first failed statement of a query result as an error
fn check_statements(result: Value) -> Result<Value, DbError> {
    if let Value::Array(statements) = &result {
        for statement in statements {
            if statement.get("status").and_then(Value::as_str) == Some("ERR") {
                let detail = statement
                    .get("result")
                    .and_then(Value::as_str)
                    .unwrap_or("statement failed");
                return Err(DbError::query(detail));
            }
        }
    }
    Ok(result)
}

#[async_trait]
impl DbTransport for RpcTransport {
    async fn signin(&self, username: &str, password: &str) -> Result<(), DbError> {
        self.call("signin", json!([{ "user": username, "pass": password }]))
            .await
            .map(|_| ())
    }

    async fn use_ns(&self, namespace: &str, database: &str) -> Result<(), DbError> {
        self.call("use", json!([namespace, database])).await.map(|_| ())
    }

    async fn version(&self) -> Result<String, DbError> {
        let result = self.call("version", json!([])).await?;
        Ok(match result {
            Value::String(version) => version,
            other => other.to_string(),
        })
    }

    async fn query(&self, sql: &str, params: Value) -> Result<Value, DbError> {
        let params = if params.is_null() { json!({}) } else { params };
        let result = self.call("query", json!([sql, params])).await?;
        check_statements(result)
    }

    async fn kill(&self, live_id: &str) -> Result<(), DbError> {
        self.call("kill", json!([live_id])).await.map(|_| ())
    }

    fn notifications(&self, live_id: &str) -> Result<mpsc::Receiver<Notification>, DbError> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(DbError::connection_lost("connection closed"));
        }
        Ok(self.shared.routes.lock().open(live_id))
    }

    fn close_notifications(&self, live_id: &str) {
        let mut routes = self.shared.routes.lock();
        routes.channels.remove(live_id);
        routes.unclaimed.remove(live_id);
    }

    async fn close(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    /// Minimal server: answers every request, and on `query` for a LIVE
    /// SELECT also pushes one CREATE notification for the new live id.
    async fn fake_server() -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            let (mut tx, mut rx) = ws.split();
            while let Some(Ok(WsMessage::Text(text))) = rx.next().await {
                let request: Value = serde_json::from_str(&text).unwrap();
                let id = request["id"].clone();
                let method = request["method"].as_str().unwrap_or_default().to_string();
                let params = request["params"].clone();
                let reply = match method.as_str() {
                    "version" => json!({ "id": id, "result": "surrealdb-2.0.0" }),
                    "signin" if params[0]["pass"] == "wrong" => json!({
                        "id": id,
                        "error": { "code": -32000, "message": "There was a problem with authentication" }
                    }),
                    "query" if params[0].as_str().unwrap_or_default().starts_with("LIVE") => {
                        let live_id = "0189d6a4-6e5b-7c3e-9f61-0c2d8b1a4e77";
                        let reply = json!({ "id": id, "result": [{ "status": "OK", "result": live_id }] });
                        tx.send(WsMessage::Text(reply.to_string())).await.unwrap();
                        json!({ "result": { "id": live_id, "action": "CREATE", "result": { "id": "note:1" } } })
                    }
                    "query" if params[0] == "BROKEN" => json!({
                        "id": id,
                        "result": [{ "status": "ERR", "result": "Parse error" }]
                    }),
                    _ => json!({ "id": id, "result": null }),
                };
                tx.send(WsMessage::Text(reply.to_string())).await.unwrap();
            }
        });
        Url::parse(&format!("ws://{}/rpc", addr)).unwrap()
    }

    #[tokio::test]
    async fn test_request_response_round_trip() {
        let url = fake_server().await;
        let conn = RpcConnector::new().connect(&url).await.unwrap();
        conn.signin("root", "root").await.unwrap();
        conn.use_ns("app", "app").await.unwrap();
        assert_eq!(conn.version().await.unwrap(), "surrealdb-2.0.0");

        let err = conn.signin("root", "wrong").await.unwrap_err();
        assert!(err.to_string().contains("authentication"));
        assert!(!err.is_connection_error());

        let err = conn.query("BROKEN", Value::Null).await.unwrap_err();
        assert!(err.to_string().contains("Parse error"));
    }

    #[tokio::test]
    async fn test_notifications_routed_by_live_id() {
        let url = fake_server().await;
        let conn = RpcConnector::new().connect(&url).await.unwrap();
        let live_id = "0189d6a4-6e5b-7c3e-9f61-0c2d8b1a4e77";
        let mut rx = conn.notifications(live_id).unwrap();

        let result = conn.query("LIVE SELECT * FROM note", Value::Null).await.unwrap();
        assert_eq!(super::super::live::extract_live_id(&result).unwrap(), live_id);

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.action, LiveAction::Create);
        assert_eq!(notification.result["id"], "note:1");
    }

    #[tokio::test]
    async fn test_change_pushed_with_live_reply_is_kept() {
        let url = fake_server().await;
        let conn = RpcConnector::new().connect(&url).await.unwrap();

        // The server pushes CREATE in the same burst as the LIVE reply, before
        // the caller can know the id and open its channel.
        let result = conn.query("LIVE SELECT * FROM note", Value::Null).await.unwrap();
        let live_id = super::super::live::extract_live_id(&result).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut rx = conn.notifications(&live_id).unwrap();

        let notification = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(notification.action, LiveAction::Create);
        assert_eq!(notification.result["id"], "note:1");
    }

    #[tokio::test]
    async fn test_closed_connection_fails_fast() {
        let url = fake_server().await;
        let conn = RpcConnector::new().connect(&url).await.unwrap();
        conn.close().await;

        let outcome = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match conn.version().await {
                    Err(e) if e.is_connection_error() => break e,
                    _ => tokio::time::sleep(Duration::from_millis(10)).await,
                }
            }
        })
        .await;
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_server_is_a_connection_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let url = Url::parse(&format!("ws://{}/rpc", addr)).unwrap();
        let err = match RpcConnector::new().connect(&url).await {
            Ok(_) => panic!("connected to a closed port"),
            Err(e) => e,
        };
        assert!(err.is_connection_error());
    }
}
