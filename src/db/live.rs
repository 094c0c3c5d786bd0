/// Live query service
///
/// Each subscription owns a listener task that forwards driver notifications
/// to its handler, one fresh task per notification so a slow or panicking
/// handler never stalls the stream. When the driver channel ends without an
/// unsubscribe (connection loss) the listener re-issues the LIVE query.
use super::client::{Connection, ReliableClient};
use super::transport::{LiveAction, Notification};
use crate::bus::{Message, Publisher, SharedBus};
use crate::errors::{DbError, LiveQueryError};
use crate::logger::{self, LogTag};
use crate::topics::validate_topic_name;
use futures::future::BoxFuture;
use futures::FutureExt;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Deadline for the server-side KILL on unsubscribe
pub const KILL_TIMEOUT: Duration = Duration::from_secs(5);

static IDENTIFIER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("Invalid identifier regex"));

static FROM_TABLE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\bFROM\s+([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid FROM clause regex")
});

/// Receives every change of a live subscription
pub trait LiveHandler: Send + Sync {
    fn handle(
        &self,
        ctx: CancellationToken,
        action: LiveAction,
        payload: Value,
    ) -> BoxFuture<'static, ()>;
}

impl<F, Fut> LiveHandler for F
where
    F: Fn(CancellationToken, LiveAction, Value) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn handle(
        &self,
        ctx: CancellationToken,
        action: LiveAction,
        payload: Value,
    ) -> BoxFuture<'static, ()> {
        Box::pin(self(ctx, action, payload))
    }
}

/// Handle returned by `subscribe`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveSubscription {
    pub sub_id: String,
    pub table: String,
    pub query: String,
}

/// Server-side id and the connection it lives on; replaced on re-subscribe
struct LiveSlot {
    live_id: String,
    conn: Connection,
    /// Set once teardown took the id; later ids belong to nobody
    released: bool,
}

struct LiveEntry {
    info: LiveSubscription,
    params: Value,
    handler: Arc<dyn LiveHandler>,
    live: Mutex<LiveSlot>,
    cancel: CancellationToken,
    /// Cancelled when the listener task exits
    listener_done: CancellationToken,
}

impl LiveEntry {
    fn live_id(&self) -> String {
        self.live.lock().live_id.clone()
    }

    /// Take the current id for cleanup; ids opened after this are not stored
    fn release(&self) -> (String, Connection) {
        let mut slot = self.live.lock();
        slot.released = true;
        (slot.live_id.clone(), slot.conn.clone())
    }

    /// Store a re-subscribed id, or hand it back when teardown already ran
    fn replace(&self, live_id: String, conn: Connection) -> Option<(String, Connection)> {
        let mut slot = self.live.lock();
        if slot.released {
            return Some((live_id, conn));
        }
        slot.live_id = live_id;
        slot.conn = conn;
        None
    }
}

#[derive(Clone)]
pub struct LiveQueryService {
    inner: Arc<LiveInner>,
}

struct LiveInner {
    client: ReliableClient,
    entries: Mutex<HashMap<String, Arc<LiveEntry>>>,
    cancel: CancellationToken,
    listeners: TaskTracker,
    handlers: TaskTracker,
}

impl LiveQueryService {
    pub fn new(client: ReliableClient) -> Self {
        Self {
            inner: Arc::new(LiveInner {
                client,
                entries: Mutex::new(HashMap::new()),
                cancel: CancellationToken::new(),
                listeners: TaskTracker::new(),
                handlers: TaskTracker::new(),
            }),
        }
    }

    /// `LIVE SELECT * FROM <table> [WHERE <filter>]`
    pub async fn subscribe(
        &self,
        ctx: &CancellationToken,
        table: &str,
        filter: Option<&str>,
        handler: Arc<dyn LiveHandler>,
    ) -> Result<LiveSubscription, LiveQueryError> {
        if !IDENTIFIER.is_match(table) {
            return Err(LiveQueryError::InvalidQuery {
                query: table.to_string(),
                reason: "table must be a plain identifier".to_string(),
            });
        }
        let query = match filter.map(str::trim).filter(|f| !f.is_empty()) {
            Some(filter) => format!("LIVE SELECT * FROM {} WHERE {}", table, filter),
            None => format!("LIVE SELECT * FROM {}", table),
        };
        self.start(ctx, table.to_string(), query, Value::Null, handler)
            .await
    }

    /// Caller-supplied `LIVE SELECT`; the table is taken from the FROM clause
    pub async fn subscribe_query(
        &self,
        ctx: &CancellationToken,
        query: &str,
        params: Value,
        handler: Arc<dyn LiveHandler>,
    ) -> Result<LiveSubscription, LiveQueryError> {
        let trimmed = query.trim();
        let upper = trimmed.to_ascii_uppercase();
        if !upper.starts_with("LIVE SELECT") {
            return Err(LiveQueryError::InvalidQuery {
                query: trimmed.to_string(),
                reason: "must start with LIVE SELECT".to_string(),
            });
        }
        let table = extract_table(trimmed).ok_or_else(|| LiveQueryError::InvalidQuery {
            query: trimmed.to_string(),
            reason: "no table after FROM".to_string(),
        })?;
        self.start(ctx, table, trimmed.to_string(), params, handler)
            .await
    }

    /// Publish every change of `table` on `topic` as `{action, record}`
    pub async fn subscribe_to_topic(
        &self,
        ctx: &CancellationToken,
        table: &str,
        filter: Option<&str>,
        bus: SharedBus,
        topic: &str,
    ) -> Result<LiveSubscription, LiveQueryError> {
        validate_topic_name(topic).map_err(|e| LiveQueryError::InvalidQuery {
            query: topic.to_string(),
            reason: e.to_string(),
        })?;
        let topic = topic.to_string();
        let handler = move |ctx: CancellationToken, action: LiveAction, record: Value| {
            let bus = bus.clone();
            let topic = topic.clone();
            async move {
                let body = json!({ "action": action.as_str(), "record": record });
                let message = Message::new(topic.clone(), body.to_string());
                if let Err(e) = bus.publish(&ctx, message).await {
                    logger::warning(
                        LogTag::LiveQuery,
                        &format!("Cannot forward change to {}: {}", topic, e),
                    );
                }
            }
        };
        self.subscribe(ctx, table, filter, Arc::new(handler)).await
    }

    async fn start(
        &self,
        ctx: &CancellationToken,
        table: String,
        query: String,
        params: Value,
        handler: Arc<dyn LiveHandler>,
    ) -> Result<LiveSubscription, LiveQueryError> {
        let (live_id, conn, rx) = open_live(&self.inner.client, ctx, &query, &params).await?;

        let info = LiveSubscription {
            sub_id: uuid::Uuid::new_v4().to_string(),
            table,
            query,
        };
        let entry = Arc::new(LiveEntry {
            info: info.clone(),
            params,
            handler,
            live: Mutex::new(LiveSlot {
                live_id: live_id.clone(),
                conn,
                released: false,
            }),
            cancel: self.inner.cancel.child_token(),
            listener_done: CancellationToken::new(),
        });
        self.inner
            .entries
            .lock()
            .insert(info.sub_id.clone(), entry.clone());
        self.inner
            .listeners
            .spawn(run_listener(self.inner.clone(), entry, rx));

        logger::info(
            LogTag::LiveQuery,
            &format!(
                "Subscribed {} to {} (live id {})",
                info.sub_id, info.table, live_id
            ),
        );
        Ok(info)
    }

    /// Stop the listener, close the notification channel, then kill the
    /// server-side query. A failed kill is logged and does not fail the call.
    pub async fn unsubscribe(&self, sub_id: &str) -> Result<(), LiveQueryError> {
        let entry = self
            .inner
            .entries
            .lock()
            .remove(sub_id)
            .ok_or_else(|| LiveQueryError::NotFound {
                sub_id: sub_id.to_string(),
            })?;
        teardown(&entry).await;
        Ok(())
    }

    pub fn live_id(&self, sub_id: &str) -> Option<String> {
        self.inner
            .entries
            .lock()
            .get(sub_id)
            .map(|entry| entry.live_id())
    }

    pub fn subscriptions(&self) -> Vec<LiveSubscription> {
        let mut subs: Vec<LiveSubscription> = self
            .inner
            .entries
            .lock()
            .values()
            .map(|entry| entry.info.clone())
            .collect();
        subs.sort_by(|a, b| a.sub_id.cmp(&b.sub_id));
        subs
    }

    pub fn count(&self) -> usize {
        self.inner.entries.lock().len()
    }

    /// Unsubscribe everything and join listeners and in-flight handlers
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), LiveQueryError> {
        let inner = &self.inner;
        let entries: Vec<Arc<LiveEntry>> = inner.entries.lock().drain().map(|(_, e)| e).collect();
        logger::info(
            LogTag::LiveQuery,
            &format!("Shutting down {} live subscription(s)", entries.len()),
        );

        let work = async {
            for entry in &entries {
                teardown(entry).await;
            }
            inner.cancel.cancel();
            inner.listeners.close();
            inner.handlers.close();
            inner.listeners.wait().await;
            inner.handlers.wait().await;
        };
        if tokio::time::timeout(deadline, work).await.is_err() {
            inner.cancel.cancel();
            logger::warning(
                LogTag::LiveQuery,
                "Live subscriptions did not stop before the shutdown deadline",
            );
            return Err(LiveQueryError::Db(DbError::Timeout {
                operation: "live query shutdown".to_string(),
                timeout_ms: deadline.as_millis() as u64,
            }));
        }
        Ok(())
    }
}

/// First word after FROM
pub fn extract_table(query: &str) -> Option<String> {
    FROM_TABLE
        .captures(query)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Pull the live-query id out of a driver result.
///
/// Accepts a plain string, a UUID literal (`u'...'` or `{"$uuid": ...}`), and
/// the same wrapped in statement results or `{result|id: ...}` maps.
pub fn extract_live_id(result: &Value) -> Result<String, LiveQueryError> {
    fn unexpected(value: &Value) -> LiveQueryError {
        let shape = match value {
            Value::Null => "null".to_string(),
            Value::Bool(_) => "bool".to_string(),
            Value::Number(_) => "number".to_string(),
            Value::String(_) => "empty string".to_string(),
            Value::Array(items) => format!("array of {}", items.len()),
            Value::Object(map) => {
                let keys: Vec<&str> = map.keys().map(String::as_str).collect();
                format!("object {{{}}}", keys.join(","))
            }
        };
        LiveQueryError::UnexpectedResult { shape }
    }

    match result {
        Value::String(raw) => {
            let raw = raw.trim();
            let raw = raw
                .strip_prefix("u'")
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| raw.strip_prefix("u\"").and_then(|s| s.strip_suffix('"')))
                .unwrap_or(raw);
            if raw.is_empty() {
                return Err(unexpected(result));
            }
            Ok(match uuid::Uuid::parse_str(raw) {
                Ok(id) => id.hyphenated().to_string(),
                Err(_) => raw.to_string(),
            })
        }
        Value::Array(items) if items.len() == 1 => extract_live_id(&items[0]),
        Value::Object(map) => {
            for key in ["$uuid", "uuid", "Uuid", "result", "id"] {
                if let Some(inner) = map.get(key) {
                    return extract_live_id(inner);
                }
            }
            Err(unexpected(result))
        }
        other => Err(unexpected(other)),
    }
}

async fn open_live(
    client: &ReliableClient,
    ctx: &CancellationToken,
    query: &str,
    params: &Value,
) -> Result<(String, Connection, mpsc::Receiver<Notification>), LiveQueryError> {
    let (result, conn) = client
        .with_connection(ctx, |conn| {
            let params = params.clone();
            async move {
                let result = conn.query(query, params).await?;
                Ok((result, conn))
            }
        })
        .await?;
    let live_id = extract_live_id(&result)?;
    let rx = conn.notifications(&live_id)?;
    Ok((live_id, conn, rx))
}

/// Stop the listener, then release and kill whatever id it left behind.
///
/// A listener stuck in a re-subscribe past `KILL_TIMEOUT` is not waited for;
/// it kills its own id when the LIVE query finally answers.
async fn teardown(entry: &LiveEntry) {
    entry.cancel.cancel();
    if tokio::time::timeout(KILL_TIMEOUT, entry.listener_done.cancelled())
        .await
        .is_err()
    {
        logger::warning(
            LogTag::LiveQuery,
            &format!("Listener of {} still re-subscribing, not waiting", entry.info.sub_id),
        );
    }
    let (live_id, conn) = entry.release();
    kill_live(&live_id, &conn).await;
    logger::info(
        LogTag::LiveQuery,
        &format!("Unsubscribed {} (live id {})", entry.info.sub_id, live_id),
    );
}

/// Close the notification channel, then KILL with a deadline; failures only warn
async fn kill_live(live_id: &str, conn: &Connection) {
    conn.close_notifications(live_id);

    match tokio::time::timeout(KILL_TIMEOUT, conn.kill(live_id)).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => logger::warning(
            LogTag::LiveQuery,
            &format!(
                "{}",
                LiveQueryError::KillFailed {
                    live_id: live_id.to_string(),
                    reason: e.to_string(),
                }
            ),
        ),
        Err(_) => logger::warning(
            LogTag::LiveQuery,
            &format!(
                "{}",
                LiveQueryError::KillFailed {
                    live_id: live_id.to_string(),
                    reason: format!("no answer within {:?}", KILL_TIMEOUT),
                }
            ),
        ),
    }
}

fn dispatch(inner: &LiveInner, entry: &LiveEntry, notification: Notification) {
    let handler = entry.handler.clone();
    let sub_id = entry.info.sub_id.clone();
    let ctx = entry.cancel.clone();
    inner.handlers.spawn(async move {
        let call = async move {
            handler
                .handle(ctx, notification.action, notification.result)
                .await
        };
        if let Err(panic) = AssertUnwindSafe(call).catch_unwind().await {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            logger::error(
                LogTag::LiveQuery,
                &format!("{}", LiveQueryError::HandlerPanic { sub_id, message }),
            );
        }
    });
}

async fn run_listener(
    inner: Arc<LiveInner>,
    entry: Arc<LiveEntry>,
    mut rx: mpsc::Receiver<Notification>,
) {
    let _done = entry.listener_done.clone().drop_guard();
    loop {
        tokio::select! {
            biased;
            _ = entry.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(notification) => {
                    let closed = notification.action == LiveAction::Close;
                    dispatch(&inner, &entry, notification);
                    if closed {
                        logger::info(
                            LogTag::LiveQuery,
                            &format!("Server closed live query for {}", entry.info.sub_id),
                        );
                        inner.entries.lock().remove(&entry.info.sub_id);
                        break;
                    }
                }
                None => {
                    if entry.cancel.is_cancelled() {
                        break;
                    }
                    logger::warning(
                        LogTag::LiveQuery,
                        &format!("Notification channel of {} closed, re-subscribing", entry.info.sub_id),
                    );
                    match open_live(&inner.client, &entry.cancel, &entry.info.query, &entry.params).await {
                        Ok((live_id, conn, new_rx)) => {
                            if let Some((orphan, conn)) = entry.replace(live_id.clone(), conn) {
                                logger::info(
                                    LogTag::LiveQuery,
                                    &format!("{} was unsubscribed during re-subscribe, killing {}", entry.info.sub_id, orphan),
                                );
                                kill_live(&orphan, &conn).await;
                                break;
                            }
                            logger::info(
                                LogTag::LiveQuery,
                                &format!("Re-subscribed {} (live id {})", entry.info.sub_id, live_id),
                            );
                            if entry.cancel.is_cancelled() {
                                break;
                            }
                            rx = new_rx;
                        }
                        Err(_) if entry.cancel.is_cancelled() => break,
                        Err(e) => {
                            logger::error(
                                LogTag::LiveQuery,
                                &format!("Cannot re-subscribe {}: {}", entry.info.sub_id, e),
                            );
                            inner.entries.lock().remove(&entry.info.sub_id);
                            break;
                        }
                    }
                }
            }
        }
    }
}
