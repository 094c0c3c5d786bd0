/// Reliable database client
///
/// Wraps one driver connection behind a lock and replaces it when it breaks:
/// - `connect` walks Disconnected -> Connecting -> Authenticated -> Healthy
/// - `with_connection` retries connection-class failures with backoff
/// - the health monitor pings every `health_interval` and reconnects on failure
///
/// Errors that are not connection failures are returned to the caller as-is.
use super::backoff::{BackoffPolicy, ExponentialBackoff};
use super::redact::redact_url;
use super::state::{ConnectionState, DbHealth};
use super::transport::{DbConnector, DbTransport};
use crate::config::DbConfig;
use crate::errors::DbError;
use crate::logger::{self, LogTag};
use parking_lot::RwLock;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use url::Url;

/// Connection handed to `with_connection` callbacks
pub type Connection = Arc<dyn DbTransport>;

#[derive(Clone)]
struct Current {
    generation: u64,
    conn: Connection,
}

#[derive(Clone)]
pub struct ReliableClient {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    config: DbConfig,
    url: Url,
    redacted_url: String,
    connector: Arc<dyn DbConnector>,
    policy: BackoffPolicy,
    current: RwLock<Option<Current>>,
    /// Serializes connection attempts
    connecting: tokio::sync::Mutex<()>,
    generation: AtomicU64,
    health: RwLock<DbHealth>,
    cancel: CancellationToken,
    tasks: TaskTracker,
}

impl ReliableClient {
    pub fn new(config: DbConfig, connector: Arc<dyn DbConnector>) -> Result<Self, DbError> {
        Self::with_policy(config, connector, BackoffPolicy::default())
    }

    pub fn with_policy(
        config: DbConfig,
        connector: Arc<dyn DbConnector>,
        policy: BackoffPolicy,
    ) -> Result<Self, DbError> {
        let redacted_url = redact_url(&config.url);
        let url = Url::parse(config.url.trim()).map_err(|e| DbError::InvalidUrl {
            url: redacted_url.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            inner: Arc::new(ClientInner {
                config,
                url,
                health: RwLock::new(DbHealth::new(redacted_url.clone())),
                redacted_url,
                connector,
                policy,
                current: RwLock::new(None),
                connecting: tokio::sync::Mutex::new(()),
                generation: AtomicU64::new(0),
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
        })
    }

    /// Open, authenticate, and select the namespace/database.
    ///
    /// On any failure the client is left Disconnected with the step's error.
    pub async fn connect(&self) -> Result<(), DbError> {
        self.inner.replace(None).await.map(|_| ())
    }

    /// Run `f` on a healthy connection, reconnecting and retrying on
    /// connection-class failures until the backoff policy runs out.
    pub async fn with_connection<T, F, Fut>(
        &self,
        ctx: &CancellationToken,
        f: F,
    ) -> Result<T, DbError>
    where
        F: Fn(Connection) -> Fut,
        Fut: Future<Output = Result<T, DbError>>,
    {
        let inner = &self.inner;
        let backoff = ExponentialBackoff::new(inner.policy);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let error = match inner.current_or_connect().await {
                Ok(current) => match f(current.conn.clone()).await {
                    Ok(value) => return Ok(value),
                    Err(e) if e.is_connection_error() => {
                        inner.mark_broken(current.generation, &e);
                        e
                    }
                    Err(e) => return Err(e),
                },
                Err(e) if e.is_connection_error() => e,
                Err(e) => return Err(e),
            };

            let Some(delay) = backoff.next_delay() else {
                logger::error(
                    LogTag::Database,
                    &format!(
                        "Giving up on {} after {} attempts: {}",
                        inner.redacted_url, attempts, error
                    ),
                );
                return Err(DbError::RetryExhausted {
                    attempts,
                    last: Box::new(error),
                });
            };

            logger::warning(
                LogTag::Database,
                &format!(
                    "Connection error on attempt {} ({}), retrying in {:?}",
                    attempts, error, delay
                ),
            );
            tokio::select! {
                _ = ctx.cancelled() => return Err(error),
                _ = inner.cancel.cancelled() => return Err(error),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Read query bounded by `query_timeout`
    pub async fn query(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        params: Value,
    ) -> Result<Value, DbError> {
        self.query_with_timeout(ctx, sql, params, self.inner.config.query_timeout)
            .await
    }

    /// Write statement bounded by `execute_timeout`
    pub async fn execute(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        params: Value,
    ) -> Result<Value, DbError> {
        self.run_timed("execute", ctx, sql, params, self.inner.config.execute_timeout)
            .await
    }

    /// Query with a per-call timeout override
    pub async fn query_with_timeout(
        &self,
        ctx: &CancellationToken,
        sql: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, DbError> {
        self.run_timed("query", ctx, sql, params, timeout).await
    }

    async fn run_timed(
        &self,
        operation: &str,
        ctx: &CancellationToken,
        sql: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, DbError> {
        let call = self.with_connection(ctx, |conn| {
            let params = params.clone();
            async move { conn.query(sql, params).await }
        });
        tokio::time::timeout(timeout, call)
            .await
            .map_err(|_| DbError::Timeout {
                operation: operation.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            })?
    }

    /// Ping the server once and record the outcome
    pub async fn health_check(&self) -> Result<Duration, DbError> {
        let inner = &self.inner;
        let Some(current) = inner.current() else {
            return Err(DbError::NotConnected);
        };
        let started = Instant::now();
        let timeout = inner.config.query_timeout;
        let result = match tokio::time::timeout(timeout, current.conn.version()).await {
            Ok(result) => result,
            Err(_) => Err(DbError::Timeout {
                operation: "health check".to_string(),
                timeout_ms: timeout.as_millis() as u64,
            }),
        };
        match result {
            Ok(_) => {
                let latency = started.elapsed();
                inner.health.write().record_success(latency.as_millis() as u64);
                Ok(latency)
            }
            Err(e) => {
                inner
                    .health
                    .write()
                    .record_failure(ConnectionState::Degraded, &e.to_string());
                logger::warning(
                    LogTag::Database,
                    &format!("Health check against {} failed: {}", inner.redacted_url, e),
                );
                Err(e)
            }
        }
    }

    /// Reconnect with backoff until it succeeds or the policy runs out
    pub async fn reconnect(&self, ctx: &CancellationToken) -> Result<(), DbError> {
        let inner = &self.inner;
        let backoff = ExponentialBackoff::new(inner.policy);
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let stale = inner.current().map(|c| c.generation);
            let error = match inner.replace(stale).await {
                Ok(_) => return Ok(()),
                Err(e) => e,
            };
            let Some(delay) = backoff.next_delay() else {
                return Err(DbError::RetryExhausted {
                    attempts,
                    last: Box::new(error),
                });
            };
            tokio::select! {
                _ = ctx.cancelled() => return Err(error),
                _ = inner.cancel.cancelled() => return Err(error),
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// Spawn the periodic health monitor
    pub fn start_health_monitor(&self, ctx: &CancellationToken) {
        let client = self.clone();
        let ctx = ctx.clone();
        let period = self.inner.config.health_interval;
        self.inner.tasks.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    _ = client.inner.cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if client.health_check().await.is_ok() {
                            continue;
                        }
                        if let Err(e) = client.reconnect(&ctx).await {
                            logger::error(
                                LogTag::Database,
                                &format!("Reconnection to {} failed: {}", client.inner.redacted_url, e),
                            );
                        }
                    }
                }
            }
        });
    }

    /// Stop the monitor and close the connection
    pub async fn close(&self) {
        let inner = &self.inner;
        inner.cancel.cancel();
        inner.tasks.close();
        inner.tasks.wait().await;
        let current = inner.current.write().take();
        if let Some(current) = current {
            current.conn.close().await;
        }
        inner.health.write().state = ConnectionState::Closed;
        logger::info(
            LogTag::Database,
            &format!("Closed connection to {}", inner.redacted_url),
        );
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.health.read().state
    }

    pub fn health(&self) -> DbHealth {
        self.inner.health.read().clone()
    }

    /// Bumped on every successful connect; live queries compare it to detect
    /// that their server-side state is gone
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    pub fn redacted_url(&self) -> &str {
        &self.inner.redacted_url
    }

    /// Current connection without reconnecting
    pub fn connection(&self) -> Option<Connection> {
        self.inner.current().map(|c| c.conn)
    }
}

impl ClientInner {
    fn current(&self) -> Option<Current> {
        self.current.read().clone()
    }

    fn set_state(&self, state: ConnectionState) {
        self.health.write().state = state;
    }

    async fn current_or_connect(&self) -> Result<Current, DbError> {
        if self.cancel.is_cancelled() {
            return Err(DbError::NotConnected);
        }
        if let Some(current) = self.current() {
            return Ok(current);
        }
        self.replace(None).await
    }

    /// Drop a broken connection unless someone already replaced it
    fn mark_broken(&self, generation: u64, error: &DbError) {
        let mut current = self.current.write();
        if current.as_ref().map(|c| c.generation) == Some(generation) {
            *current = None;
            drop(current);
            self.health
                .write()
                .record_failure(ConnectionState::Degraded, &error.to_string());
        }
    }

    /// Open a new connection in place of generation `stale`.
    ///
    /// Returns the current connection instead if another caller already did.
    async fn replace(&self, stale: Option<u64>) -> Result<Current, DbError> {
        let _guard = self.connecting.lock().await;
        if let Some(current) = self.current() {
            if Some(current.generation) != stale {
                return Ok(current);
            }
        }
        let old = self.current.write().take();
        if let Some(old) = old {
            old.conn.close().await;
        }
        self.open().await?;
        self.current().ok_or(DbError::NotConnected)
    }

    async fn open(&self) -> Result<(), DbError> {
        if self.cancel.is_cancelled() {
            return Err(DbError::NotConnected);
        }
        self.set_state(ConnectionState::Connecting);
        logger::debug(
            LogTag::Database,
            &format!("Connecting to {}", self.redacted_url),
        );

        match self.handshake().await {
            Ok(conn) => {
                let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
                *self.current.write() = Some(Current { generation, conn });
                {
                    let mut health = self.health.write();
                    health.record_success(0);
                    if generation > 1 {
                        health.reconnects += 1;
                    }
                }
                logger::info(
                    LogTag::Database,
                    &format!(
                        "Connected to {} ({}/{})",
                        self.redacted_url, self.config.namespace, self.config.database
                    ),
                );
                Ok(())
            }
            Err(e) => {
                self.health
                    .write()
                    .record_failure(ConnectionState::Disconnected, &e.to_string());
                logger::warning(
                    LogTag::Database,
                    &format!("Cannot connect to {}: {}", self.redacted_url, e),
                );
                Err(e)
            }
        }
    }

    async fn handshake(&self) -> Result<Connection, DbError> {
        let conn = self.connector.connect(&self.url).await?;

        if !self.config.username.is_empty() {
            if let Err(e) = conn
                .signin(&self.config.username, &self.config.password)
                .await
            {
                conn.close().await;
                return Err(if e.is_connection_error() {
                    e
                } else {
                    DbError::AuthFailed {
                        reason: e.to_string(),
                    }
                });
            }
        }

        if let Err(e) = conn
            .use_ns(&self.config.namespace, &self.config.database)
            .await
        {
            conn.close().await;
            return Err(if e.is_connection_error() {
                e
            } else {
                DbError::NamespaceFailed {
                    namespace: self.config.namespace.clone(),
                    database: self.config.database.clone(),
                    reason: e.to_string(),
                }
            });
        }
        self.set_state(ConnectionState::Authenticated);

        if let Err(e) = conn.version().await {
            conn.close().await;
            return Err(e);
        }
        Ok(conn)
    }
}
