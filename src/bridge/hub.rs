/// WebSocket bridge - one instance per endpoint kind
///
/// The bridge owns:
/// - The clients map and each client's egress queue
/// - The topic -> client subscriptions map
/// - One bus subscription per routed topic (broadcast, direct, and every topic
///   at least one client subscribed to)
///
/// Every client runs a reader task and a writer task. Either one exiting
/// cancels the other; the reader then removes the client and emits
/// `<kind>.client.disconnected`.
use super::client::{Client, ClientDirectory, ClientInfo};
use super::connection::WsConnection;
use super::frame::{InboundAction, InboundFrame, WsFrame};
use super::health::{ConnectionHealth, HealthConfig, IngressBudget};
use super::kind::EndpointKind;
use super::lifecycle::LifecycleEvent;
use super::metrics::{BridgeMetrics, BridgeMetricsSnapshot};
use super::send;
use crate::bus::{Message, SharedBus, Subscription};
use crate::config::BridgeConfig;
use crate::errors::{BridgeError, RegistryError};
use crate::logger::{self, LogTag};
use crate::topics::{is_lifecycle_topic, validate_topic_name, TopicRegistry, TopicRole, CLIENT_MODULE};
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// How a routed bus message picks its recipients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Broadcast,
    Direct,
    Topic,
}

/// Serializable bridge status for `/health`
#[derive(Debug, Clone, Serialize)]
pub struct BridgeStats {
    pub endpoint: EndpointKind,
    pub clients: usize,
    pub subscribed_topics: Vec<String>,
    pub metrics: BridgeMetricsSnapshot,
}

#[derive(Clone)]
pub struct Bridge {
    inner: Arc<BridgeInner>,
}

struct BridgeInner {
    kind: EndpointKind,
    bus: SharedBus,
    registry: Arc<TopicRegistry>,
    config: BridgeConfig,
    directory: ClientDirectory,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    subscriptions: RwLock<HashMap<String, HashSet<String>>>,
    watchers: Mutex<HashMap<String, CancellationToken>>,
    started: AtomicBool,
    accepting: AtomicBool,
    /// Parent of every router, watcher and client token
    root: CancellationToken,
    routers: TaskTracker,
    client_tasks: TaskTracker,
    metrics: BridgeMetrics,
}

impl Bridge {
    pub fn new(
        kind: EndpointKind,
        bus: SharedBus,
        registry: Arc<TopicRegistry>,
        config: BridgeConfig,
    ) -> Self {
        Self::with_directory(kind, bus, registry, config, ClientDirectory::new())
    }

    /// Bridges sharing a directory keep client ids unique across endpoints
    pub fn with_directory(
        kind: EndpointKind,
        bus: SharedBus,
        registry: Arc<TopicRegistry>,
        config: BridgeConfig,
        directory: ClientDirectory,
    ) -> Self {
        Self {
            inner: Arc::new(BridgeInner {
                kind,
                bus,
                registry,
                config,
                directory,
                clients: RwLock::new(HashMap::new()),
                subscriptions: RwLock::new(HashMap::new()),
                watchers: Mutex::new(HashMap::new()),
                started: AtomicBool::new(false),
                accepting: AtomicBool::new(true),
                root: CancellationToken::new(),
                routers: TaskTracker::new(),
                client_tasks: TaskTracker::new(),
                metrics: BridgeMetrics::default(),
            }),
        }
    }

    pub fn kind(&self) -> EndpointKind {
        self.inner.kind
    }

    /// Begin routing this endpoint's broadcast and direct topics.
    ///
    /// Idempotent. Cancelling `ctx` stops routing and disconnects clients.
    pub fn start(&self, ctx: &CancellationToken) -> Result<(), BridgeError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let broadcast = inner.bus.register(inner.kind.broadcast_topic())?;
        let direct = inner.bus.register(inner.kind.direct_topic())?;

        let root = inner.root.clone();
        let ctx = ctx.clone();
        inner.routers.spawn(async move {
            tokio::select! {
                _ = ctx.cancelled() => root.cancel(),
                _ = root.cancelled() => {}
            }
        });

        inner.routers.spawn(run_router(
            inner.clone(),
            broadcast,
            Route::Broadcast,
            inner.root.clone(),
        ));
        inner.routers.spawn(run_router(
            inner.clone(),
            direct,
            Route::Direct,
            inner.root.clone(),
        ));

        logger::info(
            LogTag::Bridge,
            &format!("{} bridge started", inner.kind),
        );
        Ok(())
    }

    /// Attach a fresh client and emit `<kind>.client.ready`
    pub async fn accept<C: WsConnection>(
        &self,
        client_id: impl Into<String>,
        user_id: Option<String>,
        conn: C,
    ) -> Result<(), BridgeError> {
        let inner = &self.inner;
        let client_id = client_id.into();

        if !inner.accepting.load(Ordering::SeqCst) || inner.root.is_cancelled() {
            return Err(BridgeError::ShuttingDown);
        }
        if !inner.directory.claim(&client_id) {
            return Err(BridgeError::DuplicateClient { client_id });
        }

        let client = Arc::new(Client::new(
            client_id.clone(),
            inner.kind,
            user_id,
            inner.config.egress_queue_capacity,
            inner.root.child_token(),
        ));
        inner.clients.write().insert(client_id.clone(), client.clone());
        inner.metrics.connection_opened();

        inner
            .publish_lifecycle(inner.kind.ready_topic(), &client, None)
            .await;

        let (sink, stream) = conn.split();
        let writer = inner
            .client_tasks
            .spawn(run_writer(inner.clone(), client.clone(), sink));
        inner
            .client_tasks
            .spawn(run_reader(inner.clone(), client.clone(), stream, writer));

        logger::info(
            LogTag::Bridge,
            &format!(
                "{} client {} connected (user: {}, active: {})",
                inner.kind,
                client_id,
                client.user_id.as_deref().unwrap_or("anonymous"),
                inner.clients.read().len()
            ),
        );
        Ok(())
    }

    /// Stop accepting, flush and close every client, join background tasks.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), BridgeError> {
        let inner = &self.inner;
        let started = Instant::now();
        inner.accepting.store(false, Ordering::SeqCst);

        let clients: Vec<Arc<Client>> = inner.clients.read().values().cloned().collect();
        logger::info(
            LogTag::Bridge,
            &format!(
                "Shutting down {} bridge ({} clients)",
                inner.kind,
                clients.len()
            ),
        );

        // Writers drain what is queued, send a close frame and exit.
        for client in &clients {
            client.egress.close();
        }

        inner.client_tasks.close();
        if tokio::time::timeout(deadline, inner.client_tasks.wait())
            .await
            .is_err()
        {
            logger::warning(
                LogTag::Bridge,
                &format!(
                    "{} bridge: {} clients still open at deadline, cancelling",
                    inner.kind,
                    inner.clients.read().len()
                ),
            );
        }

        inner.root.cancel();
        inner.routers.close();
        let remaining = deadline.saturating_sub(started.elapsed());
        if tokio::time::timeout(remaining, async {
            inner.client_tasks.wait().await;
            inner.routers.wait().await;
        })
        .await
        .is_err()
        {
            logger::warning(
                LogTag::Bridge,
                &format!("{} bridge: background tasks did not stop in time", inner.kind),
            );
            return Err(BridgeError::ShuttingDown);
        }

        logger::info(
            LogTag::Bridge,
            &format!("{} bridge stopped", inner.kind),
        );
        Ok(())
    }

    /// Publish once per kind on the kind's broadcast topic
    pub async fn broadcast(
        &self,
        kinds: &[EndpointKind],
        payload: impl Into<Bytes>,
    ) -> Result<(), BridgeError> {
        send::broadcast(self.inner.bus.as_ref(), &self.inner.root, kinds, payload).await?;
        Ok(())
    }

    /// Publish to every client of `user_id` on this endpoint
    pub async fn direct(&self, user_id: &str, payload: impl Into<Bytes>) -> Result<(), BridgeError> {
        send::direct(
            self.inner.bus.as_ref(),
            &self.inner.root,
            self.inner.kind,
            user_id,
            payload,
        )
        .await?;
        Ok(())
    }

    /// Publish to every client subscribed to `topic`
    pub async fn send_topic(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), BridgeError> {
        send::send_topic(self.inner.bus.as_ref(), &self.inner.root, topic, payload).await?;
        Ok(())
    }

    pub fn client_count(&self) -> usize {
        self.inner.clients.read().len()
    }

    pub fn clients(&self) -> Vec<ClientInfo> {
        let mut clients: Vec<ClientInfo> = self
            .inner
            .clients
            .read()
            .values()
            .map(|c| c.info())
            .collect();
        clients.sort_by(|a, b| a.client_id.cmp(&b.client_id));
        clients
    }

    pub fn client(&self, client_id: &str) -> Option<ClientInfo> {
        self.inner.clients.read().get(client_id).map(|c| c.info())
    }

    /// Client ids subscribed to `topic`
    pub fn subscribers(&self, topic: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .inner
            .subscriptions
            .read()
            .get(topic)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn stats(&self) -> BridgeStats {
        let mut subscribed_topics: Vec<String> =
            self.inner.subscriptions.read().keys().cloned().collect();
        subscribed_topics.sort();
        BridgeStats {
            endpoint: self.inner.kind,
            clients: self.client_count(),
            subscribed_topics,
            metrics: self.inner.metrics.snapshot(),
        }
    }
}

impl BridgeInner {
    fn route(&self, route: Route, message: &Message) {
        let targets: Vec<Arc<Client>> = match route {
            Route::Broadcast => self.clients.read().values().cloned().collect(),
            Route::Direct => {
                let Some(recipient) = message.recipient_id() else {
                    logger::debug(
                        LogTag::Bridge,
                        &format!("{}: dropping direct message without recipient_id", self.kind),
                    );
                    return;
                };
                self.clients
                    .read()
                    .values()
                    .filter(|c| c.matches_user(recipient))
                    .cloned()
                    .collect()
            }
            Route::Topic => {
                let ids: Vec<String> = self
                    .subscriptions
                    .read()
                    .get(&message.topic)
                    .map(|set| set.iter().cloned().collect())
                    .unwrap_or_default();
                let clients = self.clients.read();
                ids.iter().filter_map(|id| clients.get(id).cloned()).collect()
            }
        };

        if targets.is_empty() {
            return;
        }

        let frame = self.kind.encode(message);
        for client in &targets {
            self.deliver(client, frame.clone());
        }
    }

    fn deliver(&self, client: &Client, frame: WsFrame) {
        if client.enqueue(frame) == super::egress::PushOutcome::DroppedOldest {
            self.metrics.message_dropped();
            logger::debug(
                LogTag::Bridge,
                &format!(
                    "{}",
                    BridgeError::EgressDropped {
                        client_id: client.id.clone()
                    }
                ),
            );
        }
    }

    async fn publish_lifecycle(&self, topic: &str, client: &Client, reason: Option<&str>) {
        let mut event = LifecycleEvent::new(&client.id, client.user_id.as_deref(), self.kind);
        if let Some(reason) = reason {
            event = event.with_reason(reason);
        }
        let message = match Message::json(topic, &event) {
            Ok(message) => message,
            Err(e) => {
                logger::error(
                    LogTag::Bridge,
                    &format!("Cannot encode lifecycle event for {}: {}", client.id, e),
                );
                return;
            }
        };
        let message = match &client.user_id {
            Some(user) => message.with_user(user.clone()),
            None => message,
        };
        if let Err(e) = self.bus.publish(&self.root, message).await {
            logger::warning(
                LogTag::Bridge,
                &format!("Cannot publish {} for {}: {}", topic, client.id, e),
            );
        }
    }

    async fn handle_inbound(self: &Arc<Self>, client: &Client, text: &str) -> Result<(), BridgeError> {
        let frame = InboundFrame::parse(text)?;
        match frame.action {
            InboundAction::Subscribe => self.subscribe_client(client, &frame.topic),
            InboundAction::Unsubscribe => {
                self.unsubscribe_client(client, &frame.topic);
                Ok(())
            }
            InboundAction::Publish => self.publish_from_client(client, frame).await,
        }
    }

    fn subscribe_client(self: &Arc<Self>, client: &Client, topic: &str) -> Result<(), BridgeError> {
        validate_topic_name(topic)?;
        if is_lifecycle_topic(topic) || EndpointKind::is_endpoint_topic(topic) {
            return Err(RegistryError::AccessDenied {
                name: topic.to_string(),
                module: CLIENT_MODULE.to_string(),
                role: TopicRole::Subscribe.to_string(),
                reason: "endpoint topics are routed by the bridge".to_string(),
            }
            .into());
        }
        if !self.registry.check_topic_exists(topic) {
            return Err(BridgeError::UnknownTopic {
                topic: topic.to_string(),
            });
        }
        self.registry
            .validate_topic_access(topic, CLIENT_MODULE, TopicRole::Subscribe)?;

        self.subscriptions
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(client.id.clone());
        client.add_topic(topic);

        if let Err(e) = self.sync_watcher(topic) {
            self.detach_topic(client, topic);
            return Err(e);
        }

        logger::debug(
            LogTag::Bridge,
            &format!("{} client {} subscribed to {}", self.kind, client.id, topic),
        );
        Ok(())
    }

    fn unsubscribe_client(self: &Arc<Self>, client: &Client, topic: &str) {
        if self.detach_topic(client, topic) {
            logger::debug(
                LogTag::Bridge,
                &format!("{} client {} unsubscribed from {}", self.kind, client.id, topic),
            );
        }
    }

    /// Remove one client/topic binding and stop the watcher if it was the last
    fn detach_topic(self: &Arc<Self>, client: &Client, topic: &str) -> bool {
        client.remove_topic(topic);
        let removed = {
            let mut subscriptions = self.subscriptions.write();
            let removed = subscriptions
                .get_mut(topic)
                .map(|set| set.remove(&client.id))
                .unwrap_or(false);
            if subscriptions.get(topic).map(HashSet::is_empty).unwrap_or(false) {
                subscriptions.remove(topic);
            }
            removed
        };
        // Stopping a watcher never fails.
        let _ = self.sync_watcher(topic);
        removed
    }

    /// Make the bus watcher for `topic` match whether anyone is subscribed
    fn sync_watcher(self: &Arc<Self>, topic: &str) -> Result<(), BridgeError> {
        let mut watchers = self.watchers.lock();
        let wanted = self
            .subscriptions
            .read()
            .get(topic)
            .map(|set| !set.is_empty())
            .unwrap_or(false);

        match (wanted, watchers.contains_key(topic)) {
            (true, false) => {
                let subscription = self.bus.register(topic)?;
                let token = self.root.child_token();
                watchers.insert(topic.to_string(), token.clone());
                self.routers
                    .spawn(run_router(self.clone(), subscription, Route::Topic, token));
                logger::debug(
                    LogTag::Bridge,
                    &format!("{}: watching {}", self.kind, topic),
                );
            }
            (false, true) => {
                if let Some(token) = watchers.remove(topic) {
                    token.cancel();
                }
                logger::debug(
                    LogTag::Bridge,
                    &format!("{}: stopped watching {}", self.kind, topic),
                );
            }
            _ => {}
        }
        Ok(())
    }

    async fn publish_from_client(&self, client: &Client, frame: InboundFrame) -> Result<(), BridgeError> {
        self.registry
            .validate_topic_access(&frame.topic, CLIENT_MODULE, TopicRole::Publish)
            .map_err(|e| match e {
                RegistryError::NotRegistered { name } => BridgeError::UnknownTopic { topic: name },
                other => other.into(),
            })?;

        let mut message = Message::new(frame.topic.clone(), frame.payload_bytes());
        message.metadata = frame.meta;
        message
            .metadata
            .insert("client_id".to_string(), client.id.clone());
        message
            .metadata
            .insert("endpoint".to_string(), self.kind.as_str().to_string());
        message.user_id = client.user_id.clone();

        self.bus.publish(&self.root, message).await?;
        self.metrics.inbound_published();
        logger::debug(
            LogTag::Bridge,
            &format!("{} client {} published on {}", self.kind, client.id, frame.topic),
        );
        Ok(())
    }

    /// Count an inbound failure; true when the client must be disconnected
    fn note_inbound_error(&self, client: &Client, budget: &mut IngressBudget, err: &BridgeError) -> bool {
        if let BridgeError::UnknownAction { action } = err {
            logger::warning(
                LogTag::Bridge,
                &format!("{} client {}: ignoring unknown action {:?}", self.kind, client.id, action),
            );
            return false;
        }

        if !err.is_ingress_error() {
            logger::warning(
                LogTag::Bridge,
                &format!("{} client {}: {}", self.kind, client.id, err),
            );
            return false;
        }

        client.metrics.inc_ingress_errors();
        self.metrics.ingress_error();
        logger::warning(
            LogTag::Bridge,
            &format!("{} client {}: rejected frame: {}", self.kind, client.id, err),
        );

        if budget.record_error() {
            logger::warning(
                LogTag::Bridge,
                &format!(
                    "{}",
                    BridgeError::IngressOverload {
                        client_id: client.id.clone(),
                        errors: budget.errors_in_window(),
                    }
                ),
            );
            return true;
        }
        false
    }

    async fn remove_client(self: &Arc<Self>, client: &Arc<Client>, reason: &str) {
        if !client.mark_closed() {
            return;
        }
        client.egress.close();
        self.clients.write().remove(&client.id);
        self.directory.release(&client.id);
        for topic in client.take_topics() {
            {
                let mut subscriptions = self.subscriptions.write();
                if let Some(set) = subscriptions.get_mut(&topic) {
                    set.remove(&client.id);
                    if set.is_empty() {
                        subscriptions.remove(&topic);
                    }
                }
            }
            let _ = self.sync_watcher(&topic);
        }
        self.metrics.connection_closed();

        self.publish_lifecycle(self.kind.disconnected_topic(), client, Some(reason))
            .await;

        let metrics = client.metrics.snapshot();
        logger::info(
            LogTag::Bridge,
            &format!(
                "{} client {} disconnected: {} (sent={}, dropped={}, ingress_errors={})",
                self.kind,
                client.id,
                reason,
                metrics.messages_sent,
                metrics.messages_dropped,
                metrics.ingress_errors
            ),
        );
    }
}

async fn run_router(
    inner: Arc<BridgeInner>,
    mut subscription: Subscription,
    route: Route,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            next = subscription.recv() => match next {
                Some(message) => inner.route(route, &message),
                None => {
                    logger::debug(
                        LogTag::Bridge,
                        &format!("{}: bus closed {}", inner.kind, subscription.topic()),
                    );
                    break;
                }
            }
        }
    }
}

async fn run_writer<S>(inner: Arc<BridgeInner>, client: Arc<Client>, mut sink: S)
where
    S: Sink<WsFrame, Error = BridgeError> + Unpin,
{
    loop {
        tokio::select! {
            biased;
            _ = client.cancel.cancelled() => break,
            frame = client.egress.pop() => match frame {
                Some(frame) => {
                    client.metrics.set_queue_size(client.egress.len());
                    if let Err(e) = sink.send(frame).await {
                        logger::debug(
                            LogTag::Bridge,
                            &format!("{} client {}: write failed: {}", inner.kind, client.id, e),
                        );
                        break;
                    }
                    client.metrics.inc_sent();
                    inner.metrics.message_sent();
                }
                None => break,
            }
        }
    }

    let close_timeout = inner.config.close_timeout;
    let _ = tokio::time::timeout(close_timeout, async {
        sink.send(WsFrame::Close).await?;
        sink.close().await
    })
    .await;
    client.cancel.cancel();
}

async fn run_reader<S>(inner: Arc<BridgeInner>, client: Arc<Client>, mut stream: S, writer: JoinHandle<()>)
where
    S: Stream<Item = Result<WsFrame, BridgeError>> + Unpin,
{
    let mut health = ConnectionHealth::new(HealthConfig {
        heartbeat_interval: inner.config.heartbeat_interval,
        max_missed_pongs: inner.config.max_missed_pongs,
    });
    let mut budget = IngressBudget::per_minute(inner.config.max_ingress_errors_per_minute);
    let period = health.heartbeat_interval();
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let reason = loop {
        tokio::select! {
            biased;
            _ = client.cancel.cancelled() => break "closed by server",
            _ = ticker.tick() => {
                if health.is_timed_out() {
                    inner.metrics.heartbeat_timeout();
                    logger::warning(
                        LogTag::Bridge,
                        &format!(
                            "{}",
                            BridgeError::HeartbeatTimeout {
                                client_id: client.id.clone(),
                                missed: health.missed_pongs(),
                            }
                        ),
                    );
                    break "heartbeat timeout";
                }
                if client.egress.push_control(WsFrame::Ping(Vec::new())) {
                    health.record_ping();
                }
            }
            next = stream.next() => match next {
                Some(Ok(WsFrame::Text(text))) => {
                    health.record_activity();
                    client.touch();
                    if let Err(e) = inner.handle_inbound(&client, &text).await {
                        if inner.note_inbound_error(&client, &mut budget, &e) {
                            break "ingress overload";
                        }
                    }
                }
                Some(Ok(WsFrame::Binary(_))) => {
                    health.record_activity();
                    let err = BridgeError::malformed("binary frames are not supported");
                    if inner.note_inbound_error(&client, &mut budget, &err) {
                        break "ingress overload";
                    }
                }
                Some(Ok(WsFrame::Pong(_))) => {
                    health.record_pong();
                    client.touch();
                    inner
                        .publish_lifecycle(inner.kind.heartbeat_topic(), &client, None)
                        .await;
                }
                Some(Ok(WsFrame::Ping(_))) => {
                    health.record_activity();
                    client.touch();
                }
                Some(Ok(WsFrame::Close)) | None => break "client closed",
                Some(Err(e)) => {
                    logger::debug(
                        LogTag::Bridge,
                        &format!("{} client {}: read failed: {}", inner.kind, client.id, e),
                    );
                    break "transport error";
                }
            }
        }
    };

    client.cancel.cancel();
    let _ = writer.await;
    inner.remove_client(&client, reason).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::memory::{pair, MemoryPeer};
    use crate::bus::{InProcessBus, Publisher, Subscriber};
    use crate::topics::{define_module, TopicConfig};
    use serde_json::Value;

    const WAIT: Duration = Duration::from_secs(2);

    struct Harness {
        bus: Arc<InProcessBus>,
        registry: Arc<TopicRegistry>,
        ctx: CancellationToken,
        directory: ClientDirectory,
    }

    impl Harness {
        fn new() -> Self {
            let registry = TopicRegistry::with_framework_topics().unwrap();
            for name in ["chat.messages", "chat.other"] {
                registry
                    .register(define_module(TopicConfig::new(name).module("chat")).unwrap())
                    .unwrap();
            }
            Self {
                bus: Arc::new(InProcessBus::new(64)),
                registry: Arc::new(registry),
                ctx: CancellationToken::new(),
                directory: ClientDirectory::new(),
            }
        }

        fn bridge(&self, kind: EndpointKind) -> Bridge {
            self.bridge_with(kind, BridgeConfig::default())
        }

        fn bridge_with(&self, kind: EndpointKind, config: BridgeConfig) -> Bridge {
            let bridge = Bridge::with_directory(
                kind,
                self.bus.clone(),
                self.registry.clone(),
                config,
                self.directory.clone(),
            );
            bridge.start(&self.ctx).unwrap();
            bridge
        }

        async fn publish(&self, message: Message) {
            self.bus.publish(&self.ctx, message).await.unwrap();
        }
    }

    async fn connect(bridge: &Bridge, id: &str, user: Option<&str>) -> MemoryPeer {
        let (conn, peer) = pair();
        bridge
            .accept(id, user.map(str::to_string), conn)
            .await
            .unwrap();
        peer
    }

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    #[tokio::test]
    async fn test_broadcast_reaches_only_matching_kind() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let data = h.bridge(EndpointKind::Data);
        let mut a = connect(&html, "a", None).await;
        let mut b = connect(&html, "b", None).await;
        let mut c = connect(&data, "c", None).await;

        h.publish(Message::new("ws.html.broadcast", "<div>hi</div>"))
            .await;

        assert_eq!(a.next_text(WAIT).await.as_deref(), Some("<div>hi</div>"));
        assert_eq!(b.next_text(WAIT).await.as_deref(), Some("<div>hi</div>"));
        assert_eq!(c.next_text(Duration::from_millis(100)).await, None);
        assert!(a.drain_texts().is_empty());
        assert!(b.drain_texts().is_empty());
    }

    #[tokio::test]
    async fn test_direct_delivery_by_recipient() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let mut a = connect(&html, "a", Some("alice@x")).await;
        let mut b = connect(&html, "b", Some("alice@x")).await;
        let mut c = connect(&html, "c", Some("bob")).await;

        h.publish(Message::new("ws.html.direct", "HELLO").with_recipient("alice@x"))
            .await;

        assert_eq!(a.next_text(WAIT).await.as_deref(), Some("HELLO"));
        assert_eq!(b.next_text(WAIT).await.as_deref(), Some("HELLO"));
        assert_eq!(c.next_text(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn test_direct_without_recipient_is_dropped() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let mut a = connect(&html, "a", Some("alice@x")).await;

        h.publish(Message::new("ws.html.direct", "HELLO")).await;

        assert_eq!(a.next_text(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn test_subscribe_only_receives_its_topic() {
        let h = Harness::new();
        let data = h.bridge(EndpointKind::Data);
        let mut y = connect(&data, "y", None).await;

        y.send_text(r#"{"action":"subscribe","topic":"chat.messages"}"#);
        wait_until(|| data.subscribers("chat.messages") == vec!["y".to_string()]).await;

        h.publish(Message::new("chat.messages", r#"{"text":"P1"}"#))
            .await;
        h.publish(Message::new("chat.other", r#"{"text":"P2"}"#)).await;

        let text = y.next_text(WAIT).await.unwrap();
        let envelope: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope["topic"], "chat.messages");
        assert_eq!(envelope["payload"]["text"], "P1");
        assert_eq!(y.next_text(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn test_subscribe_unsubscribe_subscribe_is_single_subscription() {
        let h = Harness::new();
        let data = h.bridge(EndpointKind::Data);
        let mut y = connect(&data, "y", None).await;

        y.send_text(r#"{"action":"subscribe","topic":"chat.messages"}"#);
        y.send_text(r#"{"action":"unsubscribe","topic":"chat.messages"}"#);
        y.send_text(r#"{"action":"subscribe","topic":"chat.messages"}"#);
        wait_until(|| data.client("y").map(|c| c.topics.len()) == Some(1)).await;
        wait_until(|| h.bus.subscriber_count("chat.messages") == 1).await;

        h.publish(Message::new("chat.messages", "once")).await;
        let text = y.next_text(WAIT).await.unwrap();
        let envelope: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(envelope["payload"], "once");
        assert_eq!(y.next_text(Duration::from_millis(100)).await, None);
    }

    #[tokio::test]
    async fn test_lifecycle_and_unknown_topics_cannot_be_subscribed() {
        let h = Harness::new();
        let data = h.bridge(EndpointKind::Data);
        let y = connect(&data, "y", None).await;

        y.send_text(r#"{"action":"subscribe","topic":"ws.data.client.ready"}"#);
        y.send_text(r#"{"action":"subscribe","topic":"ws.html.direct"}"#);
        y.send_text(r#"{"action":"subscribe","topic":"chat.nope"}"#);
        wait_until(|| data.client("y").map(|c| c.metrics.ingress_errors) == Some(3)).await;

        assert!(data.stats().subscribed_topics.is_empty());
        assert_eq!(data.client_count(), 1);
    }

    #[tokio::test]
    async fn test_client_publish_reaches_bus() {
        let h = Harness::new();
        let data = h.bridge(EndpointKind::Data);
        let mut sub = h.bus.register("chat.messages").unwrap();
        let y = connect(&data, "y", Some("alice@x")).await;

        y.send_text(
            r#"{"action":"publish","topic":"chat.messages","payload":{"text":"hi"},"meta":{"room":"lobby"}}"#,
        );

        let msg = tokio::time::timeout(WAIT, sub.recv()).await.unwrap().unwrap();
        assert_eq!(msg.user_id.as_deref(), Some("alice@x"));
        assert_eq!(msg.metadata.get("room").map(String::as_str), Some("lobby"));
        assert_eq!(msg.metadata.get("client_id").map(String::as_str), Some("y"));
        let payload: Value = msg.payload_json().unwrap();
        assert_eq!(payload["text"], "hi");
    }

    #[tokio::test]
    async fn test_client_cannot_publish_framework_topics() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let mut sub = h.bus.register("ws.html.broadcast").unwrap();
        let y = connect(&html, "y", None).await;

        y.send_text(r#"{"action":"publish","topic":"ws.html.broadcast","payload":"<p>x</p>"}"#);
        wait_until(|| html.client("y").map(|c| c.metrics.ingress_errors) == Some(1)).await;

        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_malformed_frames_disconnect_only_on_sustained_abuse() {
        let h = Harness::new();
        let config = BridgeConfig {
            max_ingress_errors_per_minute: 3,
            ..BridgeConfig::default()
        };
        let html = h.bridge_with(EndpointKind::Html, config);
        let mut disconnected = h.bus.register("ws.html.client.disconnected").unwrap();
        let y = connect(&html, "y", None).await;

        y.send_text("{not json");
        y.send_text(r#"{"action":"dance","topic":"chat.messages"}"#);
        wait_until(|| html.client("y").map(|c| c.metrics.ingress_errors) == Some(1)).await;
        assert_eq!(html.client_count(), 1);

        for _ in 0..3 {
            y.send_text("still not json");
        }
        wait_until(|| html.client_count() == 0).await;

        let msg = tokio::time::timeout(WAIT, disconnected.recv())
            .await
            .unwrap()
            .unwrap();
        let event: LifecycleEvent = msg.payload_json().unwrap();
        assert_eq!(event.client_id, "y");
        assert_eq!(event.reason.as_deref(), Some("ingress overload"));
    }

    #[tokio::test]
    async fn test_accept_emits_ready_and_close_emits_disconnected() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let mut ready = h.bus.register("ws.html.client.ready").unwrap();
        let mut gone = h.bus.register("ws.html.client.disconnected").unwrap();

        let peer = connect(&html, "a", Some("alice@x")).await;
        let msg = ready.recv().await.unwrap();
        let event: LifecycleEvent = msg.payload_json().unwrap();
        assert_eq!(event.client_id, "a");
        assert_eq!(event.user_id.as_deref(), Some("alice@x"));

        peer.close();
        wait_until(|| html.client_count() == 0).await;
        let msg = tokio::time::timeout(WAIT, gone.recv()).await.unwrap().unwrap();
        let event: LifecycleEvent = msg.payload_json().unwrap();
        assert_eq!(event.client_id, "a");
        assert_eq!(html.stats().metrics.active_connections, 0);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_subscriptions_and_watchers() {
        let h = Harness::new();
        let data = h.bridge(EndpointKind::Data);
        let y = connect(&data, "y", None).await;

        y.send_text(r#"{"action":"subscribe","topic":"chat.messages"}"#);
        wait_until(|| h.bus.subscriber_count("chat.messages") == 1).await;

        drop(y);
        wait_until(|| data.client_count() == 0).await;
        wait_until(|| h.bus.subscriber_count("chat.messages") == 0).await;
        assert!(data.subscribers("chat.messages").is_empty());
    }

    #[tokio::test]
    async fn test_client_ids_unique_across_endpoints() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let data = h.bridge(EndpointKind::Data);
        let _a = connect(&html, "same", None).await;

        let (conn, _peer) = pair();
        let err = data.accept("same", None, conn).await.unwrap_err();
        assert_eq!(
            err,
            BridgeError::DuplicateClient {
                client_id: "same".into()
            }
        );
    }

    #[tokio::test]
    async fn test_slow_client_drops_oldest_without_blocking_others() {
        let h = Harness::new();
        let config = BridgeConfig {
            egress_queue_capacity: 2,
            ..BridgeConfig::default()
        };
        let html = h.bridge_with(EndpointKind::Html, config);

        // Server half that is never polled for writes: the queue fills up.
        let (conn, peer) = pair();
        let client = Arc::new(Client::new(
            "slow".into(),
            EndpointKind::Html,
            None,
            2,
            CancellationToken::new(),
        ));
        html.inner.clients.write().insert("slow".into(), client.clone());
        let mut fast = connect(&html, "fast", None).await;

        for i in 0..5 {
            h.publish(Message::new("ws.html.broadcast", format!("m{}", i)))
                .await;
        }

        for i in 0..5 {
            assert_eq!(fast.next_text(WAIT).await, Some(format!("m{}", i)));
        }
        wait_until(|| client.info().metrics.messages_dropped == 3).await;
        assert_eq!(html.stats().metrics.total_messages_dropped, 3);
        drop((conn, peer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missed_pongs_close_the_connection() {
        let h = Harness::new();
        let config = BridgeConfig {
            heartbeat_interval: Duration::from_secs(1),
            ..BridgeConfig::default()
        };
        let html = h.bridge_with(EndpointKind::Html, config);
        let mut gone = h.bus.register("ws.html.client.disconnected").unwrap();
        let _peer = connect(&html, "quiet", Some("alice@x")).await;

        let msg = tokio::time::timeout(Duration::from_secs(10), gone.recv())
            .await
            .unwrap()
            .unwrap();
        let event: LifecycleEvent = msg.payload_json().unwrap();
        assert_eq!(event.reason.as_deref(), Some("heartbeat timeout"));
        assert_eq!(html.stats().metrics.heartbeat_timeouts, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pong_publishes_heartbeat() {
        let h = Harness::new();
        let config = BridgeConfig {
            heartbeat_interval: Duration::from_secs(1),
            ..BridgeConfig::default()
        };
        let data = h.bridge_with(EndpointKind::Data, config);
        let mut beats = h.bus.register("ws.data.client.heartbeat").unwrap();
        let mut peer = connect(&data, "c", Some("bob")).await;

        let ping = tokio::time::timeout(Duration::from_secs(5), peer.next_frame())
            .await
            .unwrap();
        assert_eq!(ping, Some(WsFrame::Ping(Vec::new())));
        peer.send(WsFrame::Pong(Vec::new()));

        let msg = tokio::time::timeout(Duration::from_secs(5), beats.recv())
            .await
            .unwrap()
            .unwrap();
        let event: LifecycleEvent = msg.payload_json().unwrap();
        assert_eq!(event.user_id.as_deref(), Some("bob"));
    }

    #[tokio::test]
    async fn test_shutdown_sends_close_and_rejects_new_clients() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let mut peer = connect(&html, "a", None).await;

        h.publish(Message::new("ws.html.broadcast", "bye")).await;
        assert_eq!(peer.next_text(WAIT).await.as_deref(), Some("bye"));

        html.shutdown(WAIT).await.unwrap();
        assert_eq!(peer.next_frame().await, Some(WsFrame::Close));
        assert_eq!(html.client_count(), 0);

        let (conn, _peer) = pair();
        assert_eq!(
            html.accept("b", None, conn).await.unwrap_err(),
            BridgeError::ShuttingDown
        );
        wait_until(|| h.bus.subscriber_count("ws.html.broadcast") == 0).await;
    }

    #[tokio::test]
    async fn test_start_is_idempotent() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        html.start(&h.ctx).unwrap();
        assert_eq!(h.bus.subscriber_count("ws.html.broadcast"), 1);
    }

    #[tokio::test]
    async fn test_convenience_senders() {
        let h = Harness::new();
        let html = h.bridge(EndpointKind::Html);
        let data = h.bridge(EndpointKind::Data);
        let mut a = connect(&html, "a", Some("alice@x")).await;
        let mut d = connect(&data, "d", Some("alice@x")).await;

        html.broadcast(&EndpointKind::ALL, "all").await.unwrap();
        assert_eq!(a.next_text(WAIT).await.as_deref(), Some("all"));
        let envelope: Value = serde_json::from_str(&d.next_text(WAIT).await.unwrap()).unwrap();
        assert_eq!(envelope["topic"], "ws.data.broadcast");

        html.direct("alice@x", "only html").await.unwrap();
        assert_eq!(a.next_text(WAIT).await.as_deref(), Some("only html"));
        assert_eq!(d.next_text(Duration::from_millis(100)).await, None);
    }
}
