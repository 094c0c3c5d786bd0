/// Presence service: single owning task fed by bridge lifecycle topics
///
/// All mutations happen inside `run_owner`. Reads go through the latest
/// `PresenceView` published on a watch channel, so callers never contend
/// with the event loop.
use super::options::PresenceOptions;
use super::snapshot::{PresenceSnapshot, StatusSnapshot, UserPresence};
use super::state::{PresenceEvent, PresenceState};
use crate::bridge::{EndpointKind, LifecycleEvent};
use crate::bus::{Message, SharedBus, Subscription};
use crate::errors::BusError;
use crate::logger::{self, LogTag};
use crate::topics::PRESENCE_USER_STATUS;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Read-side copy of the whole aggregate
#[derive(Debug, Clone, Default)]
pub struct PresenceView {
    pub users: BTreeMap<String, UserPresence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleKind {
    Ready,
    Disconnected,
    Heartbeat,
}

#[derive(Clone)]
pub struct PresenceService {
    inner: Arc<PresenceInner>,
}

struct PresenceInner {
    bus: SharedBus,
    options: PresenceOptions,
    view: watch::Sender<Arc<PresenceView>>,
    cancel: CancellationToken,
    tasks: TaskTracker,
    started: AtomicBool,
}

impl PresenceService {
    pub fn new(bus: SharedBus, options: PresenceOptions) -> Self {
        let (view, _) = watch::channel(Arc::new(PresenceView::default()));
        Self {
            inner: Arc::new(PresenceInner {
                bus,
                options,
                view,
                cancel: CancellationToken::new(),
                tasks: TaskTracker::new(),
                started: AtomicBool::new(false),
            }),
        }
    }

    pub fn options(&self) -> PresenceOptions {
        self.inner.options
    }

    /// Subscribe to every lifecycle topic and spawn the owning task.
    ///
    /// Subscriptions are registered before this returns, so events published
    /// afterwards are never missed.
    pub fn start(&self, ctx: &CancellationToken) -> Result<(), BusError> {
        let inner = &self.inner;
        if inner.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut subscriptions = Vec::new();
        for kind in EndpointKind::ALL {
            for topic in [
                kind.ready_topic(),
                kind.disconnected_topic(),
                kind.heartbeat_topic(),
            ] {
                subscriptions.push(inner.bus.register(topic)?);
            }
        }

        let events = stream::select_all(subscriptions.into_iter().map(subscription_stream));
        inner
            .tasks
            .spawn(run_owner(inner.clone(), events, ctx.clone()));

        logger::info(
            LogTag::Presence,
            &format!(
                "Presence started (debounce={:?}, stale={:?}, cleanup={:?}, rate_limit={:?})",
                inner.options.offline_debounce,
                inner.options.stale_threshold,
                inner.options.cleanup_interval,
                inner.options.rate_limit
            ),
        );
        Ok(())
    }

    /// Sorted ids of users currently online (including debounce windows)
    pub fn get_online_users(&self) -> Vec<String> {
        self.view()
            .users
            .values()
            .filter(|user| user.online)
            .map(|user| user.user_id.clone())
            .collect()
    }

    pub fn get_presence(&self, user_id: &str) -> Option<UserPresence> {
        self.view().users.get(user_id).cloned()
    }

    pub fn is_user_online(&self, user_id: &str) -> bool {
        self.view()
            .users
            .get(user_id)
            .is_some_and(|user| user.online)
    }

    pub fn online_count(&self) -> usize {
        self.get_online_users().len()
    }

    pub fn view(&self) -> Arc<PresenceView> {
        self.inner.view.borrow().clone()
    }

    /// Per-user connection counts for online users
    pub fn status(&self) -> StatusSnapshot {
        StatusSnapshot::new(status_counts(&self.view()))
    }

    /// Publish the current status on `presence.user.status`
    pub async fn publish_status(&self) -> Result<(), BusError> {
        publish_status(&self.inner, &self.view()).await
    }

    pub fn is_running(&self) -> bool {
        self.inner.started.load(Ordering::SeqCst) && !self.inner.tasks.is_empty()
    }

    /// Stop timers and join the owning task.
    ///
    /// Snapshots still held back by the rate limiter are discarded.
    pub async fn shutdown(&self, deadline: Duration) -> Result<(), BusError> {
        let inner = &self.inner;
        inner.cancel.cancel();
        inner.tasks.close();
        if tokio::time::timeout(deadline, inner.tasks.wait())
            .await
            .is_err()
        {
            logger::warning(
                LogTag::Presence,
                "Presence task did not stop before the shutdown deadline",
            );
            return Err(BusError::Cancelled);
        }
        logger::info(LogTag::Presence, "Presence stopped");
        Ok(())
    }
}

fn subscription_stream(subscription: Subscription) -> BoxStream<'static, Arc<Message>> {
    stream::unfold(subscription, |mut subscription| async move {
        subscription
            .recv()
            .await
            .map(|message| (message, subscription))
    })
    .boxed()
}

fn classify(topic: &str) -> Option<LifecycleKind> {
    EndpointKind::ALL.iter().find_map(|kind| {
        if topic == kind.ready_topic() {
            Some(LifecycleKind::Ready)
        } else if topic == kind.disconnected_topic() {
            Some(LifecycleKind::Disconnected)
        } else if topic == kind.heartbeat_topic() {
            Some(LifecycleKind::Heartbeat)
        } else {
            None
        }
    })
}

/// Anonymous clients carry no user and do not count towards presence
fn decode(message: &Message) -> Option<PresenceEvent> {
    let kind = classify(&message.topic)?;
    let event: LifecycleEvent = match message.payload_json() {
        Ok(event) => event,
        Err(e) => {
            logger::warning(
                LogTag::Presence,
                &format!("Ignoring malformed lifecycle event on {}: {}", message.topic, e),
            );
            return None;
        }
    };
    let user_id = event.user_id.or_else(|| message.user_id.clone())?;
    let client_id = event.client_id;
    Some(match kind {
        LifecycleKind::Ready => PresenceEvent::Ready { user_id, client_id },
        LifecycleKind::Disconnected => PresenceEvent::Disconnected { user_id, client_id },
        LifecycleKind::Heartbeat => PresenceEvent::Heartbeat { user_id, client_id },
    })
}

fn status_counts(view: &PresenceView) -> BTreeMap<String, usize> {
    view.users
        .values()
        .filter(|user| user.online)
        .map(|user| (user.user_id.clone(), user.connection_count()))
        .collect()
}

async fn publish_status(inner: &PresenceInner, view: &PresenceView) -> Result<(), BusError> {
    let status = StatusSnapshot::new(status_counts(view));
    let message = Message::json(PRESENCE_USER_STATUS, &status).map_err(|e| BusError::Fatal {
        reason: format!("cannot encode presence status: {}", e),
    })?;
    inner.bus.publish(&inner.cancel, message).await
}

async fn emit(inner: &PresenceInner, snapshots: Vec<PresenceSnapshot>) {
    for snapshot in snapshots {
        let topic = snapshot.kind.topic();
        let message = match Message::json(topic, &snapshot) {
            Ok(message) => message.with_user(snapshot.user_id.clone()),
            Err(e) => {
                logger::error(
                    LogTag::Presence,
                    &format!("Cannot encode presence snapshot: {}", e),
                );
                continue;
            }
        };
        match inner.bus.publish(&inner.cancel, message).await {
            Ok(()) => logger::debug(
                LogTag::Presence,
                &format!(
                    "{} -> {} ({} online)",
                    snapshot.user_id,
                    topic,
                    snapshot.users.len()
                ),
            ),
            Err(e) => logger::warning(
                LogTag::Presence,
                &format!("Cannot publish {} for {}: {}", topic, snapshot.user_id, e),
            ),
        }
    }
}

fn refresh_view(inner: &PresenceInner, state: &PresenceState) {
    inner.view.send_replace(Arc::new(PresenceView {
        users: state.view(),
    }));
}

async fn run_owner(
    inner: Arc<PresenceInner>,
    mut events: stream::SelectAll<BoxStream<'static, Arc<Message>>>,
    ctx: CancellationToken,
) {
    let mut state = PresenceState::new(inner.options);
    let cleanup = inner.options.cleanup_interval;
    let mut gc = tokio::time::interval_at(Instant::now() + cleanup, cleanup);
    gc.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = state.next_deadline();
        let timer = async move {
            match deadline {
                Some(at) => tokio::time::sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = inner.cancel.cancelled() => break,
            _ = ctx.cancelled() => break,
            next = events.next() => match next {
                Some(message) => {
                    let Some(event) = decode(&message) else { continue };
                    let snapshots = state.apply(event, Instant::now());
                    refresh_view(&inner, &state);
                    emit(&inner, snapshots).await;
                }
                None => {
                    logger::warning(LogTag::Presence, "Lifecycle subscriptions closed");
                    break;
                }
            },
            _ = timer => {
                let snapshots = state.poll(Instant::now());
                refresh_view(&inner, &state);
                emit(&inner, snapshots).await;
            }
            _ = gc.tick() => {
                let now = Instant::now();
                let reclaimed = state.sweep_stale(now);
                let snapshots = state.poll(now);
                refresh_view(&inner, &state);
                emit(&inner, snapshots).await;
                if reclaimed > 0 {
                    logger::info(
                        LogTag::Presence,
                        &format!("Reclaimed {} stale connection(s)", reclaimed),
                    );
                    let view = inner.view.borrow().clone();
                    if let Err(e) = publish_status(&inner, &view).await {
                        logger::warning(
                            LogTag::Presence,
                            &format!("Cannot publish presence status: {}", e),
                        );
                    }
                }
            }
        }
    }

    let discarded = state.pending_snapshots();
    if discarded > 0 {
        logger::info(
            LogTag::Presence,
            &format!("Discarded {} coalesced snapshot(s) on shutdown", discarded),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, Publisher, Subscriber};
    use crate::presence::PresenceKind;
    use crate::topics::{PRESENCE_USER_OFFLINE, PRESENCE_USER_ONLINE};

    struct Harness {
        bus: Arc<InProcessBus>,
        presence: PresenceService,
        ctx: CancellationToken,
        online: Subscription,
        offline: Subscription,
    }

    impl Harness {
        fn new(options: PresenceOptions) -> Self {
            let bus = Arc::new(InProcessBus::new(256));
            let ctx = CancellationToken::new();
            let presence = PresenceService::new(bus.clone(), options);
            presence.start(&ctx).unwrap();
            let online = bus.register(PRESENCE_USER_ONLINE).unwrap();
            let offline = bus.register(PRESENCE_USER_OFFLINE).unwrap();
            Self {
                bus,
                presence,
                ctx,
                online,
                offline,
            }
        }

        async fn lifecycle(&self, topic: &str, client: &str, user: &str) {
            let event = LifecycleEvent::new(client, Some(user), EndpointKind::Html);
            self.bus
                .publish(&self.ctx, Message::json(topic, &event).unwrap())
                .await
                .unwrap();
            // Let the owner task drain the event before time moves on.
            tokio::task::yield_now().await;
            tokio::task::yield_now().await;
        }

        async fn ready(&self, client: &str, user: &str) {
            self.lifecycle("ws.html.client.ready", client, user).await;
        }

        async fn gone(&self, client: &str, user: &str) {
            self.lifecycle("ws.html.client.disconnected", client, user)
                .await;
        }

        fn drain(sub: &mut Subscription) -> Vec<PresenceSnapshot> {
            let mut out = Vec::new();
            while let Some(message) = sub.try_recv() {
                out.push(message.payload_json().unwrap());
            }
            out
        }
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_page_reload_is_debounced() {
        let mut h = Harness::new(PresenceOptions::default());

        h.ready("x", "u").await;
        advance(Duration::from_secs(1)).await;
        h.gone("x", "u").await;
        advance(Duration::from_secs(1)).await;
        h.ready("x", "u").await;
        advance(Duration::from_secs(8)).await;

        let online = Harness::drain(&mut h.online);
        assert_eq!(online.len(), 1);
        assert_eq!(online[0].user_id, "u");
        assert_eq!(online[0].users, vec!["u"]);
        assert!(Harness::drain(&mut h.offline).is_empty());
        assert!(h.presence.is_user_online("u"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_offline_emitted_after_debounce() {
        let mut h = Harness::new(PresenceOptions::default());

        h.ready("x", "u").await;
        advance(Duration::from_secs(1)).await;
        h.gone("x", "u").await;

        advance(Duration::from_millis(4900)).await;
        assert!(Harness::drain(&mut h.offline).is_empty());
        assert!(h.presence.is_user_online("u"));
        assert!(h.presence.get_presence("u").unwrap().pending_offline);

        advance(Duration::from_millis(200)).await;
        let offline = Harness::drain(&mut h.offline);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].kind, PresenceKind::Offline);
        assert!(offline[0].users.is_empty());
        assert!(!h.presence.is_user_online("u"));
        assert!(h.presence.get_online_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_coalesces_bursts() {
        let options = PresenceOptions::default()
            .with_offline_debounce(Duration::ZERO)
            .with_rate_limit(Duration::from_secs(1));
        let mut h = Harness::new(options);

        for i in 0..10 {
            let client = format!("c{}", i);
            h.ready(&client, "u").await;
            advance(Duration::from_millis(10)).await;
            h.gone(&client, "u").await;
            advance(Duration::from_millis(10)).await;
        }

        let during = Harness::drain(&mut h.online).len() + Harness::drain(&mut h.offline).len();
        assert!(during <= 1, "{} snapshots inside the window", during);

        advance(Duration::from_millis(700)).await;
        assert!(Harness::drain(&mut h.offline).is_empty());

        advance(Duration::from_millis(200)).await;
        let offline = Harness::drain(&mut h.offline);
        assert_eq!(offline.len(), 1);
        assert!(offline[0].users.is_empty());
        assert!(Harness::drain(&mut h.online).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_gc_reclaims_silent_connections() {
        let options = PresenceOptions::default()
            .with_stale_threshold(Duration::from_secs(3))
            .with_cleanup_interval(Duration::from_secs(1))
            .with_offline_debounce(Duration::from_secs(1));
        let mut h = Harness::new(options);
        let mut status = h.bus.register(PRESENCE_USER_STATUS).unwrap();

        h.ready("quiet", "u").await;
        h.ready("chatty", "v").await;
        for _ in 0..5 {
            advance(Duration::from_secs(1)).await;
            h.lifecycle("ws.html.client.heartbeat", "chatty", "v").await;
        }
        advance(Duration::from_secs(2)).await;

        let offline = Harness::drain(&mut h.offline);
        assert_eq!(offline.len(), 1);
        assert_eq!(offline[0].user_id, "u");
        assert!(h.presence.is_user_online("v"));

        let message = status.try_recv().unwrap();
        let snapshot: StatusSnapshot = message.payload_json().unwrap();
        assert_eq!(snapshot.kind, "status");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_counts_connections() {
        let h = Harness::new(PresenceOptions::default());
        h.ready("a1", "alice").await;
        h.ready("a2", "alice").await;
        h.ready("b1", "bob").await;
        advance(Duration::from_millis(10)).await;

        let status = h.presence.status();
        assert_eq!(status.users, vec!["alice", "bob"]);
        assert_eq!(status.counts["alice"], 2);
        assert_eq!(status.counts["bob"], 1);

        let mut sub = h.bus.register(PRESENCE_USER_STATUS).unwrap();
        h.presence.publish_status().await.unwrap();
        let snapshot: StatusSnapshot = sub.try_recv().unwrap().payload_json().unwrap();
        assert_eq!(snapshot, status);
    }

    #[tokio::test(start_paused = true)]
    async fn test_anonymous_clients_are_ignored() {
        let h = Harness::new(PresenceOptions::default());
        let event = LifecycleEvent::new("anon", None, EndpointKind::Data);
        h.bus
            .publish(&h.ctx, Message::json("ws.data.client.ready", &event).unwrap())
            .await
            .unwrap();
        advance(Duration::from_millis(10)).await;
        assert!(h.presence.get_online_users().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_discards_coalesced_snapshots() {
        let options = PresenceOptions::default().with_offline_debounce(Duration::ZERO);
        let mut h = Harness::new(options);

        h.ready("x", "u").await;
        advance(Duration::from_millis(100)).await;
        h.gone("x", "u").await;
        assert_eq!(Harness::drain(&mut h.online).len(), 1);

        h.presence.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(!h.presence.is_running());
        advance(Duration::from_secs(2)).await;
        assert!(Harness::drain(&mut h.offline).is_empty());
    }
}
