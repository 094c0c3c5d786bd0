/// Process-local bus implementation
///
/// Each subscriber owns a bounded mpsc queue. Publishing walks the topic's
/// subscriber list under a read lock and uses `try_send`, so a full queue costs
/// one dropped message for that subscriber and nothing for anyone else.
use super::{Bus, BusMetrics, BusStats, Message, Publisher, Result, Subscriber, Subscription};
use crate::errors::BusError;
use crate::logger::{self, LogTag};
use crate::topics::validate_topic_name;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

type SubscriberId = u64;

struct SubscriberSlot {
    id: SubscriberId,
    tx: mpsc::Sender<Arc<Message>>,
}

struct BusInner {
    topics: RwLock<HashMap<String, Vec<SubscriberSlot>>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    shut_down: AtomicBool,
    metrics: BusMetrics,
}

impl BusInner {
    fn remove(&self, topic: &str, id: SubscriberId) {
        let mut topics = self.topics.write();
        let Some(slots) = topics.get_mut(topic) else {
            return;
        };
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        if slots.len() < before {
            self.metrics.subscriber_removed();
        }
        if slots.is_empty() {
            topics.remove(topic);
        }
    }
}

#[derive(Clone)]
pub struct InProcessBus {
    inner: Arc<BusInner>,
}

impl InProcessBus {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                shut_down: AtomicBool::new(false),
                metrics: BusMetrics::default(),
            }),
        }
    }

    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner
            .topics
            .read()
            .get(topic)
            .map(Vec::len)
            .unwrap_or(0)
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Publisher for InProcessBus {
    async fn publish(&self, ctx: &CancellationToken, message: Message) -> Result<()> {
        validate_topic_name(&message.topic)?;
        if self.is_shut_down() {
            return Err(BusError::Fatal {
                reason: "bus shut down".to_string(),
            });
        }
        if ctx.is_cancelled() {
            logger::verbose(
                LogTag::Bus,
                &format!("Publish on {} with a cancelled context; delivering anyway", message.topic),
            );
        }

        let inner = &self.inner;
        inner.metrics.inc_published();

        let message = Arc::new(message);
        let mut delivered = 0usize;
        let mut dropped = 0usize;
        let mut gone = Vec::new();

        {
            let topics = inner.topics.read();
            if let Some(slots) = topics.get(&message.topic) {
                for slot in slots {
                    match slot.tx.try_send(message.clone()) {
                        Ok(()) => {
                            delivered += 1;
                            inner.metrics.inc_delivered();
                        }
                        Err(mpsc::error::TrySendError::Full(_)) => {
                            dropped += 1;
                            inner.metrics.inc_dropped();
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => gone.push(slot.id),
                    }
                }
            }
        }

        for id in gone {
            inner.remove(&message.topic, id);
        }

        if dropped > 0 {
            logger::warning(
                LogTag::Bus,
                &format!(
                    "{}: {} subscriber queue(s) full, message dropped for them",
                    message.topic, dropped
                ),
            );
        }
        logger::debug(
            LogTag::Bus,
            &format!(
                "Published {} ({} bytes, delivered={}, dropped={})",
                message.topic,
                message.payload.len(),
                delivered,
                dropped
            ),
        );

        Ok(())
    }
}

#[async_trait]
impl Subscriber for InProcessBus {
    fn register(&self, topic: &str) -> Result<Subscription> {
        validate_topic_name(topic)?;
        if self.is_shut_down() {
            return Err(BusError::Fatal {
                reason: "bus shut down".to_string(),
            });
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .push(SubscriberSlot { id, tx });
        self.inner.metrics.subscriber_added();

        logger::debug(
            LogTag::Bus,
            &format!("Subscriber {} registered on {}", id, topic),
        );

        let weak: Weak<BusInner> = Arc::downgrade(&self.inner);
        let owned_topic = topic.to_string();
        Ok(Subscription::new(topic, rx, move || {
            if let Some(inner) = weak.upgrade() {
                inner.remove(&owned_topic, id);
            }
        }))
    }
}

impl Bus for InProcessBus {
    fn stats(&self) -> BusStats {
        self.inner.metrics.snapshot()
    }

    fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut topics = self.inner.topics.write();
        let closed: usize = topics.values().map(Vec::len).sum();
        for _ in 0..closed {
            self.inner.metrics.subscriber_removed();
        }
        topics.clear();
        logger::info(
            LogTag::Bus,
            &format!("Bus shut down ({} subscriptions closed)", closed),
        );
    }

    fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{run_subscription, MessageHandler};
    use std::time::Duration;
    use tokio::sync::Mutex;

    #[tokio::test]
    async fn test_fan_out_to_every_subscriber() {
        let bus = InProcessBus::new(8);
        let ctx = CancellationToken::new();
        let mut a = bus.register("chat.messages").unwrap();
        let mut b = bus.register("chat.messages").unwrap();
        let mut other = bus.register("chat.other").unwrap();

        bus.publish(&ctx, Message::new("chat.messages", "P1"))
            .await
            .unwrap();

        assert_eq!(a.recv().await.unwrap().payload_str(), "P1");
        assert_eq!(b.recv().await.unwrap().payload_str(), "P1");
        assert!(other.try_recv().is_none());
        assert_eq!(bus.stats().delivered, 2);
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_succeeds() {
        let bus = InProcessBus::new(8);
        let ctx = CancellationToken::new();
        assert!(bus.publish(&ctx, Message::new("nobody.listens", "x")).await.is_ok());
        assert_eq!(bus.stats().published, 1);
    }

    #[tokio::test]
    async fn test_invalid_topic_rejected() {
        let bus = InProcessBus::new(8);
        let ctx = CancellationToken::new();
        let err = bus
            .publish(&ctx, Message::new("Chat..messages", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, BusError::InvalidTopic { .. }));
        assert!(bus.register("bad topic").is_err());
    }

    #[tokio::test]
    async fn test_full_queue_drops_without_blocking() {
        let bus = InProcessBus::new(2);
        let ctx = CancellationToken::new();
        let mut slow = bus.register("feed.ticks").unwrap();

        for i in 0..5 {
            bus.publish(&ctx, Message::new("feed.ticks", format!("{}", i)))
                .await
                .unwrap();
        }

        let stats = bus.stats();
        assert_eq!(stats.delivered, 2);
        assert_eq!(stats.dropped, 3);
        assert_eq!(slow.recv().await.unwrap().payload_str(), "0");
        assert_eq!(slow.recv().await.unwrap().payload_str(), "1");
    }

    #[tokio::test]
    async fn test_cancelled_publish_context_still_delivers() {
        let bus = InProcessBus::new(8);
        let ctx = CancellationToken::new();
        ctx.cancel();
        let mut sub = bus.register("chat.messages").unwrap();
        bus.publish(&ctx, Message::new("chat.messages", "late"))
            .await
            .unwrap();
        assert!(sub.try_recv().is_some());
    }

    #[tokio::test]
    async fn test_dropping_subscription_unregisters() {
        let bus = InProcessBus::new(8);
        let sub = bus.register("chat.messages").unwrap();
        assert_eq!(bus.subscriber_count("chat.messages"), 1);
        drop(sub);
        assert_eq!(bus.subscriber_count("chat.messages"), 0);
        assert_eq!(bus.stats().active_subscribers, 0);
    }

    #[tokio::test]
    async fn test_subscribe_preserves_order_and_returns_cancelled() {
        let bus = InProcessBus::new(16);
        let ctx = CancellationToken::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_in_handler = seen.clone();
        let handler: Arc<dyn MessageHandler> = Arc::new(move |msg: Arc<Message>| {
            let seen = seen_in_handler.clone();
            async move {
                seen.lock().await.push(msg.payload_str().to_string());
                Ok::<(), BusError>(())
            }
        });

        let subscription = bus.register("chat.messages").unwrap();
        let sub_ctx = ctx.child_token();
        let task = tokio::spawn(async move { run_subscription(&sub_ctx, subscription, handler).await });

        for i in 0..5 {
            bus.publish(&ctx, Message::new("chat.messages", format!("m{}", i)))
                .await
                .unwrap();
        }

        tokio::time::timeout(Duration::from_secs(2), async {
            while seen.lock().await.len() < 5 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        ctx.cancel();
        let result = task.await.unwrap();
        assert_eq!(result, Err(BusError::Cancelled));
        assert_eq!(*seen.lock().await, vec!["m0", "m1", "m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn test_shutdown_ends_subscriptions_with_fatal() {
        let bus = InProcessBus::new(8);
        let ctx = CancellationToken::new();
        let handler: Arc<dyn MessageHandler> =
            Arc::new(|_msg: Arc<Message>| async { Ok::<(), BusError>(()) });

        let bus_for_task = bus.clone();
        let task_ctx = ctx.clone();
        let task = tokio::spawn(async move {
            bus_for_task
                .subscribe(&task_ctx, "chat.messages", handler)
                .await
        });

        tokio::time::timeout(Duration::from_secs(2), async {
            while bus.subscriber_count("chat.messages") == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        bus.shutdown();
        let result = task.await.unwrap();
        assert!(matches!(result, Err(BusError::Fatal { .. })));
        assert!(matches!(
            bus.publish(&ctx, Message::new("chat.messages", "x")).await,
            Err(BusError::Fatal { .. })
        ));
    }
}
