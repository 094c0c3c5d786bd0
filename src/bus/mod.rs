//! In-process publish/subscribe bus
//!
//! This module contains:
//! - `Publisher` / `Subscriber` traits: the interface every component codes against
//! - `MessageHandler`: sequential per-subscription message processing
//! - `InProcessBus`: bounded per-subscriber queues, drop-on-full fan-out
//!
//! Delivery is at-least-once to local subscribers with per-topic FIFO from a
//! single publisher. A slow subscriber never blocks a publisher.

mod in_process;
mod message;
mod metrics;

pub use in_process::InProcessBus;
pub use message::Message;
pub use metrics::{BusMetrics, BusStats};

use crate::errors::BusError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result type for bus operations.
pub type Result<T> = std::result::Result<T, BusError>;

/// Handler for messages delivered to a subscription.
pub trait MessageHandler: Send + Sync {
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<()>>;
}

impl<F, Fut> MessageHandler for F
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn handle(&self, message: Arc<Message>) -> BoxFuture<'static, Result<()>> {
        Box::pin(self(message))
    }
}

/// A registered delivery queue for one topic.
///
/// Dropping it unregisters the subscriber.
pub struct Subscription {
    topic: String,
    rx: mpsc::Receiver<Arc<Message>>,
    on_drop: Option<Box<dyn FnOnce() + Send>>,
}

impl Subscription {
    pub fn new(
        topic: impl Into<String>,
        rx: mpsc::Receiver<Arc<Message>>,
        on_drop: impl FnOnce() + Send + 'static,
    ) -> Self {
        Self {
            topic: topic.into(),
            rx,
            on_drop: Some(Box::new(on_drop)),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next message; `None` once the bus has shut down
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Message>> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(on_drop) = self.on_drop.take() {
            on_drop();
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("topic", &self.topic)
            .finish()
    }
}

#[async_trait]
pub trait Publisher: Send + Sync {
    /// Hand `message` to every current subscriber queue of its topic.
    ///
    /// Never fails because of subscriber absence or slowness. Cancelling `ctx`
    /// does not cancel delivery.
    async fn publish(&self, ctx: &CancellationToken, message: Message) -> Result<()>;
}

#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Register a delivery queue immediately; messages published after this
    /// call returns are queued for the caller.
    fn register(&self, topic: &str) -> Result<Subscription>;

    /// Process messages for `topic` one at a time until `ctx` is cancelled.
    ///
    /// Returns `Cancelled` on cancellation and `Fatal` when the bus shuts down.
    async fn subscribe(
        &self,
        ctx: &CancellationToken,
        topic: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<()> {
        let subscription = self.register(topic)?;
        run_subscription(ctx, subscription, handler).await
    }
}

/// Drive a registered subscription with a handler.
pub async fn run_subscription(
    ctx: &CancellationToken,
    mut subscription: Subscription,
    handler: Arc<dyn MessageHandler>,
) -> Result<()> {
    loop {
        tokio::select! {
            biased;
            _ = ctx.cancelled() => return Err(BusError::Cancelled),
            next = subscription.recv() => match next {
                Some(message) => {
                    if let Err(e) = handler.handle(message).await {
                        logger::warning(
                            LogTag::Bus,
                            &format!("Handler for {} failed: {}", subscription.topic(), e),
                        );
                    }
                }
                None => {
                    return Err(BusError::Fatal {
                        reason: "bus shut down".to_string(),
                    })
                }
            }
        }
    }
}

/// Full bus interface used for wiring.
pub trait Bus: Publisher + Subscriber {
    fn stats(&self) -> BusStats;

    /// Close every subscription; later publishes fail with `Fatal`
    fn shutdown(&self);

    fn is_shut_down(&self) -> bool;
}

pub type SharedBus = Arc<dyn Bus>;
