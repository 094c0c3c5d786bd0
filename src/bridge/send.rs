/// Publishing helpers for the canonical endpoint topics
use super::kind::EndpointKind;
use crate::bus::{Message, Publisher};
use crate::errors::BusError;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

/// Publish `payload` once per listed kind on that kind's broadcast topic
pub async fn broadcast<P: Publisher + ?Sized>(
    bus: &P,
    ctx: &CancellationToken,
    kinds: &[EndpointKind],
    payload: impl Into<Bytes>,
) -> Result<(), BusError> {
    let payload = payload.into();
    for kind in kinds {
        bus.publish(ctx, Message::new(kind.broadcast_topic(), payload.clone()))
            .await?;
    }
    Ok(())
}

/// Publish `payload` to every `kind` client of `user_id`
pub async fn direct<P: Publisher + ?Sized>(
    bus: &P,
    ctx: &CancellationToken,
    kind: EndpointKind,
    user_id: &str,
    payload: impl Into<Bytes>,
) -> Result<(), BusError> {
    bus.publish(
        ctx,
        Message::new(kind.direct_topic(), payload).with_recipient(user_id),
    )
    .await
}

/// Publish `payload` to every client subscribed to `topic`
pub async fn send_topic<P: Publisher + ?Sized>(
    bus: &P,
    ctx: &CancellationToken,
    topic: &str,
    payload: impl Into<Bytes>,
) -> Result<(), BusError> {
    bus.publish(ctx, Message::new(topic, payload)).await
}
