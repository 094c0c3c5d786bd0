/// HTML fragment rendering
///
/// The fabric never builds markup itself. A `Renderer` turns a component into
/// bytes and the helpers below push the result through the html bridge topics.
use crate::bridge::{self, EndpointKind};
use crate::bus::Publisher;
use crate::errors::RenderError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use bytes::Bytes;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Renderer<C: ?Sized + Sync>: Send + Sync {
    async fn render(&self, ctx: &CancellationToken, component: &C) -> Result<Bytes, RenderError>;
}

/// A component that knows its own markup
pub trait Fragment: Send + Sync {
    fn name(&self) -> &str;

    fn to_html(&self) -> Result<String, String>;
}

/// Renderer for `Fragment` components
#[derive(Debug, Clone, Copy, Default)]
pub struct FragmentRenderer;

#[async_trait]
impl<C: Fragment + ?Sized> Renderer<C> for FragmentRenderer {
    async fn render(&self, ctx: &CancellationToken, component: &C) -> Result<Bytes, RenderError> {
        if ctx.is_cancelled() {
            return Err(RenderError::Failed {
                component: component.name().to_string(),
                reason: "cancelled".to_string(),
            });
        }
        component
            .to_html()
            .map(Bytes::from)
            .map_err(|reason| RenderError::Failed {
                component: component.name().to_string(),
                reason,
            })
    }
}

async fn render_logged<R, C>(
    renderer: &R,
    ctx: &CancellationToken,
    component: &C,
) -> Result<Bytes, RenderError>
where
    R: Renderer<C> + ?Sized,
    C: ?Sized + Sync,
{
    renderer.render(ctx, component).await.map_err(|e| {
        logger::warning(LogTag::Bridge, &format!("Render failed: {}", e));
        e
    })
}

/// Render and publish on `ws.html.broadcast`
pub async fn publish_broadcast<R, C, P>(
    renderer: &R,
    bus: &P,
    ctx: &CancellationToken,
    component: &C,
) -> Result<(), RenderError>
where
    R: Renderer<C> + ?Sized,
    C: ?Sized + Sync,
    P: Publisher + ?Sized,
{
    let html = render_logged(renderer, ctx, component).await?;
    bridge::broadcast(bus, ctx, &[EndpointKind::Html], html).await?;
    Ok(())
}

/// Render and publish on `ws.html.direct` for every connection of `user_id`
pub async fn publish_direct<R, C, P>(
    renderer: &R,
    bus: &P,
    ctx: &CancellationToken,
    user_id: &str,
    component: &C,
) -> Result<(), RenderError>
where
    R: Renderer<C> + ?Sized,
    C: ?Sized + Sync,
    P: Publisher + ?Sized,
{
    let html = render_logged(renderer, ctx, component).await?;
    bridge::direct(bus, ctx, EndpointKind::Html, user_id, html).await?;
    Ok(())
}

/// Render and publish on an application topic
pub async fn publish_topic<R, C, P>(
    renderer: &R,
    bus: &P,
    ctx: &CancellationToken,
    topic: &str,
    component: &C,
) -> Result<(), RenderError>
where
    R: Renderer<C> + ?Sized,
    C: ?Sized + Sync,
    P: Publisher + ?Sized,
{
    let html = render_logged(renderer, ctx, component).await?;
    bridge::send_topic(bus, ctx, topic, html).await?;
    Ok(())
}
