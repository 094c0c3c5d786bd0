/// Axum host for the WebSocket endpoints
///
/// Binding is split from serving so port errors surface at startup instead of
/// inside a background task.
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ServerConfig,
    errors::FabricError,
    logger::{self, LogTag},
    webserver::{routes, state::AppState},
};

pub struct WebServer {
    listener: TcpListener,
    app: Router,
    addr: SocketAddr,
}

impl WebServer {
    pub async fn bind(config: &ServerConfig, state: AppState) -> Result<Self, FabricError> {
        let address = config.bind_address();
        let listener = TcpListener::bind(&address).await.map_err(|e| {
            let reason = match e.kind() {
                std::io::ErrorKind::AddrInUse => {
                    format!("cannot bind {}: address already in use", address)
                }
                std::io::ErrorKind::PermissionDenied => format!(
                    "cannot bind {}: permission denied (ports below 1024 need privileges)",
                    address
                ),
                _ => format!("cannot bind {}: {}", address, e),
            };
            FabricError::service("webserver", reason)
        })?;
        let addr = listener
            .local_addr()
            .map_err(|e| FabricError::service("webserver", e.to_string()))?;

        Ok(Self {
            listener,
            app: build_app(Arc::new(state)),
            addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Serve until `ctx` is cancelled, then finish in-flight requests
    pub async fn serve(self, ctx: CancellationToken) -> Result<(), FabricError> {
        logger::info(
            LogTag::Webserver,
            &format!(
                "Listening on http://{} (ws: /ws/html, /ws/data)",
                self.addr
            ),
        );

        let shutdown = async move {
            ctx.cancelled().await;
            logger::debug(LogTag::Webserver, "Shutdown requested, stopping listener");
        };
        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| FabricError::service("webserver", format!("server error: {}", e)))?;

        logger::info(LogTag::Webserver, "Webserver stopped");
        Ok(())
    }
}

fn build_app(state: Arc<AppState>) -> Router {
    routes::create_router(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{Bridge, EndpointKind};
    use crate::bus::InProcessBus;
    use crate::config::BridgeConfig;
    use crate::topics::TopicRegistry;
    use crate::webserver::HeaderAuthenticator;
    use futures::StreamExt;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_tungstenite::tungstenite::Message as WsMessage;

    const WAIT: Duration = Duration::from_secs(2);

    struct Running {
        addr: SocketAddr,
        html: Bridge,
        data: Bridge,
        ctx: CancellationToken,
    }

    async fn start() -> Running {
        start_with(|state| state.with_authenticator(Arc::new(HeaderAuthenticator::default()))).await
    }

    async fn start_with(setup: impl FnOnce(AppState) -> AppState) -> Running {
        let bus = Arc::new(InProcessBus::new(64));
        let registry = Arc::new(TopicRegistry::with_framework_topics().unwrap());
        let ctx = CancellationToken::new();
        let html = Bridge::new(EndpointKind::Html, bus.clone(), registry.clone(), BridgeConfig::default());
        let data = Bridge::new(EndpointKind::Data, bus, registry, BridgeConfig::default());
        html.start(&ctx).unwrap();
        data.start(&ctx).unwrap();

        let config = ServerConfig {
            port: 0,
            ..ServerConfig::default()
        };
        let server = WebServer::bind(&config, setup(AppState::new(html.clone(), data.clone())))
            .await
            .unwrap();
        let addr = server.local_addr();
        tokio::spawn(server.serve(ctx.clone()));
        Running { addr, html, data, ctx }
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
    async fn test_html_socket_receives_broadcast() {
        let server = start().await;
        let url = format!("ws://{}/ws/html?user=alice", server.addr);
        let (mut socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        wait_until(|| server.html.client_count() == 1).await;
        assert_eq!(server.data.client_count(), 0);
        let client = server.html.clients().remove(0);
        assert_eq!(client.user_id.as_deref(), Some("alice"));

        server
            .html
            .broadcast(&[EndpointKind::Html], "<div>hi</div>")
            .await
            .unwrap();
        let frame = tokio::time::timeout(WAIT, async {
            loop {
                match socket.next().await {
                    Some(Ok(WsMessage::Text(text))) => return text,
                    Some(Ok(_)) => continue,
                    other => panic!("socket ended: {:?}", other),
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(frame, "<div>hi</div>");
        server.ctx.cancel();
    }

    #[tokio::test]
    async fn test_claimed_identity_ignored_by_default() {
        let server = start_with(|state| state).await;
        let url = format!("ws://{}/ws/html?user=alice", server.addr);
        let (_socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();

        wait_until(|| server.html.client_count() == 1).await;
        assert_eq!(server.html.clients().remove(0).user_id, None);
        server.ctx.cancel();
    }

    #[tokio::test]
    async fn test_health_reports_clients() {
        let server = start().await;
        let url = format!("ws://{}/ws/data", server.addr);
        let (_socket, _) = tokio_tungstenite::connect_async(url).await.unwrap();
        wait_until(|| server.data.client_count() == 1).await;

        let mut tcp = tokio::net::TcpStream::connect(server.addr).await.unwrap();
        tcp.write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut raw = String::new();
        tokio::time::timeout(WAIT, tcp.read_to_string(&mut raw))
            .await
            .unwrap()
            .unwrap();

        assert!(raw.starts_with("HTTP/1.1 200"));
        let body = &raw[raw.find("\r\n\r\n").unwrap() + 4..];
        let health: serde_json::Value = serde_json::from_str(body).unwrap();
        assert_eq!(health["status"], "ok");
        assert_eq!(health["data"]["clients"], 1);
        assert_eq!(health["html"]["clients"], 0);
        assert!(health["database"].is_null());
        server.ctx.cancel();
    }

    #[tokio::test]
    async fn test_bind_conflict_is_reported() {
        let server = start().await;
        let config = ServerConfig {
            port: server.addr.port(),
            ..ServerConfig::default()
        };
        let err = WebServer::bind(&config, AppState::new(server.html.clone(), server.data.clone()))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("address already in use"));
        server.ctx.cancel();
    }
}
