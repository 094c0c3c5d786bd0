use crate::config::ServerConfig;
use crate::errors::FabricError;
use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use crate::webserver::{AppState, WebServer};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "webserver";

pub struct WebserverService {
    config: ServerConfig,
    state: AppState,
    running: Option<Running>,
}

struct Running {
    addr: SocketAddr,
    cancel: CancellationToken,
    handle: JoinHandle<Result<(), FabricError>>,
}

impl WebserverService {
    pub fn new(config: ServerConfig, state: AppState) -> Self {
        Self {
            config,
            state,
            running: None,
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.addr)
    }
}

#[async_trait]
impl Service for WebserverService {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        90
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![
            super::bridge_service::HTML_NAME,
            super::bridge_service::DATA_NAME,
        ]
    }

    /// Bind before spawning so a taken port fails startup
    async fn start(&mut self, ctx: CancellationToken) -> Result<(), FabricError> {
        let server = WebServer::bind(&self.config, self.state.clone()).await?;
        let addr = server.local_addr();
        let cancel = ctx.child_token();
        let handle = tokio::spawn(server.serve(cancel.clone()));
        self.running = Some(Running {
            addr,
            cancel,
            handle,
        });
        Ok(())
    }

    async fn stop(&mut self, deadline: Duration) -> Result<(), FabricError> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        running.cancel.cancel();
        match tokio::time::timeout(deadline, running.handle).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => Err(FabricError::service(NAME, format!("server task failed: {}", e))),
            Err(_) => {
                logger::warning(
                    LogTag::Webserver,
                    "Open connections outlived the shutdown deadline",
                );
                Ok(())
            }
        }
    }

    async fn health(&self) -> ServiceHealth {
        match &self.running {
            Some(running) if !running.handle.is_finished() => ServiceHealth::Healthy,
            Some(_) => ServiceHealth::Unhealthy("server task exited".to_string()),
            None => ServiceHealth::Stopping,
        }
    }
}
