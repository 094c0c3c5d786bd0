use crate::bridge::{Bridge, EndpointKind};
use crate::errors::FabricError;
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const HTML_NAME: &str = "html-bridge";
pub const DATA_NAME: &str = "data-bridge";

pub fn service_name(kind: EndpointKind) -> &'static str {
    match kind {
        EndpointKind::Html => HTML_NAME,
        EndpointKind::Data => DATA_NAME,
    }
}

pub struct BridgeService {
    bridge: Bridge,
    running: bool,
}

impl BridgeService {
    pub fn new(bridge: Bridge) -> Self {
        Self {
            bridge,
            running: false,
        }
    }
}

#[async_trait]
impl Service for BridgeService {
    fn name(&self) -> &'static str {
        service_name(self.bridge.kind())
    }

    fn priority(&self) -> i32 {
        40
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![super::bus_service::NAME]
    }

    async fn start(&mut self, ctx: CancellationToken) -> Result<(), FabricError> {
        self.bridge.start(&ctx)?;
        self.running = true;
        Ok(())
    }

    async fn stop(&mut self, deadline: Duration) -> Result<(), FabricError> {
        self.running = false;
        self.bridge.shutdown(deadline).await?;
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        if !self.running {
            return ServiceHealth::Stopping;
        }
        let stats = self.bridge.stats();
        if stats.metrics.total_messages_dropped > 0 && stats.clients > 0 {
            ServiceHealth::Degraded(format!(
                "{} frame(s) dropped for slow clients",
                stats.metrics.total_messages_dropped
            ))
        } else {
            ServiceHealth::Healthy
        }
    }
}
