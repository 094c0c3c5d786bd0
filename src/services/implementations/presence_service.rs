use crate::errors::FabricError;
use crate::presence::PresenceService;
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "presence";

pub struct PresenceModule {
    presence: PresenceService,
}

impl PresenceModule {
    pub fn new(presence: PresenceService) -> Self {
        Self { presence }
    }
}

#[async_trait]
impl Service for PresenceModule {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        50
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![super::bus_service::NAME]
    }

    async fn start(&mut self, ctx: CancellationToken) -> Result<(), FabricError> {
        self.presence.start(&ctx)?;
        Ok(())
    }

    async fn stop(&mut self, deadline: Duration) -> Result<(), FabricError> {
        self.presence.shutdown(deadline).await?;
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        if self.presence.is_running() {
            ServiceHealth::Healthy
        } else {
            ServiceHealth::Unhealthy("owner task stopped".to_string())
        }
    }
}
