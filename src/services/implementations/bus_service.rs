use crate::bus::{Bus, InProcessBus};
use crate::errors::FabricError;
use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "bus";

pub struct BusService {
    bus: Arc<InProcessBus>,
}

impl BusService {
    pub fn new(bus: Arc<InProcessBus>) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl Service for BusService {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        10
    }

    async fn start(&mut self, _ctx: CancellationToken) -> Result<(), FabricError> {
        if self.bus.is_shut_down() {
            return Err(FabricError::Bus(crate::errors::BusError::Fatal {
                reason: "bus already shut down".to_string(),
            }));
        }
        Ok(())
    }

    async fn stop(&mut self, _deadline: Duration) -> Result<(), FabricError> {
        let stats = self.bus.stats();
        self.bus.shutdown();
        logger::info(
            LogTag::Bus,
            &format!(
                "Bus closed ({} published, {} delivered, {} dropped)",
                stats.published, stats.delivered, stats.dropped
            ),
        );
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        if self.bus.is_shut_down() {
            ServiceHealth::Unhealthy("shut down".to_string())
        } else {
            ServiceHealth::Healthy
        }
    }
}
