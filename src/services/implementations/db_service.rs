use crate::db::{ConnectionState, LiveQueryService, ReliableClient};
use crate::errors::FabricError;
use crate::logger::{self, LogTag};
use crate::services::{Service, ServiceHealth};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub const NAME: &str = "database";

/// Reliable client plus the live-query service on top of it.
///
/// A failed first connect is not fatal: the health monitor keeps retrying and
/// queries reconnect on demand.
pub struct DbService {
    client: ReliableClient,
    live: LiveQueryService,
}

impl DbService {
    pub fn new(client: ReliableClient, live: LiveQueryService) -> Self {
        Self { client, live }
    }
}

#[async_trait]
impl Service for DbService {
    fn name(&self) -> &'static str {
        NAME
    }

    fn priority(&self) -> i32 {
        20
    }

    fn dependencies(&self) -> Vec<&'static str> {
        vec![super::bus_service::NAME]
    }

    async fn start(&mut self, ctx: CancellationToken) -> Result<(), FabricError> {
        if let Err(e) = self.client.connect().await {
            logger::warning(
                LogTag::Database,
                &format!(
                    "Initial connect to {} failed, continuing degraded: {}",
                    self.client.redacted_url(),
                    e
                ),
            );
        }
        self.client.start_health_monitor(&ctx);
        Ok(())
    }

    /// Live subscriptions first, then the connection
    async fn stop(&mut self, deadline: Duration) -> Result<(), FabricError> {
        let started = Instant::now();
        let outcome = self.live.shutdown(deadline).await;
        let remaining = deadline.saturating_sub(started.elapsed());
        if tokio::time::timeout(remaining, self.client.close()).await.is_err() {
            logger::warning(LogTag::Database, "Connection close timed out");
        }
        outcome.map_err(FabricError::from)
    }

    async fn health(&self) -> ServiceHealth {
        let health = self.client.health();
        match health.state {
            ConnectionState::Healthy | ConnectionState::Authenticated => ServiceHealth::Healthy,
            ConnectionState::Closed => ServiceHealth::Stopping,
            ConnectionState::Connecting => ServiceHealth::Starting,
            ConnectionState::Degraded | ConnectionState::Disconnected => ServiceHealth::Degraded(
                health
                    .last_error
                    .unwrap_or_else(|| health.state.to_string()),
            ),
        }
    }
}
