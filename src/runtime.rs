/// Boot graph and hierarchical shutdown
///
/// Components are wired explicitly: registry, bus, database, bridges,
/// presence. `Fabric::service_manager` wraps them as services so startup runs
/// in dependency order and shutdown runs in reverse under one deadline.
use crate::bridge::{Bridge, ClientDirectory, EndpointKind};
use crate::bus::{InProcessBus, SharedBus};
use crate::config::FabricConfig;
use crate::db::{rpc::RpcConnector, DbConnector, LiveQueryService, ReliableClient};
use crate::errors::FabricError;
use crate::logger::{self, LogTag};
use crate::presence::{PresenceOptions, PresenceService};
use crate::services::implementations::{
    BridgeService, BusService, DbService, PresenceModule, WebserverService,
};
use crate::services::ServiceManager;
use crate::topics::{self, TopicRegistry};
use crate::webserver::{AppState, HeaderAuthenticator};
use std::sync::Arc;

/// Reliable client and the live-query service built on it
#[derive(Clone)]
pub struct Database {
    pub client: ReliableClient,
    pub live: LiveQueryService,
}

pub struct Fabric {
    config: FabricConfig,
    registry: Arc<TopicRegistry>,
    bus: Arc<InProcessBus>,
    html: Bridge,
    data: Bridge,
    presence: PresenceService,
    database: Option<Database>,
}

impl Fabric {
    /// Wire every component; the database talks JSON-RPC over WebSocket
    pub fn build(config: FabricConfig, registry: Arc<TopicRegistry>) -> Result<Self, FabricError> {
        Self::with_connector(config, registry, Arc::new(RpcConnector::new()))
    }

    pub fn with_connector(
        config: FabricConfig,
        registry: Arc<TopicRegistry>,
        connector: Arc<dyn DbConnector>,
    ) -> Result<Self, FabricError> {
        let bus = Arc::new(InProcessBus::new(config.bus.queue_capacity));
        let shared: SharedBus = bus.clone();

        let database = if config.db.is_enabled() {
            let client = ReliableClient::new(config.db.clone(), connector)?;
            let live = LiveQueryService::new(client.clone());
            Some(Database { client, live })
        } else {
            logger::info(LogTag::Database, "DB_URL not set, database layer disabled");
            None
        };

        // One directory so client ids stay unique across both endpoints.
        let directory = ClientDirectory::new();
        let html = Bridge::with_directory(
            EndpointKind::Html,
            shared.clone(),
            registry.clone(),
            config.bridge.clone(),
            directory.clone(),
        );
        let data = Bridge::with_directory(
            EndpointKind::Data,
            shared.clone(),
            registry.clone(),
            config.bridge.clone(),
            directory,
        );
        let presence = PresenceService::new(shared, PresenceOptions::from(&config.presence));

        if config.server.trust_client_identity {
            logger::warning(
                LogTag::Webserver,
                "WS_TRUST_CLIENT_IDENTITY is on: user ids come from the x-user-id header or user query parameter, unverified",
            );
        }

        Ok(Self {
            config,
            registry,
            bus,
            html,
            data,
            presence,
            database,
        })
    }

    pub fn config(&self) -> &FabricConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TopicRegistry> {
        &self.registry
    }

    pub fn bus(&self) -> SharedBus {
        self.bus.clone()
    }

    pub fn html(&self) -> &Bridge {
        &self.html
    }

    pub fn data(&self) -> &Bridge {
        &self.data
    }

    pub fn presence(&self) -> &PresenceService {
        &self.presence
    }

    pub fn database(&self) -> Option<&Database> {
        self.database.as_ref()
    }

    pub fn app_state(&self) -> AppState {
        let mut state = AppState::new(self.html.clone(), self.data.clone())
            .with_presence(self.presence.clone());
        if self.config.server.trust_client_identity {
            state = state.with_authenticator(Arc::new(HeaderAuthenticator::default()));
        }
        match &self.database {
            Some(db) => state.with_db(db.client.clone(), db.live.clone()),
            None => state,
        }
    }

    /// Services for every component; `serve_http` adds the axum host
    pub fn service_manager(&self, serve_http: bool) -> ServiceManager {
        let mut manager = ServiceManager::new(self.config.server.shutdown_timeout);
        manager.register(Box::new(BusService::new(self.bus.clone())));
        if let Some(db) = &self.database {
            manager.register(Box::new(DbService::new(db.client.clone(), db.live.clone())));
        }
        manager.register(Box::new(BridgeService::new(self.html.clone())));
        manager.register(Box::new(BridgeService::new(self.data.clone())));
        manager.register(Box::new(PresenceModule::new(self.presence.clone())));
        if serve_http {
            manager.register(Box::new(WebserverService::new(
                self.config.server.clone(),
                self.app_state(),
            )));
        }
        manager
    }
}

/// Run the server until ctrl-c, then shut down within `SHUTDOWN_TIMEOUT`
pub async fn run(config: FabricConfig) -> Result<(), FabricError> {
    let registry = topics::init_global()?;
    let fabric = Fabric::build(config, registry)?;
    let mut manager = fabric.service_manager(true);
    manager.start_all().await?;

    let root = manager.root_token();
    tokio::select! {
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => logger::info(LogTag::System, "Interrupt received, shutting down"),
            Err(e) => logger::error(
                LogTag::System,
                &format!("Cannot listen for ctrl-c ({}), shutting down", e),
            ),
        },
        _ = root.cancelled() => logger::warning(LogTag::System, "Root scope cancelled, shutting down"),
    }

    manager.stop_all().await;
    logger::info(LogTag::System, "Shutdown complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{memory, WsFrame};
    use crate::bus::Bus;
    use crate::db::memory::MemoryConnector;
    use crate::topics::{define_module, TopicConfig};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    const WAIT: Duration = Duration::from_secs(2);

    async fn wait_until<F: Fn() -> bool>(check: F) {
        tokio::time::timeout(WAIT, async {
            while !check() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    fn fabric(connector: &MemoryConnector) -> Fabric {
        let mut config = FabricConfig::default();
        config.db.url = "ws://root:secret@localhost:8000/rpc".to_string();
        config.server.port = 0;
        let registry = TopicRegistry::with_framework_topics().unwrap();
        registry
            .register(define_module(TopicConfig::new("notes.changed").module("notes")).unwrap())
            .unwrap();
        Fabric::with_connector(config, Arc::new(registry), Arc::new(connector.clone())).unwrap()
    }

    #[test]
    fn test_database_disabled_without_url() {
        let registry = Arc::new(TopicRegistry::with_framework_topics().unwrap());
        let fabric = Fabric::build(FabricConfig::default(), registry).unwrap();
        assert!(fabric.database().is_none());
        assert!(fabric.app_state().db.is_none());
    }

    #[test]
    fn test_client_identity_only_trusted_when_enabled() {
        use crate::webserver::Authenticator;
        use axum::http::{HeaderMap, HeaderValue};
        use std::collections::HashMap;

        let mut headers = HeaderMap::new();
        headers.insert("x-user-id", HeaderValue::from_static("mallory"));
        let query = HashMap::new();

        let registry = Arc::new(TopicRegistry::with_framework_topics().unwrap());
        let fabric = Fabric::build(FabricConfig::default(), registry.clone()).unwrap();
        assert_eq!(fabric.app_state().auth.authenticate(&headers, &query), None);

        let mut config = FabricConfig::default();
        config.server.trust_client_identity = true;
        let fabric = Fabric::build(config, registry).unwrap();
        assert_eq!(
            fabric.app_state().auth.authenticate(&headers, &query).as_deref(),
            Some("mallory")
        );
    }

    #[tokio::test]
    async fn test_boot_order_and_hierarchical_shutdown() {
        let connector = MemoryConnector::new();
        let fabric = fabric(&connector);
        let mut manager = fabric.service_manager(true);
        manager.start_all().await.unwrap();
        assert_eq!(
            manager.started(),
            &["bus", "database", "data-bridge", "html-bridge", "presence", "webserver"]
        );

        let (conn, mut peer) = memory::pair();
        fabric
            .html()
            .accept("c-1", Some("alice".to_string()), conn)
            .await
            .unwrap();
        wait_until(|| fabric.presence().is_user_online("alice")).await;

        let db = fabric.database().unwrap();
        db.live
            .subscribe_to_topic(&CancellationToken::new(), "note", None, fabric.bus(), "notes.changed")
            .await
            .unwrap();

        manager.stop_all().await;

        let closed = tokio::time::timeout(WAIT, async {
            loop {
                match peer.next_frame().await {
                    Some(WsFrame::Close) | None => break,
                    Some(_) => continue,
                }
            }
        })
        .await;
        assert!(closed.is_ok());
        assert_eq!(fabric.html().client_count(), 0);
        assert_eq!(connector.killed().len(), 1);
        assert!(!fabric.presence().is_running());
        assert!(fabric.bus.is_shut_down());
    }
}
