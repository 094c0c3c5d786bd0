mod health;
pub mod implementations;

pub use health::ServiceHealth;

use crate::errors::FabricError;
use crate::logger::{self, LogTag};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Core service trait that all fabric components are wrapped in
#[async_trait]
pub trait Service: Send + Sync {
    /// Unique service identifier
    fn name(&self) -> &'static str;

    /// Service priority (lower = starts earlier, stops later)
    fn priority(&self) -> i32 {
        100
    }

    /// Services this service depends on
    fn dependencies(&self) -> Vec<&'static str> {
        vec![]
    }

    fn is_enabled(&self) -> bool {
        true
    }

    /// Start the service; background work must stop when `ctx` is cancelled
    async fn start(&mut self, ctx: CancellationToken) -> Result<(), FabricError>;

    /// Stop the service within `deadline`
    async fn stop(&mut self, _deadline: Duration) -> Result<(), FabricError> {
        Ok(())
    }

    async fn health(&self) -> ServiceHealth {
        ServiceHealth::Healthy
    }
}

pub struct ServiceManager {
    services: HashMap<&'static str, Box<dyn Service>>,
    started: Vec<&'static str>,
    root: CancellationToken,
    shutdown_timeout: Duration,
}

impl ServiceManager {
    pub fn new(shutdown_timeout: Duration) -> Self {
        Self {
            services: HashMap::new(),
            started: Vec::new(),
            root: CancellationToken::new(),
            shutdown_timeout,
        }
    }

    /// Parent token of every started service
    pub fn root_token(&self) -> CancellationToken {
        self.root.clone()
    }

    /// Register a service; a later registration with the same name replaces it
    pub fn register(&mut self, service: Box<dyn Service>) {
        let name = service.name();
        if self.services.insert(name, service).is_some() {
            logger::warning(
                LogTag::System,
                &format!("Service {} registered twice, keeping the latest", name),
            );
        }
    }

    pub fn started(&self) -> &[&'static str] {
        &self.started
    }

    /// Start all enabled services in dependency and priority order.
    ///
    /// If one fails, the services already started are stopped in reverse.
    pub async fn start_all(&mut self) -> Result<(), FabricError> {
        let enabled: Vec<&'static str> = self
            .services
            .iter()
            .filter(|(_, service)| service.is_enabled())
            .map(|(name, _)| *name)
            .collect();
        let ordered = self.resolve_startup_order(&enabled)?;
        logger::info(
            LogTag::System,
            &format!("Service startup order: {:?}", ordered),
        );

        for name in ordered {
            let Some(service) = self.services.get_mut(name) else {
                continue;
            };
            logger::debug(LogTag::System, &format!("Starting service: {}", name));
            if let Err(e) = service.start(self.root.child_token()).await {
                logger::error(
                    LogTag::System,
                    &format!("Service {} failed to start: {}", name, e),
                );
                self.stop_all().await;
                return Err(e);
            }
            self.started.push(name);
            logger::info(LogTag::System, &format!("Service started: {}", name));
        }
        Ok(())
    }

    /// Stop started services in reverse start order, sharing one deadline.
    ///
    /// A service that overruns its share is abandoned; its tasks end when the
    /// root token is cancelled at the end.
    pub async fn stop_all(&mut self) {
        let deadline = Instant::now() + self.shutdown_timeout;
        logger::info(
            LogTag::System,
            &format!(
                "Stopping {} service(s) within {:?}",
                self.started.len(),
                self.shutdown_timeout
            ),
        );

        while let Some(name) = self.started.pop() {
            let Some(service) = self.services.get_mut(name) else {
                continue;
            };
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                logger::warning(
                    LogTag::System,
                    &format!("Shutdown deadline passed, not waiting for {}", name),
                );
                continue;
            }
            match tokio::time::timeout(remaining, service.stop(remaining)).await {
                Ok(Ok(())) => logger::info(LogTag::System, &format!("Service stopped: {}", name)),
                Ok(Err(e)) => logger::warning(
                    LogTag::System,
                    &format!("Service stop error for {}: {}", name, e),
                ),
                Err(_) => logger::warning(
                    LogTag::System,
                    &format!("Service {} did not stop before the deadline", name),
                ),
            }
        }

        self.root.cancel();
    }

    /// Dependencies first; among services whose dependencies are satisfied,
    /// the lowest priority goes next.
    fn resolve_startup_order(
        &self,
        services: &[&'static str],
    ) -> Result<Vec<&'static str>, FabricError> {
        let wanted: HashSet<&'static str> = services.iter().copied().collect();
        let mut pending: Vec<&'static str> = services.to_vec();
        pending.sort_by_key(|name| (self.priority_of(name), *name));

        for name in &pending {
            for dep in self.dependencies_of(name) {
                if !wanted.contains(dep) {
                    return Err(FabricError::service(
                        *name,
                        format!("depends on {}, which is not registered or disabled", dep),
                    ));
                }
            }
        }

        let mut ordered: Vec<&'static str> = Vec::with_capacity(pending.len());
        let mut done: HashSet<&'static str> = HashSet::new();
        while !pending.is_empty() {
            let ready = pending.iter().position(|name| {
                self.dependencies_of(name)
                    .iter()
                    .all(|dep| done.contains(dep))
            });
            match ready {
                Some(index) => {
                    let name = pending.remove(index);
                    done.insert(name);
                    ordered.push(name);
                }
                None => {
                    return Err(FabricError::service(
                        pending[0],
                        format!("circular dependency among {:?}", pending),
                    ))
                }
            }
        }
        Ok(ordered)
    }

    fn priority_of(&self, name: &str) -> i32 {
        self.services.get(name).map(|s| s.priority()).unwrap_or(100)
    }

    fn dependencies_of(&self, name: &str) -> Vec<&'static str> {
        self.services
            .get(name)
            .map(|s| s.dependencies())
            .unwrap_or_default()
    }

    pub async fn get_health(&self) -> BTreeMap<&'static str, ServiceHealth> {
        let mut health = BTreeMap::new();
        for (name, service) in &self.services {
            let status = if self.started.contains(name) {
                service.health().await
            } else {
                ServiceHealth::Starting
            };
            health.insert(*name, status);
        }
        health
    }
}
