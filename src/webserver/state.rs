/// Shared state handed to every route
use super::auth::{Anonymous, Authenticator};
use crate::bridge::Bridge;
use crate::db::{LiveQueryService, ReliableClient};
use crate::presence::PresenceService;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub html: Bridge,
    pub data: Bridge,
    pub presence: Option<PresenceService>,
    pub db: Option<ReliableClient>,
    pub live: Option<LiveQueryService>,
    pub auth: Arc<dyn Authenticator>,
}

impl AppState {
    pub fn new(html: Bridge, data: Bridge) -> Self {
        Self {
            html,
            data,
            presence: None,
            db: None,
            live: None,
            auth: Arc::new(Anonymous),
        }
    }

    pub fn with_presence(mut self, presence: PresenceService) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn with_db(mut self, db: ReliableClient, live: LiveQueryService) -> Self {
        self.db = Some(db);
        self.live = Some(live);
        self
    }

    pub fn with_authenticator(mut self, auth: Arc<dyn Authenticator>) -> Self {
        self.auth = auth;
        self
    }
}
