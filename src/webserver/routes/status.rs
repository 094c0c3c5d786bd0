use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::{
    bridge::BridgeStats,
    db::DbHealth,
    logger::{self, LogTag},
    webserver::state::AppState,
};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSummary {
    pub running: bool,
    pub online: usize,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub version: &'static str,
    pub html: BridgeStats,
    pub data: BridgeStats,
    pub presence: Option<PresenceSummary>,
    pub database: Option<DbHealth>,
    pub live_queries: usize,
}

pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

pub fn gather_health(state: &AppState) -> HealthResponse {
    let database = state.db.as_ref().map(|db| db.health());
    let degraded = database
        .as_ref()
        .is_some_and(|health| !health.state.is_usable());

    HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        timestamp: Utc::now(),
        version: env!("CARGO_PKG_VERSION"),
        html: state.html.stats(),
        data: state.data.stats(),
        presence: state.presence.as_ref().map(|presence| PresenceSummary {
            running: presence.is_running(),
            online: presence.online_count(),
        }),
        database,
        live_queries: state.live.as_ref().map_or(0, |live| live.count()),
    }
}

/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = gather_health(&state);
    logger::verbose(
        LogTag::Webserver,
        &format!(
            "Health check: {} ({} html, {} data clients)",
            health.status, health.html.clients, health.data.clients
        ),
    );
    let code = if health.status == "ok" {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(health))
}
