/// WebSocket endpoints
///
/// `/ws/html` and `/ws/data` differ only in the bridge they hand the socket
/// to. The user id is resolved before the upgrade; client ids are fresh uuids.
use crate::bridge::Bridge;
use crate::logger::{self, LogTag};
use crate::webserver::{socket::AxumSocket, state::AppState};
use axum::{
    extract::{Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::Response,
    routing::get,
    Router,
};
use std::collections::HashMap;
use std::sync::Arc;

pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/ws/html", get(html_socket))
        .route("/ws/data", get(data_socket))
}

async fn html_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let user_id = state.auth.authenticate(&headers, &query);
    upgrade(ws, state.html.clone(), user_id)
}

async fn data_socket(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let user_id = state.auth.authenticate(&headers, &query);
    upgrade(ws, state.data.clone(), user_id)
}

fn upgrade(ws: WebSocketUpgrade, bridge: Bridge, user_id: Option<String>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let client_id = uuid::Uuid::new_v4().to_string();
        logger::debug(
            LogTag::Webserver,
            &format!(
                "Upgraded {} socket {} (user: {})",
                bridge.kind(),
                client_id,
                user_id.as_deref().unwrap_or("anonymous")
            ),
        );
        // A rejected socket is dropped here, which closes it.
        if let Err(e) = bridge
            .accept(client_id.clone(), user_id, AxumSocket::new(socket))
            .await
        {
            logger::warning(
                LogTag::Webserver,
                &format!("Rejected {} client {}: {}", bridge.kind(), client_id, e),
            );
        }
    })
}
