//! Axum WebSocket upgrade handler.

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::http::HeaderMap;
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;
use crate::domain::ClientId;
use crate::error::ApiError;

/// `GET /ws` — Upgrade an execution client's connection to WebSocket.
///
/// The client identifier is taken from the configured header.
///
/// # Errors
///
/// Returns [`ApiError::Bridge`] with an invalid-client-id error if
/// the header is missing, not UTF-8, or blank.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<impl IntoResponse, ApiError> {
    let raw = headers
        .get(&state.client_id_header)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default();
    let client_id = ClientId::parse(raw).map_err(|err| {
        tracing::warn!(header = %state.client_id_header, "rejecting upgrade without client id");
        ApiError::from(err)
    })?;

    let bridge = Arc::clone(&state.bridge);
    Ok(ws.on_upgrade(move |socket| run_connection(socket, client_id, bridge)))
}
