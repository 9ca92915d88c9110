//! WebSocket connection lifecycle.
//!
//! Wraps an upgraded socket into a [`ClientConnection`], registers it, and
//! runs the single reader loop that classifies every inbound frame:
//! requests go to the [`InboundDispatcher`], responses to whichever
//! exchange is waiting for them. When the loop ends the connection is torn
//! down and removed from the registry.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{Stream, StreamExt};

use super::dispatcher::InboundDispatcher;
use super::heartbeat::run_heartbeat;
use super::messages::{Frame, FrameError};
use crate::domain::{ClientConnection, ClientId, FrameSink};
use crate::service::Bridge;

/// Runs a freshly upgraded socket until it closes.
pub async fn run_connection(socket: WebSocket, client_id: ClientId, bridge: Arc<Bridge>) {
    let (ws_tx, ws_rx) = socket.split();
    let conn = attach(&bridge, client_id, Box::pin(ws_tx)).await;
    read_loop(&conn, ws_rx, bridge.dispatcher()).await;
    detach(&bridge, &conn);
}

/// Creates and registers the connection and starts its heartbeat.
///
/// Any connection already registered under `client_id` is closed.
pub async fn attach(
    bridge: &Bridge,
    client_id: ClientId,
    sink: FrameSink,
) -> Arc<ClientConnection> {
    let settings = bridge.settings();
    let conn = Arc::new(ClientConnection::new(
        client_id,
        sink,
        settings.max_inbound_in_flight,
    ));
    bridge.registry().upsert(Arc::clone(&conn)).await;
    tokio::spawn(run_heartbeat(
        Arc::clone(&conn),
        Arc::clone(bridge.registry()),
        settings.heartbeat,
    ));
    tracing::info!(client_id = %conn.id(), clients = bridge.registry().len(), "client connected");
    conn
}

/// Tears the connection down and removes it from the registry if it is
/// still the registered one.
pub fn detach(bridge: &Bridge, conn: &Arc<ClientConnection>) {
    conn.teardown();
    let removed = bridge.registry().remove_connection(conn);
    tracing::info!(
        client_id = %conn.id(),
        removed,
        clients = bridge.registry().len(),
        "client disconnected"
    );
}

/// Reads frames until the socket closes, errors, or the connection's stop
/// token fires.
pub async fn read_loop<S>(
    conn: &Arc<ClientConnection>,
    mut stream: S,
    dispatcher: &Arc<InboundDispatcher>,
) where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    let stop = conn.stop_token();
    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        handle_text(conn, dispatcher, text.as_str()).await;
                    }
                    Some(Ok(Message::Binary(bytes))) => match std::str::from_utf8(&bytes) {
                        Ok(text) => handle_text(conn, dispatcher, text).await,
                        Err(_) => {
                            tracing::warn!(
                                client_id = %conn.id(),
                                len = bytes.len(),
                                "dropping non-utf8 binary frame"
                            );
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {}
                    Some(Err(err)) => {
                        tracing::warn!(client_id = %conn.id(), error = %err, "socket read failed");
                        break;
                    }
                }
            }
        }
    }
}

async fn handle_text(
    conn: &Arc<ClientConnection>,
    dispatcher: &Arc<InboundDispatcher>,
    text: &str,
) {
    match Frame::decode(text) {
        Ok(Frame::Request(request)) => {
            tracing::debug!(
                client_id = %conn.id(),
                correlation_id = %request.id,
                method = %request.method,
                path = %request.path,
                "inbound request"
            );
            dispatcher.dispatch(conn, request).await;
        }
        Ok(Frame::Response(response)) => conn.route_response(response),
        Err(FrameError::Unrecognized) => {
            tracing::warn!(client_id = %conn.id(), "dropping unrecognized frame");
        }
        Err(err) => {
            tracing::warn!(client_id = %conn.id(), error = %err, "dropping malformed frame");
        }
    }
}
