//! Built-in inbound handlers every deployment answers.

use chrono::Utc;
use serde_json::json;

use super::dispatcher::{HandlerResponse, InboundDispatcher, InboundRequest};

/// Path answered with a pong payload.
pub const PING_PATH: &str = "/api/server/ping";

/// Path answered with server name and version.
pub const INFO_PATH: &str = "/api/server/info";

/// Registers the server ping and info handlers.
pub fn register_builtin(dispatcher: &InboundDispatcher) {
    dispatcher.register(PING_PATH, server_ping);
    dispatcher.register(INFO_PATH, server_info);
}

async fn server_ping(_request: InboundRequest) -> HandlerResponse {
    HandlerResponse::ok(json!({ "message": "pong" }))
}

async fn server_info(request: InboundRequest) -> HandlerResponse {
    HandlerResponse::ok(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "client_id": request.client_id.as_str(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
