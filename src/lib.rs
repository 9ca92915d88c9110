//! # fleet-bridge
//!
//! RPC-over-WebSocket bridge between a fleet manager and its execution
//! clients.
//!
//! Execution clients have no public address; each one dials in and holds a
//! single WebSocket. This crate turns that socket into a request/response
//! channel that carries many concurrent calls in both directions, fans a
//! call out to every client when any answer will do, and reclaims dead
//! sockets through a heartbeat.
//!
//! ## Architecture
//!
//! ```text
//! Execution clients (WebSocket)        REST callers
//!     │                                    │
//!     ├── WS upgrade + reader loop (ws/)   ├── REST handlers (api/)
//!     ├── InboundDispatcher (ws/)          │
//!     ├── Heartbeat (ws/)                  │
//!     │                                    │
//!     └──────────── Bridge (service/) ─────┘
//!                      │
//!                      ├── ClientRegistry (domain/)
//!                      └── ClientConnection (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod service;
pub mod ws;

use std::sync::Arc;

use axum::Router;
use axum::http::HeaderName;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use app_state::AppState;
use config::BridgeConfig;
use domain::ClientRegistry;
use service::{Bridge, BridgeSettings};
use ws::dispatcher::InboundDispatcher;

/// Builds the bridge service with the built-in inbound handlers.
#[must_use]
pub fn build_bridge(config: &BridgeConfig) -> Arc<Bridge> {
    Arc::new(Bridge::new(
        Arc::new(ClientRegistry::new()),
        Arc::new(InboundDispatcher::with_defaults()),
        BridgeSettings::from(config),
    ))
}

/// Builds the full HTTP application around an existing bridge.
///
/// # Errors
///
/// Returns the header parse error if `config.client_id_header` is not a
/// valid HTTP header name.
pub fn build_app(
    config: &BridgeConfig,
    bridge: Arc<Bridge>,
) -> Result<Router, axum::http::header::InvalidHeaderName> {
    let client_id_header = HeaderName::try_from(config.client_id_header.as_str())?;
    let state = AppState {
        bridge,
        client_id_header,
    };

    Ok(api::build_router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state))
}
