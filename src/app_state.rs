//! Shared application state injected into all Axum handlers.

use std::sync::Arc;

use axum::http::HeaderName;

use crate::service::Bridge;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// The RPC bridge to connected execution clients.
    pub bridge: Arc<Bridge>,
    /// Upgrade-request header carrying the client identifier.
    pub client_id_header: HeaderName,
}
