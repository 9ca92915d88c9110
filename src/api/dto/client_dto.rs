//! DTOs for the client listing endpoints.

use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::ClientSummary;

/// Response body for `GET /clients`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClientListResponse {
    /// Registered clients, sorted by identifier.
    pub clients: Vec<ClientSummary>,
    /// Number of registered clients.
    pub total: usize,
}

/// Response body for `GET /clients/{id}`.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClientStatusResponse {
    /// Client identifier as requested.
    pub id: String,
    /// Whether the client currently has a live connection.
    pub live: bool,
}
