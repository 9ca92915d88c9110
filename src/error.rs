//! Bridge error types and their HTTP status mapping.
//!
//! [`BridgeError`] is the failure taxonomy of the RPC bridge itself. A
//! response frame carrying a non-success status is *not* a `BridgeError`:
//! it is a completed exchange and is handed to the caller as data.
//!
//! [`ApiError`] is the error type of the HTTP edge and maps every bridge
//! failure to a 5xx response with a structured JSON body.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use utoipa::ToSchema;

use crate::domain::ClientId;

/// Structured JSON error response body.
///
/// All error responses follow this shape:
/// ```json
/// {
///   "error": {
///     "code": 3002,
///     "message": "client not connected: device-7"
///   }
/// }
/// ```
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Bridge-level failures.
///
/// Only these stop an exchange from completing; nothing inside the bridge
/// retries on any of them.
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    /// The identifier sent on the upgrade request was empty.
    #[error("invalid client id: {0:?}")]
    InvalidClientId(String),

    /// Target identifier is not registered or its connection is not live.
    #[error("client not connected: {0}")]
    NotConnected(ClientId),

    /// A broadcast was issued while no client was connected.
    #[error("no connected clients")]
    NoConnectedClients,

    /// Writing a frame to the socket failed.
    #[error("write to client {client_id} failed: {reason}")]
    Write {
        /// Client whose socket rejected the write.
        client_id: ClientId,
        /// Transport error message.
        reason: String,
    },

    /// The connection was torn down before a response arrived.
    #[error("connection to client {0} closed before a response arrived")]
    ConnectionClosed(ClientId),

    /// No correlated response arrived within the deadline.
    #[error("timed out after {} ms waiting for a response", .0.as_millis())]
    Timeout(Duration),

    /// The caller cancelled the exchange.
    #[error("call cancelled by caller")]
    Cancelled,

    /// Every client in a broadcast answered, none successfully.
    #[error("all {clients} clients answered unsuccessfully")]
    AllFailed {
        /// Number of clients the request was dispatched to.
        clients: usize,
        /// Status of the last unsuccessful response, if any frame arrived.
        last_status: Option<u16>,
    },

    /// A frame could not be serialized.
    #[error("frame encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
}

impl BridgeError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidClientId(_) => 1002,
            Self::NotConnected(_) => 3002,
            Self::NoConnectedClients => 3003,
            Self::Write { .. } => 3004,
            Self::ConnectionClosed(_) => 3005,
            Self::Timeout(_) => 3006,
            Self::Cancelled => 3007,
            Self::AllFailed { .. } => 3008,
            Self::Encode(_) => 3000,
        }
    }

    /// Returns the HTTP status used when this error reaches the HTTP edge.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidClientId(_) => StatusCode::BAD_REQUEST,
            Self::NotConnected(_) | Self::NoConnectedClients => StatusCode::SERVICE_UNAVAILABLE,
            Self::Write { .. } | Self::ConnectionClosed(_) | Self::AllFailed { .. } => {
                StatusCode::BAD_GATEWAY
            }
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::Cancelled | Self::Encode(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// Errors returned by the HTTP edge.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Request validation failed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The underlying bridge exchange failed.
    #[error(transparent)]
    Bridge(#[from] BridgeError),
}

impl ApiError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::InvalidRequest(_) => 1001,
            Self::Bridge(err) => err.error_code(),
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::Bridge(err) => err.status_code(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
