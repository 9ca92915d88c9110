//! DTOs for the unicast and broadcast call endpoints.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::ws::messages::ResponseFrame;

/// Longest timeout a REST caller may request.
pub const MAX_TIMEOUT_MS: u64 = 300_000;

/// Request body for `POST /clients/{id}/call` and `POST /broadcast`.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CallRequest {
    /// HTTP-style verb forwarded to the client.
    pub method: String,
    /// Operation path forwarded to the client (must start with `/`).
    pub path: String,
    /// Optional JSON body.
    #[serde(default)]
    #[schema(value_type = Option<Object>)]
    pub body: Option<serde_json::Value>,
    /// Optional timeout in milliseconds; the bridge default applies if absent.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl CallRequest {
    /// Validates method, path, and timeout.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidRequest`] describing the first problem.
    pub fn validate(&self) -> Result<(), ApiError> {
        if self.method.trim().is_empty() {
            return Err(ApiError::InvalidRequest("method must not be empty".to_string()));
        }
        if !self.path.starts_with('/') {
            return Err(ApiError::InvalidRequest(format!(
                "path must start with '/': {:?}",
                self.path
            )));
        }
        if let Some(ms) = self.timeout_ms
            && (ms == 0 || ms > MAX_TIMEOUT_MS)
        {
            return Err(ApiError::InvalidRequest(format!(
                "timeout_ms must be between 1 and {MAX_TIMEOUT_MS}"
            )));
        }
        Ok(())
    }

    /// Returns the requested timeout, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// A client's response frame as returned over REST.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CallResponse {
    /// Correlation id of the exchange.
    pub id: String,
    /// Status reported by the client.
    pub status: u16,
    /// Headers reported by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub headers: Option<HashMap<String, String>>,
    /// Body reported by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub body: Option<serde_json::Value>,
    /// Error string reported by the client.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<ResponseFrame> for CallResponse {
    fn from(frame: ResponseFrame) -> Self {
        Self {
            id: frame.id,
            status: frame.status,
            headers: frame.headers,
            body: frame.body,
            error: frame.error,
        }
    }
}
