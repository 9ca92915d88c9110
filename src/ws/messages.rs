//! Wire frames exchanged with execution clients.
//!
//! The wire format is one JSON object per WebSocket text message with no
//! explicit type field. [`Frame::decode`] classifies each object exactly
//! once, at the socket boundary:
//!
//! 1. non-empty `method` → [`Frame::Request`]
//! 2. otherwise a non-null `status` → [`Frame::Response`]
//! 3. otherwise [`FrameError::Unrecognized`] (logged and dropped by the reader)

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// String-to-string header map carried by both frame shapes.
pub type Headers = HashMap<String, String>;

/// Mints a fresh correlation id (UUID v4, hyphenated).
#[must_use]
pub fn new_correlation_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// A call: selects a logical operation by `method` and `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestFrame {
    /// Correlation id minted by the caller.
    pub id: String,
    /// HTTP-style verb (`GET`, `POST`, ...).
    pub method: String,
    /// Logical operation path, e.g. `/api/server/ping`.
    pub path: String,
    /// Optional headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl RequestFrame {
    /// Builds a request with a freshly minted correlation id.
    #[must_use]
    pub fn new(
        method: impl Into<String>,
        path: impl Into<String>,
        body: Option<serde_json::Value>,
    ) -> Self {
        Self {
            id: new_correlation_id(),
            method: method.into(),
            path: path.into(),
            headers: None,
            body,
        }
    }
}

/// The answer to exactly one [`RequestFrame`], matched by `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseFrame {
    /// Correlation id copied from the request.
    pub id: String,
    /// HTTP-style status code.
    pub status: u16,
    /// Optional headers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub headers: Option<Headers>,
    /// Optional JSON body.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
    /// Set only when the request could not be serviced at all.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ResponseFrame {
    /// Builds a response with a body and no error.
    #[must_use]
    pub fn ok(id: impl Into<String>, status: u16, body: Option<serde_json::Value>) -> Self {
        Self {
            id: id.into(),
            status,
            headers: None,
            body,
            error: None,
        }
    }

    /// Builds a response reporting that the request could not be serviced.
    #[must_use]
    pub fn failure(id: impl Into<String>, status: u16, error: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status,
            headers: None,
            body: None,
            error: Some(error.into()),
        }
    }

    /// Returns `true` for a 2xx status with no error string.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.as_deref().is_none_or(str::is_empty)
    }
}

/// Decoding failures. Both are logged and the frame dropped.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The text was not a JSON object of the expected field types.
    #[error("malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),

    /// Valid JSON, but neither a `method` nor a `status` was present.
    #[error("unrecognized frame: neither method nor status present")]
    Unrecognized,
}

/// A classified frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Frame {
    /// Inbound or outbound call.
    Request(RequestFrame),
    /// Answer to a call.
    Response(ResponseFrame),
}

/// Permissive shape used only to classify an incoming object.
#[derive(Debug, Deserialize)]
struct RawFrame {
    #[serde(default)]
    id: String,
    method: Option<String>,
    path: Option<String>,
    headers: Option<Headers>,
    body: Option<serde_json::Value>,
    status: Option<u16>,
    error: Option<String>,
}

impl Frame {
    /// Parses and classifies one text message.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Malformed`] for invalid JSON and
    /// [`FrameError::Unrecognized`] when neither classification rule applies.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        let raw: RawFrame = serde_json::from_str(text)?;
        match (raw.method, raw.status) {
            (Some(method), _) if !method.is_empty() => Ok(Self::Request(RequestFrame {
                id: raw.id,
                method,
                path: raw.path.unwrap_or_default(),
                headers: raw.headers,
                body: raw.body,
            })),
            (_, Some(status)) => Ok(Self::Response(ResponseFrame {
                id: raw.id,
                status,
                headers: raw.headers,
                body: raw.body,
                error: raw.error,
            })),
            _ => Err(FrameError::Unrecognized),
        }
    }

    /// Serializes the frame to its wire JSON.
    ///
    /// # Errors
    ///
    /// Returns the `serde_json` error if a body value cannot be serialized.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Returns the correlation id of either shape.
    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Request(req) => &req.id,
            Self::Response(resp) => &resp.id,
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn method_wins_over_status() {
        let text = r#"{"id":"1","method":"GET","path":"/x","status":200}"#;
        let Ok(Frame::Request(req)) = Frame::decode(text) else {
            panic!("expected request");
        };
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/x");
    }

    #[test]
    fn empty_method_falls_back_to_status() {
        let text = r#"{"id":"2","method":"","status":404,"error":"nope"}"#;
        let Ok(Frame::Response(resp)) = Frame::decode(text) else {
            panic!("expected response");
        };
        assert_eq!(resp.status, 404);
        assert_eq!(resp.error.as_deref(), Some("nope"));
    }

    #[test]
    fn neither_field_is_unrecognized() {
        let text = r#"{"id":"3","body":{"a":1}}"#;
        assert!(matches!(Frame::decode(text), Err(FrameError::Unrecognized)));
        let null_status = r#"{"id":"3","status":null}"#;
        assert!(matches!(
            Frame::decode(null_status),
            Err(FrameError::Unrecognized)
        ));
    }

    #[test]
    fn garbage_is_malformed() {
        assert!(matches!(
            Frame::decode("not json"),
            Err(FrameError::Malformed(_))
        ));
    }

    #[test]
    fn encode_omits_absent_fields() {
        let frame = Frame::Response(ResponseFrame::ok("9", 200, Some(json!({"message": "pong"}))));
        let Ok(text) = frame.encode() else {
            panic!("encode failed");
        };
        let Ok(value) = serde_json::from_str::<serde_json::Value>(&text) else {
            panic!("encoded text is not json");
        };
        assert_eq!(value, json!({"id": "9", "status": 200, "body": {"message": "pong"}}));
    }

    #[test]
    fn encoded_request_has_no_type_tag() {
        let req = RequestFrame::new("GET", "/api/server/ping", None);
        let Ok(text) = Frame::Request(req.clone()).encode() else {
            panic!("encode failed");
        };
        let Ok(Frame::Request(back)) = Frame::decode(&text) else {
            panic!("expected request");
        };
        assert_eq!(back, req);
        assert!(!text.contains("Request"));
    }

    #[test]
    fn success_requires_2xx_and_no_error() {
        assert!(ResponseFrame::ok("a", 200, None).is_success());
        assert!(ResponseFrame::ok("a", 204, None).is_success());
        assert!(!ResponseFrame::ok("a", 500, None).is_success());
        assert!(!ResponseFrame::failure("a", 200, "broken").is_success());
        let mut empty_error = ResponseFrame::ok("a", 200, None);
        empty_error.error = Some(String::new());
        assert!(empty_error.is_success());
    }

    #[test]
    fn correlation_ids_are_unique() {
        assert_ne!(new_correlation_id(), new_correlation_id());
    }
}
