//! Routing of client-initiated requests to local handlers.
//!
//! When an execution client acts as the caller, its request frame is
//! matched by `path` against the registered handlers. Each request runs on
//! its own task so the connection's reader never waits for a handler;
//! concurrency per connection is capped by the connection's inbound permits
//! and excess requests are answered `503` immediately.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use dashmap::DashMap;

use super::messages::{Frame, Headers, RequestFrame, ResponseFrame};
use crate::domain::{ClientConnection, ClientId};

/// Boxed future returned by an [`InboundHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = HandlerResponse> + Send>>;

/// A client-initiated request as seen by a handler.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    /// Client that sent the request.
    pub client_id: ClientId,
    /// HTTP-style verb.
    pub method: String,
    /// Operation path the request was routed by.
    pub path: String,
    /// Request headers (empty when none were sent).
    pub headers: Headers,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

/// What a handler answers; the dispatcher adds the correlation id.
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerResponse {
    /// HTTP-style status.
    pub status: u16,
    /// Optional response headers.
    pub headers: Option<Headers>,
    /// Optional JSON body.
    pub body: Option<serde_json::Value>,
}

impl HandlerResponse {
    /// `200` with a JSON body.
    #[must_use]
    pub fn ok(body: serde_json::Value) -> Self {
        Self::with_status(200, body)
    }

    /// Arbitrary status with a JSON body.
    #[must_use]
    pub fn with_status(status: u16, body: serde_json::Value) -> Self {
        Self {
            status,
            headers: None,
            body: Some(body),
        }
    }

    fn into_frame(self, id: String) -> ResponseFrame {
        ResponseFrame {
            id,
            status: self.status,
            headers: self.headers,
            body: self.body,
            error: None,
        }
    }
}

/// Handler for one inbound path.
///
/// Implemented for every `Fn(InboundRequest) -> impl Future<Output = HandlerResponse>`.
pub trait InboundHandler: Send + Sync + 'static {
    /// Executes the request.
    fn call(&self, request: InboundRequest) -> HandlerFuture;
}

impl<F, Fut> InboundHandler for F
where
    F: Fn(InboundRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResponse> + Send + 'static,
{
    fn call(&self, request: InboundRequest) -> HandlerFuture {
        Box::pin(self(request))
    }
}

/// Path-keyed table of inbound handlers.
#[derive(Default)]
pub struct InboundDispatcher {
    handlers: DashMap<String, Arc<dyn InboundHandler>>,
}

impl InboundDispatcher {
    /// Creates a dispatcher with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a dispatcher with the built-in server handlers registered.
    #[must_use]
    pub fn with_defaults() -> Self {
        let dispatcher = Self::new();
        super::builtin::register_builtin(&dispatcher);
        dispatcher
    }

    /// Registers (or replaces) the handler for `path`.
    pub fn register(&self, path: impl Into<String>, handler: impl InboundHandler) {
        let path = path.into();
        tracing::debug!(path = %path, "inbound handler registered");
        self.handlers.insert(path, Arc::new(handler));
    }

    /// Returns `true` if a handler is registered for `path`.
    #[must_use]
    pub fn has_handler(&self, path: &str) -> bool {
        self.handlers.contains_key(path)
    }

    /// Resolves and runs the handler for `request`, producing its response.
    ///
    /// Unknown paths yield a `404` with an error string.
    pub async fn respond(&self, client_id: ClientId, request: RequestFrame) -> ResponseFrame {
        let handler = self
            .handlers
            .get(&request.path)
            .map(|entry| Arc::clone(entry.value()));
        let Some(handler) = handler else {
            tracing::debug!(client_id = %client_id, path = %request.path, "no inbound handler");
            return ResponseFrame::failure(
                request.id,
                404,
                format!("no handler for {}", request.path),
            );
        };

        let id = request.id;
        let inbound = InboundRequest {
            client_id,
            method: request.method,
            path: request.path,
            headers: request.headers.unwrap_or_else(HashMap::new),
            body: request.body,
        };
        handler.call(inbound).await.into_frame(id)
    }

    /// Runs `request` on its own task and writes the response back on `conn`.
    ///
    /// Returns without waiting for the handler. When the connection's
    /// inbound slots are exhausted the request is answered `503` inline.
    pub async fn dispatch(self: &Arc<Self>, conn: &Arc<ClientConnection>, request: RequestFrame) {
        let Some(permit) = conn.try_acquire_inbound() else {
            tracing::warn!(
                client_id = %conn.id(),
                path = %request.path,
                "inbound request limit reached; rejecting"
            );
            let busy = ResponseFrame::failure(request.id, 503, "too many requests in flight");
            if let Err(err) = conn.send_frame(&Frame::Response(busy)).await {
                tracing::warn!(
                    client_id = %conn.id(),
                    error = %err,
                    "failed to send busy response"
                );
            }
            return;
        };

        let dispatcher = Arc::clone(self);
        let conn = Arc::clone(conn);
        tokio::spawn(async move {
            let path = request.path.clone();
            let response = dispatcher.respond(conn.id().clone(), request).await;
            drop(permit);
            tracing::debug!(
                client_id = %conn.id(),
                path = %path,
                status = response.status,
                "inbound request handled"
            );
            if let Err(err) = conn.send_frame(&Frame::Response(response)).await {
                tracing::warn!(client_id = %conn.id(), error = %err, "failed to send response");
            }
        });
    }
}

impl fmt::Debug for InboundDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut paths: Vec<String> = self.handlers.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        f.debug_struct("InboundDispatcher")
            .field("paths", &paths)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::connection::tests::{channel_sink, client};
    use axum::extract::ws::Message;
    use serde_json::json;
    use std::time::Duration;

    fn request(path: &str) -> RequestFrame {
        RequestFrame::new("GET", path, None)
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let dispatcher = InboundDispatcher::new();
        let req = request("/nope");
        let id = req.id.clone();
        let response = dispatcher.respond(client("a"), req).await;
        assert_eq!(response.id, id);
        assert_eq!(response.status, 404);
        assert_eq!(response.error.as_deref(), Some("no handler for /nope"));
    }

    #[tokio::test]
    async fn registered_handler_sees_client_and_body() {
        let dispatcher = InboundDispatcher::new();
        dispatcher.register("/echo", |req: InboundRequest| async move {
            HandlerResponse::ok(json!({
                "from": req.client_id.as_str(),
                "echo": req.body,
            }))
        });
        assert!(dispatcher.has_handler("/echo"));

        let mut req = request("/echo");
        req.body = Some(json!({"x": 1}));
        let response = dispatcher.respond(client("dev-1"), req).await;
        assert_eq!(response.status, 200);
        assert_eq!(
            response.body,
            Some(json!({"from": "dev-1", "echo": {"x": 1}}))
        );
        assert!(response.error.is_none());
    }

    #[tokio::test]
    async fn dispatch_writes_response_on_connection() {
        let dispatcher = Arc::new(InboundDispatcher::with_defaults());
        let (sink, mut written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 4));

        let req = request("/api/server/ping");
        let id = req.id.clone();
        dispatcher.dispatch(&conn, req).await;

        let message = tokio::time::timeout(Duration::from_secs(2), written.recv()).await;
        let Ok(Some(Message::Text(text))) = message else {
            panic!("no response written");
        };
        let Ok(Frame::Response(response)) = Frame::decode(text.as_str()) else {
            panic!("written frame is not a response");
        };
        assert_eq!(response.id, id);
        assert_eq!(response.status, 200);
        assert_eq!(response.body, Some(json!({"message": "pong"})));
    }

    #[tokio::test]
    async fn saturated_connection_answers_503() {
        let dispatcher = Arc::new(InboundDispatcher::new());
        let (sink, mut written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 1));
        let held = conn.try_acquire_inbound();
        assert!(held.is_some());

        dispatcher.dispatch(&conn, request("/anything")).await;
        let Some(Message::Text(text)) = written.recv().await else {
            panic!("no response written");
        };
        let Ok(Frame::Response(response)) = Frame::decode(text.as_str()) else {
            panic!("written frame is not a response");
        };
        assert_eq!(response.status, 503);
    }

    #[tokio::test]
    async fn slow_handler_does_not_block_dispatch() {
        let dispatcher = Arc::new(InboundDispatcher::new());
        dispatcher.register("/slow", |_req: InboundRequest| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            HandlerResponse::ok(json!(null))
        });
        let (sink, _written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 4));

        let returned = tokio::time::timeout(
            Duration::from_millis(200),
            dispatcher.dispatch(&conn, request("/slow")),
        )
        .await;
        assert!(returned.is_ok());
    }
}
