//! Bridge service: the call primitives business code uses.
//!
//! [`Bridge`] owns the injected [`ClientRegistry`] and
//! [`InboundDispatcher`] and exposes the unicast ([`Bridge::call`]) and
//! broadcast ([`Bridge::call_all`]) exchanges. Neither retries; retry
//! policy belongs to the caller.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::BridgeConfig;
use crate::domain::{BroadcastReply, ClientConnection, ClientId, ClientRegistry};
use crate::error::BridgeError;
use crate::ws::dispatcher::{InboundDispatcher, InboundHandler};
use crate::ws::heartbeat::HeartbeatSettings;
use crate::ws::messages::{Frame, RequestFrame, ResponseFrame};

/// Runtime settings of the bridge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BridgeSettings {
    /// Timeout applied when a caller supplies none.
    pub call_timeout: Duration,
    /// Liveness probe policy.
    pub heartbeat: HeartbeatSettings,
    /// Per-connection cap on concurrently running inbound requests.
    pub max_inbound_in_flight: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self::from(&BridgeConfig::default())
    }
}

impl From<&BridgeConfig> for BridgeSettings {
    fn from(config: &BridgeConfig) -> Self {
        Self {
            call_timeout: config.call_timeout(),
            heartbeat: HeartbeatSettings {
                interval: config.heartbeat_interval(),
                failure_threshold: config.heartbeat_failure_threshold,
            },
            max_inbound_in_flight: config.max_inbound_in_flight,
        }
    }
}

/// Deregisters a broadcast route from every dispatched connection on drop.
struct BroadcastRoutes {
    correlation_id: String,
    connections: Vec<Arc<ClientConnection>>,
}

impl Drop for BroadcastRoutes {
    fn drop(&mut self) {
        for conn in &self.connections {
            conn.deregister_broadcast(&self.correlation_id);
        }
    }
}

/// The RPC bridge between the manager and its execution clients.
#[derive(Debug)]
pub struct Bridge {
    registry: Arc<ClientRegistry>,
    dispatcher: Arc<InboundDispatcher>,
    settings: BridgeSettings,
}

impl Bridge {
    /// Creates a bridge over the given registry and dispatcher.
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry>,
        dispatcher: Arc<InboundDispatcher>,
        settings: BridgeSettings,
    ) -> Self {
        Self {
            registry,
            dispatcher,
            settings,
        }
    }

    /// Returns the connection registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<ClientRegistry> {
        &self.registry
    }

    /// Returns the inbound dispatcher.
    #[must_use]
    pub fn dispatcher(&self) -> &Arc<InboundDispatcher> {
        &self.dispatcher
    }

    /// Returns the bridge settings.
    #[must_use]
    pub fn settings(&self) -> &BridgeSettings {
        &self.settings
    }

    /// Returns `true` if `id` has a live connection.
    #[must_use]
    pub fn is_live(&self, id: &ClientId) -> bool {
        self.registry.is_live(id)
    }

    /// Returns any connected client identifier.
    #[must_use]
    pub fn any_live_identifier(&self) -> Option<ClientId> {
        self.registry.first_live()
    }

    /// Registers a handler answering client-initiated calls on `path`.
    pub fn register_inbound_handler(&self, path: impl Into<String>, handler: impl InboundHandler) {
        self.dispatcher.register(path, handler);
    }

    /// Sends one request to client `id` and waits for its response.
    ///
    /// `timeout` defaults to [`BridgeSettings::call_timeout`]. A response
    /// with a non-success status is returned as `Ok`.
    ///
    /// # Errors
    ///
    /// [`BridgeError::NotConnected`], [`BridgeError::Write`],
    /// [`BridgeError::Timeout`] or [`BridgeError::ConnectionClosed`].
    pub async fn call(
        &self,
        id: &ClientId,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<ResponseFrame, BridgeError> {
        self.unicast(id, RequestFrame::new(method, path, body), timeout, None)
            .await
    }

    /// [`Self::call`] that also ends early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`Self::call`], plus [`BridgeError::Cancelled`].
    pub async fn call_with_cancel(
        &self,
        id: &ClientId,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ResponseFrame, BridgeError> {
        self.unicast(
            id,
            RequestFrame::new(method, path, body),
            timeout,
            Some(cancel),
        )
        .await
    }

    async fn unicast(
        &self,
        id: &ClientId,
        request: RequestFrame,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseFrame, BridgeError> {
        let conn = self
            .registry
            .lookup(id)
            .filter(|conn| conn.is_live())
            .ok_or_else(|| BridgeError::NotConnected(id.clone()))?;
        let timeout = timeout.unwrap_or(self.settings.call_timeout);

        tracing::debug!(
            client_id = %id,
            correlation_id = %request.id,
            method = %request.method,
            path = %request.path,
            "unicast call"
        );
        conn.exchange(request, timeout, cancel).await
    }

    /// Sends one request to every connected client and returns the first
    /// successful response.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NoConnectedClients`] immediately if nobody is connected
    /// - [`BridgeError::AllFailed`] once every client answered unsuccessfully
    /// - [`BridgeError::Timeout`] if no success arrives in time
    pub async fn call_all(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<ResponseFrame, BridgeError> {
        self.broadcast(RequestFrame::new(method, path, body), timeout, None)
            .await
    }

    /// [`Self::call_all`] that also ends early when `cancel` fires.
    ///
    /// # Errors
    ///
    /// As [`Self::call_all`], plus [`BridgeError::Cancelled`].
    pub async fn call_all_with_cancel(
        &self,
        method: &str,
        path: &str,
        body: Option<serde_json::Value>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ResponseFrame, BridgeError> {
        self.broadcast(RequestFrame::new(method, path, body), timeout, Some(cancel))
            .await
    }

    async fn broadcast(
        &self,
        request: RequestFrame,
        timeout: Option<Duration>,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseFrame, BridgeError> {
        let connections = self.registry.snapshot();
        if connections.is_empty() {
            return Err(BridgeError::NoConnectedClients);
        }
        let timeout = timeout.unwrap_or(self.settings.call_timeout);
        let dispatched = connections.len();

        let (tx, mut rx) = mpsc::channel::<BroadcastReply>(dispatched);
        for conn in &connections {
            conn.register_broadcast(&request.id, tx.clone());
        }
        drop(tx);
        let routes = BroadcastRoutes {
            correlation_id: request.id.clone(),
            connections,
        };

        tracing::debug!(
            correlation_id = %request.id,
            path = %request.path,
            clients = dispatched,
            "broadcast call"
        );

        let deadline = tokio::time::sleep(timeout);
        tokio::pin!(deadline);
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(cancelled);

        // Replies are drained while writes to slower sockets are still in
        // flight; the deadline and cancellation cover both.
        let frame = Frame::Request(request);
        let writes = futures_util::future::join_all(routes.connections.iter().map(|conn| {
            let frame = &frame;
            async move { (conn.id().clone(), conn.send_frame(frame).await) }
        }));
        tokio::pin!(writes);
        let mut writes_done = false;

        let mut reported: HashSet<ClientId> = HashSet::with_capacity(dispatched);
        let mut last_status = None;
        while reported.len() < dispatched {
            tokio::select! {
                results = &mut writes, if !writes_done => {
                    writes_done = true;
                    for (client_id, result) in results {
                        if let Err(err) = result {
                            tracing::warn!(
                                client_id = %client_id,
                                error = %err,
                                "broadcast write failed"
                            );
                            reported.insert(client_id);
                        }
                    }
                }
                reply = rx.recv() => {
                    let Some(BroadcastReply { client_id, response }) = reply else {
                        break;
                    };
                    if !reported.insert(client_id.clone()) {
                        continue;
                    }
                    if response.is_success() {
                        tracing::debug!(
                            client_id = %client_id,
                            correlation_id = %frame.id(),
                            "broadcast answered"
                        );
                        return Ok(response);
                    }
                    tracing::debug!(
                        client_id = %client_id,
                        status = response.status,
                        "broadcast answer unsuccessful"
                    );
                    last_status = Some(response.status);
                }
                () = &mut deadline => return Err(BridgeError::Timeout(timeout)),
                () = &mut cancelled => return Err(BridgeError::Cancelled),
            }
        }

        Err(BridgeError::AllFailed {
            clients: dispatched,
            last_status,
        })
    }
}
