//! One live execution-client socket and its in-flight call tables.
//!
//! A [`ClientConnection`] is the only writer to its socket: every frame
//! (outbound calls, broadcast fan-out, heartbeat probes, inbound replies)
//! goes through [`ClientConnection::send_frame`] or
//! [`ClientConnection::send_ping`], which serialize encode+write behind a
//! per-connection mutex.
//!
//! Two correlation tables live here:
//!
//! - `pending_calls`: correlation id → single-slot `oneshot` sender, one
//!   per unicast exchange. Entries are owned by a [`PendingCall`] guard
//!   and removed when the guard drops, on every exit path.
//! - `pending_broadcasts`: correlation id → the broadcast orchestrator's
//!   results channel. Entries are registered by the orchestrator and
//!   removed by the first reply delivered through them, by the
//!   orchestrator's guard, or at teardown.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::Message;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures_util::{Sink, SinkExt};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::ClientId;
use crate::error::BridgeError;
use crate::ws::messages::{Frame, RequestFrame, ResponseFrame};

/// Write half of a client socket.
pub type FrameSink = Pin<Box<dyn Sink<Message, Error = axum::Error> + Send>>;

/// Upper bound on how long a close frame may take to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

/// A response delivered to a broadcast orchestrator, tagged with its sender.
#[derive(Debug, Clone)]
pub struct BroadcastReply {
    /// Client that produced the response.
    pub client_id: ClientId,
    /// The response frame.
    pub response: ResponseFrame,
}

/// State for one connected execution client.
pub struct ClientConnection {
    id: ClientId,
    connected_at: DateTime<Utc>,
    live: AtomicBool,
    close_sent: AtomicBool,
    consecutive_failures: AtomicU32,
    sink: Mutex<FrameSink>,
    pending_calls: DashMap<String, oneshot::Sender<ResponseFrame>>,
    pending_broadcasts: DashMap<String, mpsc::Sender<BroadcastReply>>,
    inbound_permits: Arc<Semaphore>,
    stop: CancellationToken,
}

impl ClientConnection {
    /// Wraps the write half of a freshly upgraded socket.
    ///
    /// `max_inbound_in_flight` bounds how many client-initiated requests
    /// may execute concurrently on this connection.
    #[must_use]
    pub fn new(id: ClientId, sink: FrameSink, max_inbound_in_flight: usize) -> Self {
        Self {
            id,
            connected_at: Utc::now(),
            live: AtomicBool::new(true),
            close_sent: AtomicBool::new(false),
            consecutive_failures: AtomicU32::new(0),
            sink: Mutex::new(sink),
            pending_calls: DashMap::new(),
            pending_broadcasts: DashMap::new(),
            inbound_permits: Arc::new(Semaphore::new(max_inbound_in_flight.max(1))),
            stop: CancellationToken::new(),
        }
    }

    /// Returns the client identifier.
    #[must_use]
    pub fn id(&self) -> &ClientId {
        &self.id
    }

    /// Returns when the socket was attached.
    #[must_use]
    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Returns `true` while the socket is usable.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Returns the number of consecutive failed liveness probes.
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Acquire)
    }

    /// Resets the probe failure counter after a successful probe.
    pub fn record_probe_success(&self) {
        self.consecutive_failures.store(0, Ordering::Release);
    }

    /// Increments the probe failure counter and returns the new value.
    pub fn record_probe_failure(&self) -> u32 {
        self.consecutive_failures
            .fetch_add(1, Ordering::AcqRel)
            .saturating_add(1)
    }

    /// Token cancelled when this connection stops; ends the reader loop
    /// and the heartbeat task.
    #[must_use]
    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Marks the connection dead and signals its tasks to stop.
    ///
    /// Synchronous so it can run under the registry's entry lock.
    pub fn mark_dead(&self) {
        self.live.store(false, Ordering::Release);
        self.stop.cancel();
    }

    /// Marks the connection dead and sends a close frame. Idempotent.
    pub async fn close(&self) {
        self.mark_dead();
        if self.close_sent.swap(true, Ordering::AcqRel) {
            return;
        }
        let flush = async {
            let mut sink = self.sink.lock().await;
            sink.send(Message::Close(None)).await?;
            sink.close().await
        };
        match tokio::time::timeout(CLOSE_GRACE, flush).await {
            Ok(Ok(())) => tracing::debug!(client_id = %self.id, "close frame sent"),
            Ok(Err(err)) => {
                tracing::debug!(client_id = %self.id, error = %err, "close frame not delivered");
            }
            Err(_) => tracing::debug!(client_id = %self.id, "close frame timed out"),
        }
    }

    /// Drops every pending unicast waiter and broadcast registration.
    ///
    /// Waiters observe a closed channel and report
    /// [`BridgeError::ConnectionClosed`].
    pub fn teardown(&self) {
        self.mark_dead();
        let calls = self.pending_calls.len();
        self.pending_calls.clear();
        self.pending_broadcasts.clear();
        tracing::debug!(client_id = %self.id, abandoned_calls = calls, "connection torn down");
    }

    /// Encodes and writes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Encode`] if the frame cannot be serialized and
    /// [`BridgeError::Write`] if the socket rejects the write.
    pub async fn send_frame(&self, frame: &Frame) -> Result<(), BridgeError> {
        let text = frame.encode()?;
        self.write(Message::text(text)).await
    }

    /// Writes a transport-level ping used as the liveness probe.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Write`] if the socket rejects the write.
    pub async fn send_ping(&self) -> Result<(), BridgeError> {
        self.write(Message::Ping(Bytes::new())).await
    }

    async fn write(&self, message: Message) -> Result<(), BridgeError> {
        let mut sink = self.sink.lock().await;
        sink.send(message).await.map_err(|err| BridgeError::Write {
            client_id: self.id.clone(),
            reason: err.to_string(),
        })
    }

    /// Registers a unicast waiter under `correlation_id`.
    ///
    /// The entry is removed when the returned guard drops.
    #[must_use]
    pub fn register_call(&self, correlation_id: &str) -> PendingCall<'_> {
        let (tx, rx) = oneshot::channel();
        self.pending_calls.insert(correlation_id.to_string(), tx);
        PendingCall {
            connection: self,
            correlation_id: correlation_id.to_string(),
            rx,
        }
    }

    /// Returns `true` if a unicast waiter is registered under the id.
    #[must_use]
    pub fn has_pending_call(&self, correlation_id: &str) -> bool {
        self.pending_calls.contains_key(correlation_id)
    }

    /// Returns the number of registered unicast waiters.
    #[must_use]
    pub fn pending_call_count(&self) -> usize {
        self.pending_calls.len()
    }

    /// Routes this connection's first response for `correlation_id` into `tx`.
    pub fn register_broadcast(&self, correlation_id: &str, tx: mpsc::Sender<BroadcastReply>) {
        self.pending_broadcasts
            .insert(correlation_id.to_string(), tx);
    }

    /// Removes a broadcast registration. Removing an absent id is a no-op.
    pub fn deregister_broadcast(&self, correlation_id: &str) {
        self.pending_broadcasts.remove(correlation_id);
    }

    /// Returns the number of registered broadcast routes.
    #[must_use]
    pub fn pending_broadcast_count(&self) -> usize {
        self.pending_broadcasts.len()
    }

    /// Delivers an inbound response to whichever exchange is waiting for it.
    ///
    /// Responses nobody is waiting for (late, duplicate, or unknown ids)
    /// are logged and discarded.
    pub fn route_response(&self, response: ResponseFrame) {
        if let Some((_, tx)) = self.pending_calls.remove(&response.id) {
            if tx.send(response).is_err() {
                tracing::debug!(client_id = %self.id, "unicast waiter gone; response discarded");
            }
            return;
        }

        // Removed on first delivery: one reply per connection per broadcast.
        if let Some((_, tx)) = self.pending_broadcasts.remove(&response.id) {
            let reply = BroadcastReply {
                client_id: self.id.clone(),
                response,
            };
            if let Err(err) = tx.try_send(reply) {
                tracing::debug!(
                    client_id = %self.id,
                    error = %err,
                    "broadcast orchestrator not accepting; response discarded"
                );
            }
            return;
        }

        tracing::debug!(
            client_id = %self.id,
            correlation_id = %response.id,
            status = response.status,
            "discarding uncorrelated response"
        );
    }

    /// Claims a slot for one client-initiated request, if any are free.
    #[must_use]
    pub fn try_acquire_inbound(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.inbound_permits).try_acquire_owned().ok()
    }

    /// Sends `request` and waits for its correlated response.
    ///
    /// The response slot is registered before the write and removed on
    /// every exit path. The timeout and `cancel` cover the write as well as
    /// the wait, so a stalled socket cannot hold the caller past either.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::NotConnected`] if the connection is no longer live
    /// - [`BridgeError::Write`] / [`BridgeError::Encode`] if sending fails
    /// - [`BridgeError::Timeout`] if `timeout` elapses first
    /// - [`BridgeError::Cancelled`] if `cancel` fires first
    /// - [`BridgeError::ConnectionClosed`] if the connection is torn down
    pub async fn exchange(
        &self,
        request: RequestFrame,
        timeout: Duration,
        cancel: Option<&CancellationToken>,
    ) -> Result<ResponseFrame, BridgeError> {
        let mut pending = self.register_call(&request.id);
        // Checked after registering so a concurrent teardown either sees
        // the waiter or is seen here.
        if !self.is_live() {
            return Err(BridgeError::NotConnected(self.id.clone()));
        }

        let correlation_id = request.id.clone();
        let frame = Frame::Request(request);
        let round_trip = async {
            self.send_frame(&frame).await?;
            pending.recv().await
        };
        let cancelled = async {
            match cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        let outcome = tokio::select! {
            received = round_trip => received,
            () = tokio::time::sleep(timeout) => Err(BridgeError::Timeout(timeout)),
            () = cancelled => Err(BridgeError::Cancelled),
        };

        if let Err(err) = &outcome {
            tracing::debug!(
                client_id = %self.id,
                correlation_id = %correlation_id,
                error = %err,
                "unicast exchange failed"
            );
        }
        outcome
    }
}

impl fmt::Debug for ClientConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConnection")
            .field("id", &self.id)
            .field("connected_at", &self.connected_at)
            .field("live", &self.is_live())
            .field("consecutive_failures", &self.consecutive_failures())
            .field("pending_calls", &self.pending_calls.len())
            .field("pending_broadcasts", &self.pending_broadcasts.len())
            .finish_non_exhaustive()
    }
}

/// Registration of one unicast waiter; deregisters on drop.
#[derive(Debug)]
pub struct PendingCall<'a> {
    connection: &'a ClientConnection,
    correlation_id: String,
    rx: oneshot::Receiver<ResponseFrame>,
}

impl PendingCall<'_> {
    /// Waits for the correlated response.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::ConnectionClosed`] if the connection drops
    /// the waiter without delivering a response.
    pub async fn recv(&mut self) -> Result<ResponseFrame, BridgeError> {
        (&mut self.rx)
            .await
            .map_err(|_| BridgeError::ConnectionClosed(self.connection.id.clone()))
    }
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        self.connection.pending_calls.remove(&self.correlation_id);
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
pub(crate) mod tests {
    use super::*;
    use tokio::sync::mpsc::UnboundedReceiver;

    /// Builds a sink that forwards every written message into a channel.
    pub(crate) fn channel_sink() -> (FrameSink, UnboundedReceiver<Message>) {
        let (tx, rx) = mpsc::unbounded_channel::<Message>();
        let sink = futures_util::sink::unfold(tx, |tx, message: Message| async move {
            tx.send(message).map_err(axum::Error::new)?;
            Ok::<_, axum::Error>(tx)
        });
        (Box::pin(sink), rx)
    }

    /// Builds a sink whose every write fails.
    pub(crate) fn failing_sink() -> FrameSink {
        let sink = futures_util::sink::unfold((), |(), _message: Message| async move {
            Err::<(), _>(axum::Error::new(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "socket gone",
            )))
        });
        Box::pin(sink)
    }

    /// Builds a sink whose writes never complete.
    pub(crate) fn stalled_sink() -> FrameSink {
        let sink = futures_util::sink::unfold((), |(), _message: Message| {
            std::future::pending::<Result<(), axum::Error>>()
        });
        Box::pin(sink)
    }

    pub(crate) fn client(id: &str) -> ClientId {
        let Ok(id) = ClientId::parse(id) else {
            panic!("valid id rejected");
        };
        id
    }

    /// Reads the next written text frame as a request.
    pub(crate) async fn next_request(rx: &mut UnboundedReceiver<Message>) -> RequestFrame {
        loop {
            let Some(message) = rx.recv().await else {
                panic!("sink closed before a request was written");
            };
            if let Message::Text(text) = message {
                let Ok(Frame::Request(request)) = Frame::decode(text.as_str()) else {
                    panic!("written frame is not a request");
                };
                return request;
            }
        }
    }

    #[tokio::test]
    async fn exchange_returns_correlated_response_and_cleans_up() {
        let (sink, mut written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 4));

        let responder = Arc::clone(&conn);
        let answer = tokio::spawn(async move {
            let request = next_request(&mut written).await;
            assert!(responder.has_pending_call(&request.id));
            responder.route_response(ResponseFrame::ok(
                request.id.clone(),
                200,
                Some(serde_json::json!({"message": "pong"})),
            ));
            request.id
        });

        let request = RequestFrame::new("GET", "/api/server/ping", None);
        let sent_id = request.id.clone();
        let result = conn.exchange(request, Duration::from_secs(5), None).await;
        let Ok(response) = result else {
            panic!("exchange failed");
        };
        assert_eq!(response.id, sent_id);
        assert_eq!(response.status, 200);
        assert_eq!(answer.await.unwrap_or_default(), sent_id);
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn exchange_times_out_and_discards_late_response() {
        let (sink, mut written) = channel_sink();
        let conn = ClientConnection::new(client("a"), sink, 4);

        let request = RequestFrame::new("GET", "/slow", None);
        let id = request.id.clone();
        let result = conn
            .exchange(request, Duration::from_millis(50), None)
            .await;
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
        assert!(!conn.has_pending_call(&id));

        let late = next_request(&mut written).await;
        conn.route_response(ResponseFrame::ok(late.id, 200, None));
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn exchange_reports_cancellation_distinctly() {
        let (sink, _written) = channel_sink();
        let conn = ClientConnection::new(client("a"), sink, 4);
        let token = CancellationToken::new();
        token.cancel();

        let result = conn
            .exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_secs(5),
                Some(&token),
            )
            .await;
        assert!(matches!(result, Err(BridgeError::Cancelled)));
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn exchange_surfaces_write_failure_without_leaking() {
        let conn = ClientConnection::new(client("a"), failing_sink(), 4);
        let result = conn
            .exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_secs(5),
                None,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::Write { .. })));
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn teardown_releases_waiters_as_connection_closed() {
        let (sink, mut written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 4));

        let closer = Arc::clone(&conn);
        tokio::spawn(async move {
            let _ = next_request(&mut written).await;
            closer.teardown();
        });

        let result = conn
            .exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_secs(5),
                None,
            )
            .await;
        assert!(matches!(result, Err(BridgeError::ConnectionClosed(_))));
        assert!(!conn.is_live());
    }

    #[tokio::test]
    async fn exchange_on_torn_down_connection_fails_fast() {
        let (sink, mut written) = channel_sink();
        let conn = ClientConnection::new(client("a"), sink, 4);
        conn.teardown();
        let result = tokio::time::timeout(
            Duration::from_secs(1),
            conn.exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_secs(30),
                None,
            ),
        )
        .await;
        assert!(matches!(result, Ok(Err(BridgeError::NotConnected(_)))));
        assert_eq!(conn.pending_call_count(), 0);
        assert!(written.try_recv().is_err());
    }

    #[tokio::test]
    async fn broadcast_route_delivers_once() {
        let (sink, _written) = channel_sink();
        let conn = ClientConnection::new(client("a"), sink, 4);
        let (tx, mut rx) = mpsc::channel(2);

        conn.register_broadcast("b-1", tx);
        conn.route_response(ResponseFrame::failure("b-1", 500, "boom"));
        conn.route_response(ResponseFrame::failure("b-1", 500, "boom again"));
        assert_eq!(conn.pending_broadcast_count(), 0);

        let Some(reply) = rx.recv().await else {
            panic!("broadcast reply not delivered");
        };
        assert_eq!(reply.client_id.as_str(), "a");
        assert_eq!(reply.response.error.as_deref(), Some("boom"));
        // The route held the only sender, so the channel is now drained.
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn deregister_broadcast_is_idempotent() {
        let conn = ClientConnection::new(client("a"), failing_sink(), 4);
        let (tx, _rx) = mpsc::channel(1);
        conn.register_broadcast("b-1", tx);
        conn.deregister_broadcast("b-1");
        conn.deregister_broadcast("b-1");
        assert_eq!(conn.pending_broadcast_count(), 0);
    }

    #[tokio::test]
    async fn exchange_times_out_on_stalled_write() {
        let conn = ClientConnection::new(client("a"), stalled_sink(), 4);
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            conn.exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_millis(100),
                None,
            ),
        )
        .await;
        let Ok(outcome) = result else {
            panic!("exchange hung on a stalled write");
        };
        assert!(matches!(outcome, Err(BridgeError::Timeout(_))));
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn exchange_cancels_during_stalled_write() {
        let conn = ClientConnection::new(client("a"), stalled_sink(), 4);
        let token = CancellationToken::new();
        token.cancel();
        let result = tokio::time::timeout(
            Duration::from_secs(2),
            conn.exchange(
                RequestFrame::new("GET", "/x", None),
                Duration::from_secs(30),
                Some(&token),
            ),
        )
        .await;
        let Ok(outcome) = result else {
            panic!("exchange hung on a stalled write");
        };
        assert!(matches!(outcome, Err(BridgeError::Cancelled)));
        assert_eq!(conn.pending_call_count(), 0);
    }

    #[tokio::test]
    async fn close_sends_close_frame_once() {
        let (sink, mut written) = channel_sink();
        let conn = ClientConnection::new(client("a"), sink, 4);
        conn.close().await;
        assert!(!conn.is_live());
        assert!(conn.stop_token().is_cancelled());
        assert!(matches!(written.recv().await, Some(Message::Close(None))));
    }

    #[test]
    fn probe_counter_counts_and_resets() {
        let conn = ClientConnection::new(client("a"), failing_sink(), 4);
        assert_eq!(conn.record_probe_failure(), 1);
        assert_eq!(conn.record_probe_failure(), 2);
        conn.record_probe_success();
        assert_eq!(conn.consecutive_failures(), 0);
    }

    #[test]
    fn inbound_permits_are_bounded() {
        let conn = ClientConnection::new(client("a"), failing_sink(), 1);
        let first = conn.try_acquire_inbound();
        assert!(first.is_some());
        assert!(conn.try_acquire_inbound().is_none());
        drop(first);
        assert!(conn.try_acquire_inbound().is_some());
    }
}
