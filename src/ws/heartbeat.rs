//! Per-connection liveness probing.
//!
//! Every `interval` a ping frame is written to the client. A failed (or
//! stalled) write increments the connection's failure counter; a
//! successful write resets it. Once the counter reaches `failure_threshold`
//! the connection is closed and evicted from the registry. The task also
//! ends as soon as the connection's stop token fires, so at most one
//! heartbeat task exists per live connection.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{self, Instant, MissedTickBehavior};

use crate::domain::{ClientConnection, ClientRegistry};
use crate::error::BridgeError;

/// Heartbeat timing and disconnect policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeartbeatSettings {
    /// Time between probes.
    pub interval: Duration,
    /// Consecutive failures that trigger a disconnect.
    pub failure_threshold: u32,
}

impl Default for HeartbeatSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            failure_threshold: 3,
        }
    }
}

/// Runs the probe loop for `conn` until it stops or is declared dead.
pub async fn run_heartbeat(
    conn: Arc<ClientConnection>,
    registry: Arc<ClientRegistry>,
    settings: HeartbeatSettings,
) {
    let stop = conn.stop_token();
    let mut ticker = time::interval_at(Instant::now() + settings.interval, settings.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = stop.cancelled() => break,
            _ = ticker.tick() => {
                let probe = match time::timeout(settings.interval, conn.send_ping()).await {
                    Ok(result) => result,
                    Err(_) => Err(BridgeError::Timeout(settings.interval)),
                };
                match probe {
                    Ok(()) => conn.record_probe_success(),
                    Err(err) => {
                        let failures = conn.record_probe_failure();
                        tracing::warn!(
                            client_id = %conn.id(),
                            failures,
                            threshold = settings.failure_threshold,
                            error = %err,
                            "liveness probe failed"
                        );
                        if failures >= settings.failure_threshold {
                            tracing::warn!(
                                client_id = %conn.id(),
                                "client unresponsive; disconnecting"
                            );
                            conn.close().await;
                            registry.remove_connection(&conn);
                            break;
                        }
                    }
                }
            }
        }
    }

    tracing::debug!(client_id = %conn.id(), "heartbeat stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::connection::tests::{channel_sink, client, failing_sink};
    use axum::extract::ws::Message;

    fn fast(threshold: u32) -> HeartbeatSettings {
        HeartbeatSettings {
            interval: Duration::from_millis(10),
            failure_threshold: threshold,
        }
    }

    #[tokio::test]
    async fn three_failures_evict_connection() {
        let registry = Arc::new(ClientRegistry::new());
        let conn = Arc::new(ClientConnection::new(client("a"), failing_sink(), 4));
        registry.upsert(Arc::clone(&conn)).await;

        let task = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Arc::clone(&registry),
            fast(3),
        ));
        let finished = time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok());

        assert!(!registry.is_live(&client("a")));
        assert!(registry.lookup(&client("a")).is_none());
        assert!(!conn.is_live());
        assert!(conn.consecutive_failures() >= 3);
    }

    #[tokio::test]
    async fn successful_probes_keep_connection() {
        let registry = Arc::new(ClientRegistry::new());
        let (sink, mut written) = channel_sink();
        let conn = Arc::new(ClientConnection::new(client("a"), sink, 4));
        registry.upsert(Arc::clone(&conn)).await;
        conn.record_probe_failure();

        let task = tokio::spawn(run_heartbeat(
            Arc::clone(&conn),
            Arc::clone(&registry),
            fast(3),
        ));
        let probe = time::timeout(Duration::from_secs(2), written.recv()).await;
        assert!(matches!(probe, Ok(Some(Message::Ping(_)))));

        time::sleep(Duration::from_millis(30)).await;
        assert_eq!(conn.consecutive_failures(), 0);
        assert!(registry.is_live(&client("a")));

        conn.mark_dead();
        let finished = time::timeout(Duration::from_secs(2), task).await;
        assert!(finished.is_ok());
    }

    #[tokio::test]
    async fn stop_signal_ends_task_without_probing() {
        let registry = Arc::new(ClientRegistry::new());
        let conn = Arc::new(ClientConnection::new(client("a"), failing_sink(), 4));
        conn.mark_dead();

        let settings = HeartbeatSettings {
            interval: Duration::from_secs(60),
            failure_threshold: 3,
        };
        let finished = time::timeout(
            Duration::from_secs(1),
            run_heartbeat(Arc::clone(&conn), registry, settings),
        )
        .await;
        assert!(finished.is_ok());
        assert_eq!(conn.consecutive_failures(), 0);
    }
}
