//! Concurrent client-connection registry.
//!
//! [`ClientRegistry`] maps each [`ClientId`] to its live
//! [`ClientConnection`]. It is backed by a sharded [`DashMap`], so traffic
//! on unrelated connections never serializes on a registry-wide lock.
//! No reference into the map is ever held across an `.await`.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use utoipa::ToSchema;

use super::{ClientConnection, ClientId};

/// Summary of one registered client for list endpoints.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientSummary {
    /// Client identifier.
    #[schema(value_type = String)]
    pub id: ClientId,
    /// When the current socket was attached.
    pub connected_at: DateTime<Utc>,
    /// Whether the socket is currently usable.
    pub live: bool,
    /// Consecutive failed liveness probes.
    pub consecutive_failures: u32,
}

impl From<&ClientConnection> for ClientSummary {
    fn from(conn: &ClientConnection) -> Self {
        Self {
            id: conn.id().clone(),
            connected_at: conn.connected_at(),
            live: conn.is_live(),
            consecutive_failures: conn.consecutive_failures(),
        }
    }
}

/// Process-wide map from client identifier to its connection.
///
/// # Invariants
///
/// - At most one live connection per identifier: [`Self::upsert`] marks a
///   previous connection dead before installing its replacement.
/// - A connection removing itself on teardown can only remove its own
///   entry, never a successor's ([`Self::remove_connection`]).
#[derive(Debug, Default)]
pub struct ClientRegistry {
    clients: DashMap<ClientId, Arc<ClientConnection>>,
}

impl ClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `conn`, evicting any connection already registered under
    /// the same identifier.
    ///
    /// The previous connection is marked dead under the entry lock, then
    /// its socket is closed after the lock is released.
    pub async fn upsert(&self, conn: Arc<ClientConnection>) {
        let previous = match self.clients.entry(conn.id().clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get().mark_dead();
                Some(occupied.insert(conn))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(conn);
                None
            }
        };

        if let Some(old) = previous {
            tracing::info!(client_id = %old.id(), "replacing existing connection");
            old.close().await;
        }
    }

    /// Returns the connection registered under `id`, live or not.
    #[must_use]
    pub fn lookup(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.clients.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Returns `true` if `id` is registered and its socket is usable.
    #[must_use]
    pub fn is_live(&self, id: &ClientId) -> bool {
        self.clients
            .get(id)
            .is_some_and(|entry| entry.value().is_live())
    }

    /// Removes the entry for `id`. Removing an absent id is a no-op.
    pub fn remove(&self, id: &ClientId) -> Option<Arc<ClientConnection>> {
        self.clients.remove(id).map(|(_, conn)| conn)
    }

    /// Removes the entry for `conn.id()` only if it still points at `conn`.
    ///
    /// Returns `true` if an entry was removed.
    pub fn remove_connection(&self, conn: &Arc<ClientConnection>) -> bool {
        self.clients
            .remove_if(conn.id(), |_, current| Arc::ptr_eq(current, conn))
            .is_some()
    }

    /// Returns an arbitrary live identifier; no ordering guarantee.
    #[must_use]
    pub fn first_live(&self) -> Option<ClientId> {
        self.clients
            .iter()
            .find(|entry| entry.value().is_live())
            .map(|entry| entry.key().clone())
    }

    /// Point-in-time snapshot of live connections.
    ///
    /// No lock is held once this returns; connections that disconnect
    /// afterwards simply fail their next write.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<ClientConnection>> {
        self.clients
            .iter()
            .filter(|entry| entry.value().is_live())
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Calls `f` for every connection in a live snapshot.
    pub fn for_each_live(&self, mut f: impl FnMut(&Arc<ClientConnection>)) {
        for conn in self.snapshot() {
            f(&conn);
        }
    }

    /// Returns summaries of all registered clients, sorted by identifier.
    #[must_use]
    pub fn list(&self) -> Vec<ClientSummary> {
        let mut summaries: Vec<ClientSummary> = self
            .clients
            .iter()
            .map(|entry| ClientSummary::from(entry.value().as_ref()))
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    /// Returns the number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Closes and removes every connection. Used at process shutdown.
    pub async fn close_all(&self) {
        let ids: Vec<ClientId> = self.clients.iter().map(|e| e.key().clone()).collect();
        for id in ids {
            if let Some(conn) = self.remove(&id) {
                conn.close().await;
            }
        }
    }
}
