//! Domain layer: client identity, live connections, and the registry.
//!
//! This module contains the server-side model of the connected fleet:
//! the [`ClientId`] newtype, the per-socket [`ClientConnection`] with its
//! correlation tables, and the [`ClientRegistry`] mapping one to the other.

pub mod client_id;
pub mod connection;
pub mod registry;

pub use client_id::ClientId;
pub use connection::{BroadcastReply, ClientConnection, FrameSink, PendingCall};
pub use registry::{ClientRegistry, ClientSummary};
