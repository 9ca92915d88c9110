//! WebSocket layer: wire frames, connection lifecycle, heartbeat, and
//! inbound request dispatch.
//!
//! The endpoint at `/ws` accepts one long-lived socket per execution
//! client and turns it into a bidirectional request/response channel.

pub mod builtin;
pub mod connection;
pub mod dispatcher;
pub mod handler;
pub mod heartbeat;
pub mod messages;
