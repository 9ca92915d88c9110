//! Service layer: the call primitives exposed to business handlers.
//!
//! [`Bridge`] coordinates unicast and broadcast exchanges over the
//! [`super::domain::ClientRegistry`].

pub mod bridge;

pub use bridge::{Bridge, BridgeSettings};
