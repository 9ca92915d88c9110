//! Type-safe execution-client identifier.
//!
//! [`ClientId`] is a newtype around the caller-asserted identifier string
//! sent on the WebSocket upgrade request, so it cannot be confused with a
//! correlation id or any other string.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Identifier of one execution client.
///
/// Supplied by the client itself during the upgrade handshake. Used as the
/// key in [`super::ClientRegistry`]; at most one live connection exists per
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a `ClientId`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidClientId`] if the identifier is empty
    /// after trimming.
    pub fn parse(raw: &str) -> Result<Self, BridgeError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(BridgeError::InvalidClientId(raw.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// Returns the identifier as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ClientId {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    #[test]
    fn parse_trims_whitespace() {
        let id = tokio_test::assert_ok!(ClientId::parse("  device-7 "));
        assert_eq!(id.as_str(), "device-7");
    }

    #[test]
    fn parse_rejects_blank() {
        tokio_test::assert_err!(ClientId::parse(""));
        tokio_test::assert_err!(ClientId::parse("   "));
    }

    #[test]
    fn display_matches_inner() {
        let Ok(id) = "robot-a".parse::<ClientId>() else {
            panic!("valid id rejected");
        };
        assert_eq!(format!("{id}"), "robot-a");
    }

    #[test]
    fn serializes_as_plain_string() {
        let Ok(id) = ClientId::parse("abc") else {
            panic!("valid id rejected");
        };
        let json = serde_json::to_string(&id).unwrap_or_default();
        assert_eq!(json, "\"abc\"");
    }
}
