//! Peer and protocol identifiers.

use std::fmt;
use std::str::FromStr;

use peerwire_config::SocketEndpoint;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// Number of digest bytes kept when deriving a peer identity.
const PEER_ID_BYTES: usize = 16;

/// Opaque identity of a peer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PeerId(String);

impl PeerId {
    /// Wraps an existing identity string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Derives a stable identity from arbitrary seed bytes.
    pub fn derive(seed: impl AsRef<[u8]>) -> Self {
        let digest = Sha256::digest(seed.as_ref());
        let hex = digest
            .iter()
            .take(PEER_ID_BYTES)
            .map(|byte| format!("{byte:02x}"))
            .collect::<String>();
        Self(hex)
    }

    /// Returns the identity as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

/// Path-like token selecting which dispatcher a connection targets, such as
/// `/hello/1.0`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ProtocolId(String);

impl ProtocolId {
    /// Validates and wraps a protocol identifier.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidProtocol`] when the value does not start
    /// with `/`, is only `/`, or contains whitespace.
    pub fn parse(value: impl Into<String>) -> Result<Self, IdentityError> {
        let value = value.into();
        if !value.starts_with('/') || value.len() == 1 {
            return Err(IdentityError::invalid_protocol(value, "must be a path below '/'"));
        }
        if value.chars().any(char::is_whitespace) {
            return Err(IdentityError::invalid_protocol(value, "must not contain whitespace"));
        }
        Ok(Self(value))
    }

    /// Wraps a built-in identifier such as a `const` protocol name.
    ///
    /// The value is only validated in debug builds.
    pub fn from_static(value: &'static str) -> Self {
        debug_assert!(Self::parse(value).is_ok(), "invalid built-in protocol {value}");
        Self(value.to_owned())
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProtocolId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.0)
    }
}

impl FromStr for ProtocolId {
    type Err = IdentityError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Self::parse(input)
    }
}

impl TryFrom<String> for ProtocolId {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<ProtocolId> for String {
    fn from(value: ProtocolId) -> Self {
        value.0
    }
}

/// A peer together with the endpoints it can be dialled at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerAddrInfo {
    /// Peer identity.
    pub id: PeerId,
    /// Known dial endpoints; may be stale.
    #[serde(default)]
    pub addrs: Vec<SocketEndpoint>,
}

impl PeerAddrInfo {
    /// Builds address information for a peer.
    pub fn new(id: PeerId, addrs: Vec<SocketEndpoint>) -> Self {
        Self { id, addrs }
    }
}

/// Errors raised while validating identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Protocol identifier failed validation.
    #[error("invalid protocol identifier '{value}': {reason}")]
    InvalidProtocol { value: String, reason: &'static str },
}

impl IdentityError {
    fn invalid_protocol(value: String, reason: &'static str) -> Self {
        Self::InvalidProtocol { value, reason }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn derived_ids_are_stable_and_distinct() {
        let first = PeerId::derive("node-a");
        assert_eq!(first, PeerId::derive("node-a"));
        assert_ne!(first, PeerId::derive("node-b"));
        assert_eq!(first.as_str().len(), PEER_ID_BYTES * 2);
    }

    #[rstest]
    #[case::simple("/hello/1.0")]
    #[case::nested("/peerwire/exchange/1.0")]
    fn accepts_path_like_protocols(#[case] input: &str) {
        let protocol = ProtocolId::parse(input).expect("valid protocol");
        assert_eq!(protocol.as_str(), input);
    }

    #[rstest]
    #[case::relative("hello/1.0")]
    #[case::root("/")]
    #[case::empty("")]
    #[case::spaces("/hello world")]
    fn rejects_malformed_protocols(#[case] input: &str) {
        assert!(matches!(
            ProtocolId::parse(input),
            Err(IdentityError::InvalidProtocol { .. })
        ));
    }

    #[test]
    fn protocol_deserialization_validates() {
        let parsed: Result<ProtocolId, _> = serde_json::from_str("\"not-a-path\"");
        assert!(parsed.is_err());
        let parsed: ProtocolId = serde_json::from_str("\"/ok/1\"").expect("valid");
        assert_eq!(parsed.as_str(), "/ok/1");
    }
}
