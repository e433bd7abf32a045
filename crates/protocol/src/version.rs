//! Protocol version carried in every message envelope

use crate::error::{ProtocolError, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

/// Version spoken by this build
pub const CURRENT_VERSION: ProtocolVersion = ProtocolVersion {
    major: 1,
    minor: 0,
    patch: 0,
};

impl ProtocolVersion {
    /// Check whether a peer speaking `other` can be served by this version
    pub fn is_compatible_with(&self, other: &ProtocolVersion) -> bool {
        self.major == other.major
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Reject messages from a peer with a different major version
///
/// Minor and patch differences are tolerated in both directions.
pub fn validate_version(peer: &ProtocolVersion) -> Result<()> {
    if CURRENT_VERSION.is_compatible_with(peer) {
        return Ok(());
    }
    Err(ProtocolError::IncompatibleVersion {
        major: peer.major,
        minor: peer.minor,
        expected_major: CURRENT_VERSION.major,
        expected_minor: CURRENT_VERSION.minor,
    })
}
