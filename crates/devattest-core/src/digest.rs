//! Client-data hashing.
//!
//! Every challenge and request payload is reduced to a SHA-256 digest before it
//! reaches the provider. The verifier recomputes the same digest from the same
//! bytes, so the input must be the exact transport-decoded bytes.

use sha2::{Digest, Sha256};

/// SHA-256 digest of client data (challenge or request payload).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientDataHash([u8; 32]);

impl ClientDataHash {
    /// Hashes `data`.
    pub fn of(data: impl AsRef<[u8]>) -> Self {
        Self(Sha256::digest(data.as_ref()).into())
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Lowercase hex encoding.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl AsRef<[u8]> for ClientDataHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
