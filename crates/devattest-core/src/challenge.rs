//! Server-issued attestation challenges.

use crate::error::{AttestationError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::RngCore;

/// Decoded challenge bytes.
///
/// Production challenges come from the verifier as base64 text. Demo mode may
/// mint its own with [`Challenge::random`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge(Vec<u8>);

impl Challenge {
    /// Decodes a standard-alphabet, padded base64 challenge.
    ///
    /// Only canonical encodings are accepted, so [`Challenge::to_base64`]
    /// reproduces `encoded` exactly. Surrounding whitespace is rejected.
    ///
    /// # Errors
    ///
    /// - `AttestationError::InvalidChallenge` if `encoded` is not canonical base64 or is empty
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| AttestationError::InvalidChallenge(e.to_string()))?;
        if bytes.is_empty() {
            return Err(AttestationError::InvalidChallenge("empty challenge".into()));
        }
        Ok(Self(bytes))
    }

    /// Wraps already-decoded bytes.
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    /// 32 random bytes from the OS generator. Demo and test use only.
    pub fn random() -> Self {
        let mut bytes = vec![0u8; 32];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Raw challenge bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64 encoding.
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.0)
    }

    /// Consumes the challenge, returning its bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }
}
