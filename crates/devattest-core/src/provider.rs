//! Platform attestation capability consumed by the session.
//!
//! The provider owns key generation inside secure hardware and produces the
//! opaque attestation and assertion blobs. On Apple platforms this is the App
//! Attest service; tests use [`crate::mock::MockAttestationProvider`].

use crate::digest::ClientDataHash;
use crate::error::{AttestationError, ProviderFault};
use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

/// Provider call identifiers, used for error mapping and diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// `generate_key`.
    GenerateKey,
    /// `attest_key`.
    Attest,
    /// `generate_assertion`.
    Sign,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::GenerateKey => "key generation",
            Operation::Attest => "key attestation",
            Operation::Sign => "assertion signing",
        })
    }
}

/// Failures reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProviderError {
    /// The capability is not available.
    #[error("attestation service unsupported")]
    Unsupported,

    /// The user dismissed or failed the presence check.
    #[error("user presence denied: {0}")]
    UserPresenceDenied(ProviderFault),

    /// The platform cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Any other hardware or service fault.
    #[error("{0}")]
    Failed(ProviderFault),
}

impl Operation {
    /// Maps a provider failure for this operation into the session taxonomy.
    pub fn classify(self, error: ProviderError) -> AttestationError {
        match error {
            ProviderError::Unsupported => AttestationError::NotSupported,
            ProviderError::Cancelled => AttestationError::Cancelled(self),
            ProviderError::UserPresenceDenied(fault) => AttestationError::AuthenticationFailed(fault),
            ProviderError::Failed(fault) => match self {
                Operation::GenerateKey => AttestationError::KeyGenerationFailed(fault),
                Operation::Attest => AttestationError::AttestationFailed(fault),
                Operation::Sign => AttestationError::SigningFailed(fault),
            },
        }
    }
}

/// Hardware attestation capability.
///
/// Implementations must be cheap to share (`Arc<dyn PlatformAttestationProvider>`).
/// Each call may block on hardware or a user prompt; dropping the returned
/// future abandons the request.
#[async_trait]
pub trait PlatformAttestationProvider: Send + Sync {
    /// Whether attestation is available in this environment.
    fn is_supported(&self) -> bool;

    /// Generates a new hardware key and returns its opaque identifier.
    async fn generate_key(&self) -> Result<String, ProviderError>;

    /// Attests `key_id` against `client_data_hash`, returning the attestation envelope.
    ///
    /// Must be called at most once per key.
    async fn attest_key(
        &self,
        key_id: &str,
        client_data_hash: &ClientDataHash,
    ) -> Result<Vec<u8>, ProviderError>;

    /// Signs `client_data_hash` under `key_id`, returning the assertion blob.
    async fn generate_assertion(
        &self,
        key_id: &str,
        client_data_hash: &ClientDataHash,
    ) -> Result<Vec<u8>, ProviderError>;
}
