//! Error types for attestation and assertion operations.

use crate::provider::Operation;
use std::fmt;
use thiserror::Error;

/// Result type alias for session operations.
pub type Result<T> = core::result::Result<T, AttestationError>;

/// Underlying platform status carried alongside a provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFault {
    /// Platform status code, when the provider reported one.
    pub code: Option<i64>,
    /// Platform-provided description.
    pub message: String,
}

impl ProviderFault {
    /// Creates a fault with a status code.
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code: Some(code),
            message: message.into(),
        }
    }

    /// Creates a fault without a status code.
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl fmt::Display for ProviderFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.code {
            Some(code) => write!(f, "{} (status {})", self.message, code),
            None => f.write_str(&self.message),
        }
    }
}

/// Attestation session errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AttestationError {
    /// Attestation capability is unavailable in this environment.
    #[error("Device attestation is not supported on this device")]
    NotSupported,

    /// Challenge was not valid base64.
    #[error("Invalid challenge: {0}")]
    InvalidChallenge(String),

    /// Request payload was malformed.
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// The session already holds an attested key.
    #[error("Session already attested with key {key_id}")]
    AlreadyAttested {
        /// Identifier of the key attested earlier.
        key_id: String,
    },

    /// Provider could not create a key.
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(ProviderFault),

    /// Provider could not attest the key.
    #[error("Attestation failed: {0}")]
    AttestationFailed(ProviderFault),

    /// Provider could not produce an assertion.
    #[error("Signing failed: {0}")]
    SigningFailed(ProviderFault),

    /// No attested key; attest before asserting.
    #[error("No attested key available; generate an attestation first")]
    NoKeyAvailable,

    /// User-presence gate rejected the operation.
    #[error("User authentication failed: {0}")]
    AuthenticationFailed(ProviderFault),

    /// Provider did not answer in time. The operation may still have completed.
    #[error("Timed out waiting for {0}")]
    ProviderTimeout(Operation),

    /// Provider call was cancelled before completing.
    #[error("{0} was cancelled")]
    Cancelled(Operation),

    /// Persisted identifier store failed.
    #[error("Identifier storage error: {0}")]
    Storage(String),
}

impl AttestationError {
    /// Whether the caller may retry the same call.
    ///
    /// A retried attestation always uses a fresh key.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AttestationError::KeyGenerationFailed(_)
                | AttestationError::AttestationFailed(_)
                | AttestationError::SigningFailed(_)
                | AttestationError::AuthenticationFailed(_)
                | AttestationError::ProviderTimeout(_)
                | AttestationError::Cancelled(_)
                | AttestationError::Storage(_)
        )
    }

    /// Underlying platform status, if any.
    pub fn fault(&self) -> Option<&ProviderFault> {
        match self {
            AttestationError::KeyGenerationFailed(fault)
            | AttestationError::AttestationFailed(fault)
            | AttestationError::SigningFailed(fault)
            | AttestationError::AuthenticationFailed(fault) => Some(fault),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fault_display_includes_status() {
        let fault = ProviderFault::new(3, "invalid key");
        assert_eq!(fault.to_string(), "invalid key (status 3)");
        assert_eq!(ProviderFault::message("boom").to_string(), "boom");
    }

    #[test]
    fn test_retry_classification() {
        assert!(!AttestationError::NotSupported.is_retryable());
        assert!(!AttestationError::NoKeyAvailable.is_retryable());
        assert!(!AttestationError::InvalidChallenge("x".into()).is_retryable());
        assert!(AttestationError::ProviderTimeout(Operation::Attest).is_retryable());
        assert!(
            AttestationError::AuthenticationFailed(ProviderFault::message("denied")).is_retryable()
        );
    }

    #[test]
    fn test_fault_preserved() {
        let err = AttestationError::SigningFailed(ProviderFault::new(-25293, "auth"));
        assert_eq!(err.fault().and_then(|f| f.code), Some(-25293));
        assert!(AttestationError::NoKeyAvailable.fault().is_none());
    }
}
