//! Key custody errors.

use crate::traits::SignatureAlgorithm;
use thiserror::Error;

/// Result type alias for key lookup and creation.
pub type Result<T> = core::result::Result<T, KeyError>;

/// Errors raised while creating or locating a custody key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    /// Hardware key storage is not available on this device.
    #[error("Secure key storage not available: {0}")]
    Unavailable(String),

    /// The access-control object for the key could not be built.
    #[error("Access control creation failed: {0}")]
    AccessControlCreationFailed(String),

    /// The platform refused to generate the key pair.
    #[error("Key generation failed: {message} (status {status})")]
    KeyGenerationFailed {
        /// Underlying platform status code.
        status: i32,
        /// Platform-provided description.
        message: String,
    },

    /// No key is stored under the tag. This is a normal absence, not a fault.
    #[error("No key stored under tag '{0}'")]
    KeyNotFound(String),

    /// The biometric/passcode gate rejected the request.
    #[error("User authentication failed")]
    AuthenticationFailed,

    /// The keychain reported a fault other than absence, such as a locked device.
    #[error("Key lookup failed: {message} (status {status})")]
    LookupFailed {
        /// Underlying platform status code.
        status: i32,
        /// Platform-provided description.
        message: String,
    },
}

/// Errors raised while signing with a custody key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignError {
    /// The key cannot produce signatures with the requested algorithm.
    #[error("Signature algorithm {0:?} not supported by this key")]
    AlgorithmUnsupported(SignatureAlgorithm),

    /// The biometric/passcode gate rejected the request.
    #[error("User authentication failed")]
    AuthenticationFailed,

    /// The hardware signer reported a fault.
    #[error("Signing failed: {message} (status {status})")]
    SigningFailed {
        /// Underlying platform status code.
        status: i32,
        /// Platform-provided description.
        message: String,
    },
}
