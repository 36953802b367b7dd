//! Platform abstraction traits for hardware-backed key custody.
//!
//! These traits enable platform-specific implementations while maintaining testability through mocks.

use crate::error::{KeyError, SignError};

/// Signature schemes a custody key may be asked to produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignatureAlgorithm {
    /// ECDSA over the SHA-256 digest of the message, X9.62/DER encoded.
    EcdsaSha256,
    /// ECDSA over the SHA-384 digest of the message, X9.62/DER encoded.
    EcdsaSha384,
    /// RSA PKCS#1 v1.5 over the SHA-256 digest of the message.
    RsaPkcs1v15Sha256,
}

/// Access gate applied to a private key at time of use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessPolicy {
    /// Biometric presence OR device passcode.
    #[default]
    UserPresence,
    /// Only the currently enrolled biometric set. Invalidated on re-enrolment.
    BiometryCurrentSet,
    /// No gate. Intended for diagnostics only.
    Unrestricted,
}

impl AccessPolicy {
    /// Whether using the key prompts the user.
    pub fn is_gated(self) -> bool {
        !matches!(self, AccessPolicy::Unrestricted)
    }
}

/// Options shared by every custody backend.
#[derive(Debug, Clone, Default)]
pub struct CustodyConfig {
    /// Gate applied to newly created keys.
    pub access_policy: AccessPolicy,
    /// Whether `retrieve_key` itself triggers the access gate.
    pub lookup_requires_auth: bool,
}

/// Opaque reference to a hardware-resident private key.
///
/// Never exposes private key bytes.
pub trait KeyHandle: Send + Sync {
    /// Tag the key was created under.
    fn tag(&self) -> &str;
}

/// Creates, locates, uses and removes hardware-backed P-256 signing keys
/// addressed by an application-chosen tag.
///
/// Platform-specific implementations:
/// - iOS: Secure Enclave via Security.framework (`SecureEnclaveCustody`)
/// - Testing: in-memory software keys (`MockKeyCustody`)
///
/// All methods may block on a user-presence prompt. Async callers should run
/// them through `tokio::task::spawn_blocking`.
pub trait KeyCustody: Send + Sync {
    /// Handle type produced by this backend.
    type Handle: KeyHandle;

    /// Creates a non-exportable P-256 key pair under `tag`.
    ///
    /// Reusing a tag supersedes lookups of the previous key.
    ///
    /// # Errors
    ///
    /// - `KeyError::AccessControlCreationFailed` if the access policy cannot be built
    /// - `KeyError::KeyGenerationFailed` if the hardware rejects the request
    fn create_key(&self, tag: &str) -> Result<Self::Handle, KeyError>;

    /// Looks up an existing key by tag.
    ///
    /// # Errors
    ///
    /// - `KeyError::KeyNotFound` if nothing is stored under `tag`
    /// - `KeyError::AuthenticationFailed` if the lookup is gated and the user declined
    /// - `KeyError::LookupFailed` on any other keychain fault, with its status preserved
    fn retrieve_key(&self, tag: &str) -> Result<Self::Handle, KeyError>;

    /// Whether `handle` can sign with `algorithm`.
    fn supports_algorithm(&self, handle: &Self::Handle, algorithm: SignatureAlgorithm) -> bool;

    /// Produces a signature without checking algorithm support.
    ///
    /// Called by [`KeyCustody::sign_with`] once support has been established.
    fn create_signature(
        &self,
        handle: &Self::Handle,
        algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, SignError>;

    /// Signs `data` (the message, not a digest) with `algorithm`.
    ///
    /// # Errors
    ///
    /// - `SignError::AlgorithmUnsupported` if the key cannot use `algorithm`
    /// - `SignError::AuthenticationFailed` if the access gate rejected the request
    /// - `SignError::SigningFailed` on a hardware fault
    fn sign_with(
        &self,
        handle: &Self::Handle,
        algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, SignError> {
        if !self.supports_algorithm(handle, algorithm) {
            return Err(SignError::AlgorithmUnsupported(algorithm));
        }
        self.create_signature(handle, algorithm, data)
    }

    /// Signs `data` with ECDSA over SHA-256. The signer hashes internally.
    fn sign(&self, handle: &Self::Handle, data: &[u8]) -> Result<Vec<u8>, SignError> {
        self.sign_with(handle, SignatureAlgorithm::EcdsaSha256, data)
    }

    /// Public key as an uncompressed SEC1 point (`0x04 || X || Y`).
    ///
    /// Returns `None` when the platform cannot export a representation.
    fn public_key_bytes(&self, handle: &Self::Handle) -> Option<Vec<u8>>;

    /// Deletes the key stored under `tag`.
    ///
    /// Returns `true` on success and when no such key existed. Returns `false`
    /// only on a genuine deletion fault.
    fn delete_key(&self, tag: &str) -> bool;

    /// Deletes every key whose tag starts with `prefix`.
    ///
    /// Zero matches is success.
    fn delete_keys_by_prefix(&self, prefix: &str) -> bool;
}
