//! Mock implementations for testing.
//!
//! Provides an in-memory, software-backed custody store for automated CI
//! testing. Keys never leave process memory and are lost on drop.

use crate::error::{KeyError, SignError};
use crate::traits::{AccessPolicy, CustodyConfig, KeyCustody, KeyHandle, SignatureAlgorithm};
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

/// Handle to a software key held by [`MockKeyCustody`].
#[derive(Clone)]
pub struct MockKeyHandle {
    tag: String,
    key: Arc<SigningKey>,
}

impl MockKeyHandle {
    /// Verifying half of the key, for checking signatures in tests.
    pub fn verifying_key(&self) -> VerifyingKey {
        VerifyingKey::from(self.key.as_ref())
    }
}

impl std::fmt::Debug for MockKeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockKeyHandle")
            .field("tag", &self.tag)
            .finish_non_exhaustive()
    }
}

impl KeyHandle for MockKeyHandle {
    fn tag(&self) -> &str {
        &self.tag
    }
}

/// Mock key custody for testing.
///
/// Simulates the access gate with a user-presence switch: when the policy is
/// gated and presence is denied, signing (and lookup, if configured) fails
/// with `AuthenticationFailed`.
///
/// # Example
///
/// ```
/// use devattest_platform::mock::MockKeyCustody;
/// use devattest_platform::traits::KeyCustody;
///
/// let custody = MockKeyCustody::new();
/// let handle = custody.create_key("com.example.signing").unwrap();
/// let signature = custody.sign(&handle, b"payload").unwrap();
/// assert!(!signature.is_empty());
/// ```
#[derive(Clone)]
pub struct MockKeyCustody {
    config: CustodyConfig,
    keys: Arc<RwLock<BTreeMap<String, Arc<SigningKey>>>>,
    user_present: Arc<AtomicBool>,
    biometry_enrolled: Arc<AtomicBool>,
    delete_fault: Arc<AtomicBool>,
    lookup_fault: Arc<RwLock<Option<i32>>>,
}

impl MockKeyCustody {
    /// Creates a mock with the default (user-presence) policy.
    pub fn new() -> Self {
        Self::with_config(CustodyConfig::default())
    }

    /// Creates a mock with a specific configuration.
    pub fn with_config(config: CustodyConfig) -> Self {
        Self {
            config,
            keys: Arc::new(RwLock::new(BTreeMap::new())),
            user_present: Arc::new(AtomicBool::new(true)),
            biometry_enrolled: Arc::new(AtomicBool::new(true)),
            delete_fault: Arc::new(AtomicBool::new(false)),
            lookup_fault: Arc::new(RwLock::new(None)),
        }
    }

    /// Simulates the user approving (`true`) or dismissing (`false`) the prompt.
    pub fn set_user_present(&self, present: bool) {
        self.user_present.store(present, Ordering::SeqCst);
    }

    /// Simulates a device with or without enrolled biometrics.
    pub fn set_biometry_enrolled(&self, enrolled: bool) {
        self.biometry_enrolled.store(enrolled, Ordering::SeqCst);
    }

    /// Makes every subsequent deletion report a fault.
    pub fn set_delete_fault(&self, fault: bool) {
        self.delete_fault.store(fault, Ordering::SeqCst);
    }

    /// Makes every subsequent lookup report keychain status `status`, or
    /// clears the fault with `None`.
    pub fn set_lookup_fault(&self, status: Option<i32>) {
        *self
            .lookup_fault
            .write()
            .unwrap_or_else(PoisonError::into_inner) = status;
    }

    /// Number of keys currently stored.
    pub fn key_count(&self) -> usize {
        self.keys.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn gate_passes(&self) -> bool {
        !self.config.access_policy.is_gated() || self.user_present.load(Ordering::SeqCst)
    }
}

impl Default for MockKeyCustody {
    fn default() -> Self {
        Self::new()
    }
}

impl KeyCustody for MockKeyCustody {
    type Handle = MockKeyHandle;

    fn create_key(&self, tag: &str) -> Result<MockKeyHandle, KeyError> {
        if self.config.access_policy == AccessPolicy::BiometryCurrentSet
            && !self.biometry_enrolled.load(Ordering::SeqCst)
        {
            return Err(KeyError::AccessControlCreationFailed(
                "no biometric enrolment for BiometryCurrentSet".into(),
            ));
        }

        let key = Arc::new(SigningKey::random(&mut rand::rngs::OsRng));
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        if keys.insert(tag.to_string(), key.clone()).is_some() {
            tracing::debug!(tag, "Replaced existing mock key");
        }

        Ok(MockKeyHandle {
            tag: tag.to_string(),
            key,
        })
    }

    fn retrieve_key(&self, tag: &str) -> Result<MockKeyHandle, KeyError> {
        let fault = *self
            .lookup_fault
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        if let Some(status) = fault {
            return Err(KeyError::LookupFailed {
                status,
                message: "injected keychain fault".into(),
            });
        }

        let key = self
            .keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(tag)
            .cloned()
            .ok_or_else(|| KeyError::KeyNotFound(tag.to_string()))?;

        if self.config.lookup_requires_auth && !self.gate_passes() {
            return Err(KeyError::AuthenticationFailed);
        }

        Ok(MockKeyHandle {
            tag: tag.to_string(),
            key,
        })
    }

    fn supports_algorithm(&self, _handle: &MockKeyHandle, algorithm: SignatureAlgorithm) -> bool {
        algorithm == SignatureAlgorithm::EcdsaSha256
    }

    fn create_signature(
        &self,
        handle: &MockKeyHandle,
        _algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, SignError> {
        if !self.gate_passes() {
            return Err(SignError::AuthenticationFailed);
        }

        let signature: Signature = handle.key.sign(data);
        Ok(signature.to_der().as_bytes().to_vec())
    }

    fn public_key_bytes(&self, handle: &MockKeyHandle) -> Option<Vec<u8>> {
        let point = handle.key.verifying_key().to_encoded_point(false);
        Some(point.as_bytes().to_vec())
    }

    fn delete_key(&self, tag: &str) -> bool {
        if self.delete_fault.load(Ordering::SeqCst) {
            return false;
        }
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(tag);
        true
    }

    fn delete_keys_by_prefix(&self, prefix: &str) -> bool {
        if self.delete_fault.load(Ordering::SeqCst) {
            return false;
        }
        let mut keys = self.keys.write().unwrap_or_else(PoisonError::into_inner);
        let before = keys.len();
        keys.retain(|tag, _| !tag.starts_with(prefix));
        tracing::debug!(prefix, deleted = before - keys.len(), "Deleted mock keys");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use p256::ecdsa::signature::Verifier;

    #[test]
    fn test_mock_custody_signature_verifies() {
        let custody = MockKeyCustody::new();
        let handle = custody.create_key("sig").unwrap();

        let der = custody.sign(&handle, b"message").unwrap();
        let signature = Signature::from_der(&der).unwrap();

        assert!(handle.verifying_key().verify(b"message", &signature).is_ok());
    }

    #[test]
    fn test_mock_custody_recreate_supersedes() {
        let custody = MockKeyCustody::new();
        let first = custody.create_key("tag").unwrap();
        let second = custody.create_key("tag").unwrap();

        let found = custody.retrieve_key("tag").unwrap();
        assert_eq!(found.verifying_key(), second.verifying_key());
        assert_ne!(found.verifying_key(), first.verifying_key());
        assert_eq!(custody.key_count(), 1);
    }

    #[test]
    fn test_mock_custody_public_key_is_uncompressed() {
        let custody = MockKeyCustody::new();
        let handle = custody.create_key("pk").unwrap();

        let public_key = custody.public_key_bytes(&handle).unwrap();
        assert_eq!(public_key.len(), 65);
        assert_eq!(public_key[0], 0x04);
    }

    #[test]
    fn test_mock_custody_unrestricted_ignores_presence() {
        let custody = MockKeyCustody::with_config(CustodyConfig {
            access_policy: AccessPolicy::Unrestricted,
            lookup_requires_auth: true,
        });
        custody.set_user_present(false);

        let handle = custody.create_key("open").unwrap();
        assert!(custody.retrieve_key("open").is_ok());
        assert!(custody.sign(&handle, b"data").is_ok());
    }

    #[test]
    fn test_mock_custody_delete_fault() {
        let custody = MockKeyCustody::new();
        custody.create_key("keep").unwrap();
        custody.set_delete_fault(true);

        assert!(!custody.delete_key("keep"));
        assert!(!custody.delete_keys_by_prefix(""));
        assert_eq!(custody.key_count(), 1);
    }

    #[test]
    fn test_mock_custody_survives_poisoned_table() {
        let custody = MockKeyCustody::new();
        custody.create_key("before").unwrap();

        let keys = custody.keys.clone();
        let _ = std::thread::spawn(move || {
            let _guard = keys.write().unwrap();
            panic!("poison the key table");
        })
        .join();

        assert!(custody.keys.is_poisoned());
        assert_eq!(custody.key_count(), 1);
        assert!(custody.retrieve_key("before").is_ok());
        custody.create_key("after").unwrap();
        assert_eq!(custody.key_count(), 2);
        assert!(custody.delete_key("before"));
        assert_eq!(custody.key_count(), 1);
    }
}
