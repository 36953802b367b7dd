//! Mock implementations for testing.
//!
//! Provides a deterministic, software-backed attestation provider for CI.
//! Keys are P-256 pairs held in memory; envelopes and assertions are real ECDSA
//! signatures so tests can verify them end to end.

use crate::digest::ClientDataHash;
use crate::error::ProviderFault;
use crate::provider::{Operation, PlatformAttestationProvider, ProviderError};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use p256::ecdsa::{signature::Signer, Signature, SigningKey, VerifyingKey};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Envelope header written before the attested public key.
pub const MOCK_ENVELOPE_HEADER: &[u8] = b"mock-attestation-v1";

/// Status returned when a key is unknown or misused.
pub const INVALID_KEY_STATUS: i64 = 3;

struct MockKey {
    signing_key: SigningKey,
    attested: bool,
}

#[derive(Default)]
struct Faults {
    generate_key: Option<ProviderError>,
    attest: Option<ProviderError>,
    sign: Option<ProviderError>,
}

/// Mock attestation provider for testing.
///
/// - Key identifiers are `base64(SHA-256(uncompressed public key))`.
/// - Envelopes are `MOCK_ENVELOPE_HEADER || public key || client data hash || DER signature`,
///   the signature covering the client data hash.
/// - Assertions are DER ECDSA signatures over the client data hash.
/// - Attesting the same key twice fails with `INVALID_KEY_STATUS`.
///
/// # Example
///
/// ```
/// use devattest_core::mock::MockAttestationProvider;
/// use devattest_core::provider::PlatformAttestationProvider;
///
/// # async fn example() {
/// let provider = MockAttestationProvider::new();
/// let key_id = provider.generate_key().await.unwrap();
/// assert!(provider.verifying_key(&key_id).is_some());
/// # }
/// ```
pub struct MockAttestationProvider {
    supported: AtomicBool,
    keys: Mutex<HashMap<String, MockKey>>,
    faults: Mutex<Faults>,
    latency: Mutex<Option<Duration>>,
    generate_calls: AtomicUsize,
    attest_calls: AtomicUsize,
    sign_calls: AtomicUsize,
}

impl MockAttestationProvider {
    /// Creates a supported provider with no keys.
    pub fn new() -> Self {
        Self {
            supported: AtomicBool::new(true),
            keys: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
            latency: Mutex::new(None),
            generate_calls: AtomicUsize::new(0),
            attest_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a provider that reports itself unsupported.
    pub fn unsupported() -> Self {
        let provider = Self::new();
        provider.supported.store(false, Ordering::SeqCst);
        provider
    }

    /// Makes every call to `operation` fail with `error` until cleared.
    pub fn fail(&self, operation: Operation, error: ProviderError) {
        let mut faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match operation {
            Operation::GenerateKey => &mut faults.generate_key,
            Operation::Attest => &mut faults.attest,
            Operation::Sign => &mut faults.sign,
        };
        *slot = Some(error);
    }

    /// Removes every injected failure.
    pub fn clear_faults(&self) {
        *self.faults.lock().unwrap_or_else(PoisonError::into_inner) = Faults::default();
    }

    /// Delays every async call by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(PoisonError::into_inner) = Some(latency);
    }

    /// Number of `generate_key` calls made.
    pub fn generate_calls(&self) -> usize {
        self.generate_calls.load(Ordering::SeqCst)
    }

    /// Number of `attest_key` calls made.
    pub fn attest_calls(&self) -> usize {
        self.attest_calls.load(Ordering::SeqCst)
    }

    /// Number of `generate_assertion` calls made.
    pub fn sign_calls(&self) -> usize {
        self.sign_calls.load(Ordering::SeqCst)
    }

    /// Number of keys created, attested or not.
    pub fn key_count(&self) -> usize {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Verifying key for `key_id`, for checking envelopes and assertions.
    pub fn verifying_key(&self, key_id: &str) -> Option<VerifyingKey> {
        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        keys.get(key_id)
            .map(|key| VerifyingKey::from(&key.signing_key))
    }

    async fn simulate(&self, operation: Operation) -> Result<(), ProviderError> {
        let latency = *self.latency.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if !self.is_supported() {
            return Err(ProviderError::Unsupported);
        }
        let faults = self.faults.lock().unwrap_or_else(PoisonError::into_inner);
        let fault = match operation {
            Operation::GenerateKey => &faults.generate_key,
            Operation::Attest => &faults.attest,
            Operation::Sign => &faults.sign,
        };
        match fault {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    fn key_id_for(verifying_key: &VerifyingKey) -> String {
        let point = verifying_key.to_encoded_point(false);
        STANDARD.encode(ClientDataHash::of(point.as_bytes()).as_bytes())
    }

    fn invalid_key(key_id: &str, reason: &str) -> ProviderError {
        ProviderError::Failed(ProviderFault::new(
            INVALID_KEY_STATUS,
            format!("invalid key {}: {}", key_id, reason),
        ))
    }
}

impl Default for MockAttestationProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PlatformAttestationProvider for MockAttestationProvider {
    fn is_supported(&self) -> bool {
        self.supported.load(Ordering::SeqCst)
    }

    async fn generate_key(&self) -> Result<String, ProviderError> {
        self.generate_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate(Operation::GenerateKey).await?;

        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let key_id = Self::key_id_for(&VerifyingKey::from(&signing_key));
        self.keys
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(
                key_id.clone(),
                MockKey {
                    signing_key,
                    attested: false,
                },
            );
        Ok(key_id)
    }

    async fn attest_key(
        &self,
        key_id: &str,
        client_data_hash: &ClientDataHash,
    ) -> Result<Vec<u8>, ProviderError> {
        self.attest_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate(Operation::Attest).await?;

        let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let key = keys
            .get_mut(key_id)
            .ok_or_else(|| Self::invalid_key(key_id, "unknown"))?;
        if key.attested {
            return Err(Self::invalid_key(key_id, "already attested"));
        }

        let public_key = VerifyingKey::from(&key.signing_key).to_encoded_point(false);
        let signature: Signature = key.signing_key.sign(client_data_hash.as_bytes());
        key.attested = true;

        let mut envelope = MOCK_ENVELOPE_HEADER.to_vec();
        envelope.extend_from_slice(public_key.as_bytes());
        envelope.extend_from_slice(client_data_hash.as_bytes());
        envelope.extend_from_slice(signature.to_der().as_bytes());
        Ok(envelope)
    }

    async fn generate_assertion(
        &self,
        key_id: &str,
        client_data_hash: &ClientDataHash,
    ) -> Result<Vec<u8>, ProviderError> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        self.simulate(Operation::Sign).await?;

        let keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
        let key = keys
            .get(key_id)
            .ok_or_else(|| Self::invalid_key(key_id, "unknown"))?;
        if !key.attested {
            return Err(Self::invalid_key(key_id, "not attested"));
        }

        let signature: Signature = key.signing_key.sign(client_data_hash.as_bytes());
        Ok(signature.to_der().as_bytes().to_vec())
    }
}
