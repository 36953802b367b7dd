//! Attestation session state machine.
//!
//! Two states:
//! - **Unattested**: no key identifier known.
//! - **Attested**: a key identifier was attested and persisted.
//!
//! `generate_attestation` moves Unattested to Attested; `reset` returns to
//! Unattested. Assertions never change state.

use crate::challenge::Challenge;
use crate::digest::ClientDataHash;
use crate::error::{AttestationError, Result};
use crate::extract::PublicKeyExtractor;
use crate::provider::{Operation, PlatformAttestationProvider, ProviderError};
use crate::store::IdentifierStore;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;

/// Default name of the persisted identifier slot.
pub const DEFAULT_KEY_ID_SLOT: &str = "AppAttestKeyId";

/// Session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the persisted identifier slot.
    pub key_id_slot: String,
    /// Upper bound on each provider call. `None` waits indefinitely.
    pub provider_timeout: Option<Duration>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            key_id_slot: DEFAULT_KEY_ID_SLOT.to_string(),
            provider_timeout: None,
        }
    }
}

/// One completed attestation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttestationResult {
    /// Attested key identifier.
    pub key_id: String,
    /// Opaque attestation envelope.
    pub attestation: Vec<u8>,
    /// Decoded challenge bytes the attestation is bound to.
    pub challenge: Vec<u8>,
}

impl AttestationResult {
    /// Envelope encoded for transport.
    pub fn attestation_base64(&self) -> String {
        STANDARD.encode(&self.attestation)
    }

    /// Challenge re-encoded for transport.
    pub fn challenge_base64(&self) -> String {
        STANDARD.encode(&self.challenge)
    }
}

/// One signed request proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssertionResult {
    /// Opaque assertion blob.
    pub assertion: Vec<u8>,
    /// Exact payload bytes that were hashed.
    pub request_payload: Vec<u8>,
    /// Key the assertion was produced under.
    pub key_id: String,
}

impl AssertionResult {
    /// Assertion encoded for transport.
    pub fn assertion_base64(&self) -> String {
        STANDARD.encode(&self.assertion)
    }
}

/// Read-only view of the session for display.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Human-readable progress string. Diagnostic only.
    pub status: String,
    /// Attested key identifier, if any.
    pub key_id: Option<String>,
    /// Whether the session is Attested.
    pub is_attested: bool,
}

#[derive(Debug)]
struct SessionState {
    key_id: Option<String>,
    status: String,
}

/// Logs a warning if an attestation is abandoned after its key was created.
struct OrphanGuard {
    key_id: Option<String>,
}

impl OrphanGuard {
    fn new(key_id: &str) -> Self {
        Self {
            key_id: Some(key_id.to_string()),
        }
    }

    fn disarm(mut self) {
        self.key_id = None;
    }
}

impl Drop for OrphanGuard {
    fn drop(&mut self) {
        if let Some(key_id) = self.key_id.take() {
            tracing::warn!(
                key_id = %key_id,
                "Attestation did not complete; hardware key is orphaned"
            );
        }
    }
}

/// Attestation/assertion lifecycle for one hardware-bound key.
///
/// Share across tasks with `Arc<AttestationSession>`.
///
/// # Example
///
/// ```
/// use devattest_core::mock::MockAttestationProvider;
/// use devattest_core::session::{AttestationSession, SessionConfig};
/// use devattest_core::store::MemoryIdentifierStore;
/// use std::sync::Arc;
///
/// # async fn example() -> devattest_core::Result<()> {
/// let session = AttestationSession::load(
///     Arc::new(MockAttestationProvider::new()),
///     Arc::new(MemoryIdentifierStore::new()),
///     SessionConfig::default(),
/// )?;
///
/// let attestation = session.generate_attestation("c2VydmVyLWNoYWxsZW5nZQ==").await?;
/// let assertion = session.generate_assertion(b"{\"action\":\"login\"}").await?;
/// assert_eq!(assertion.key_id, attestation.key_id);
/// # Ok(())
/// # }
/// ```
pub struct AttestationSession {
    provider: Arc<dyn PlatformAttestationProvider>,
    store: Arc<dyn IdentifierStore>,
    config: SessionConfig,
    extractor: Option<Box<dyn PublicKeyExtractor>>,
    state: RwLock<SessionState>,
    attest_lock: Mutex<()>,
}

impl AttestationSession {
    /// Creates a session, restoring any persisted key identifier.
    ///
    /// A persisted identifier is trusted without re-validating it with the provider.
    ///
    /// # Errors
    ///
    /// - `AttestationError::Storage` if the identifier store cannot be read
    pub fn load(
        provider: Arc<dyn PlatformAttestationProvider>,
        store: Arc<dyn IdentifierStore>,
        config: SessionConfig,
    ) -> Result<Self> {
        let key_id = store.get(&config.key_id_slot)?;
        let status = match &key_id {
            Some(key_id) => {
                tracing::info!(key_id = %key_id, "Restored attested key identifier");
                "Attested (restored)".to_string()
            }
            None => "Not attested".to_string(),
        };

        Ok(Self {
            provider,
            store,
            config,
            extractor: None,
            state: RwLock::new(SessionState { key_id, status }),
            attest_lock: Mutex::new(()),
        })
    }

    /// Installs a best-effort public-key extractor for [`Self::public_key_hint`].
    pub fn with_extractor(mut self, extractor: impl PublicKeyExtractor + 'static) -> Self {
        self.extractor = Some(Box::new(extractor));
        self
    }

    /// Current status, key identifier and attested flag.
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        SessionSnapshot {
            status: state.status.clone(),
            key_id: state.key_id.clone(),
            is_attested: state.key_id.is_some(),
        }
    }

    /// Attested key identifier, if any.
    pub fn key_id(&self) -> Option<String> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .key_id
            .clone()
    }

    /// Whether the session is Attested.
    pub fn is_attested(&self) -> bool {
        self.key_id().is_some()
    }

    /// Human-readable progress string.
    pub fn status(&self) -> String {
        self.snapshot().status
    }

    fn set_status(&self, status: impl Into<String>) {
        let status = status.into();
        tracing::debug!(status = %status, "Session status");
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .status = status;
    }

    fn fail(&self, error: AttestationError) -> AttestationError {
        self.set_status(format!("Error: {}", error));
        error
    }

    async fn call<T, F>(&self, operation: Operation, request: F) -> Result<T>
    where
        F: Future<Output = core::result::Result<T, ProviderError>>,
    {
        let outcome = match self.config.provider_timeout {
            Some(limit) => tokio::time::timeout(limit, request)
                .await
                .map_err(|_| AttestationError::ProviderTimeout(operation))?,
            None => request.await,
        };
        outcome.map_err(|e| operation.classify(e))
    }

    /// Attests a fresh hardware key against a base64 server challenge.
    ///
    /// The challenge is decoded before any provider call.
    ///
    /// # Errors
    ///
    /// - `AttestationError::InvalidChallenge` if `challenge` is not valid base64
    /// - `AttestationError::AlreadyAttested` if the session already holds a key
    /// - `AttestationError::NotSupported` if the provider is unavailable
    /// - `AttestationError::KeyGenerationFailed` / `AttestationFailed` on provider faults
    /// - `AttestationError::ProviderTimeout` if a call exceeds the configured bound
    pub async fn generate_attestation(&self, challenge: &str) -> Result<AttestationResult> {
        let challenge = Challenge::from_base64(challenge).map_err(|e| self.fail(e))?;
        self.attest_challenge(challenge).await
    }

    /// Attests a fresh hardware key against already-decoded challenge bytes.
    ///
    /// Calls are serialised per session. A caller that loses a race observes
    /// `AlreadyAttested`.
    pub async fn attest_challenge(&self, challenge: Challenge) -> Result<AttestationResult> {
        let _exclusive = self.attest_lock.lock().await;

        if let Some(key_id) = self.key_id() {
            return Err(AttestationError::AlreadyAttested { key_id });
        }
        if !self.provider.is_supported() {
            return Err(self.fail(AttestationError::NotSupported));
        }

        self.set_status("Generating key");
        let key_id = self
            .call(Operation::GenerateKey, self.provider.generate_key())
            .await
            .map_err(|e| self.fail(e))?;
        let orphan = OrphanGuard::new(&key_id);
        tracing::info!(key_id = %key_id, "Generated attestation key");

        let client_data_hash = ClientDataHash::of(challenge.as_bytes());
        self.set_status("Attesting key");
        let attestation = self
            .call(
                Operation::Attest,
                self.provider.attest_key(&key_id, &client_data_hash),
            )
            .await
            .map_err(|e| self.fail(e))?;

        // The state lock spans the store write so a concurrent reset sees
        // either nothing or both the persisted and in-memory identifier.
        let persisted = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            self.store
                .set(&self.config.key_id_slot, &key_id)
                .map(|()| {
                    state.key_id = Some(key_id.clone());
                    state.status = "Attested".to_string();
                })
        };
        persisted.map_err(|e| self.fail(e))?;
        orphan.disarm();

        tracing::info!(
            key_id = %key_id,
            attestation_len = attestation.len(),
            "Key attested"
        );
        Ok(AttestationResult {
            key_id,
            attestation,
            challenge: challenge.into_bytes(),
        })
    }

    /// Signs a request payload with the attested key.
    ///
    /// May run concurrently and any number of times once attested.
    ///
    /// # Errors
    ///
    /// - `AttestationError::NoKeyAvailable` if the session is Unattested
    /// - `AttestationError::AuthenticationFailed` if the user-presence check was rejected
    /// - `AttestationError::SigningFailed` on other provider faults
    pub async fn generate_assertion(&self, payload: impl AsRef<[u8]>) -> Result<AssertionResult> {
        let key_id = self.key_id().ok_or(AttestationError::NoKeyAvailable)?;
        let request_payload = payload.as_ref().to_vec();

        let client_data_hash = ClientDataHash::of(&request_payload);
        let assertion = self
            .call(
                Operation::Sign,
                self.provider
                    .generate_assertion(&key_id, &client_data_hash),
            )
            .await?;

        tracing::debug!(
            key_id = %key_id,
            payload_len = request_payload.len(),
            "Assertion generated"
        );
        Ok(AssertionResult {
            assertion,
            request_payload,
            key_id,
        })
    }

    /// Signs a base64-encoded request payload. The decoded bytes are hashed.
    ///
    /// # Errors
    ///
    /// - `AttestationError::InvalidPayload` if `payload` is not valid base64
    /// - Otherwise as [`Self::generate_assertion`]
    pub async fn generate_assertion_base64(&self, payload: &str) -> Result<AssertionResult> {
        let bytes = STANDARD
            .decode(payload.trim())
            .map_err(|e| AttestationError::InvalidPayload(e.to_string()))?;
        self.generate_assertion(bytes).await
    }

    /// Forgets the attested key.
    ///
    /// In-memory state is always cleared. The hardware key itself is left in
    /// place; delete it through key custody if required.
    ///
    /// # Errors
    ///
    /// - `AttestationError::Storage` if the persisted identifier could not be removed
    pub fn reset(&self) -> Result<()> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.status = "Reset".to_string();
        if let Some(key_id) = state.key_id.take() {
            tracing::info!(key_id = %key_id, "Attestation reset");
        }

        self.store.remove(&self.config.key_id_slot).map_err(|e| {
            tracing::warn!(error = %e, "Failed to clear persisted key identifier");
            e
        })
    }

    /// Best-effort public key recovered from `result`'s envelope.
    ///
    /// Returns `None` without an extractor or when no key is recognised.
    pub fn public_key_hint(&self, result: &AttestationResult) -> Option<Vec<u8>> {
        self.extractor
            .as_ref()
            .and_then(|extractor| extractor.extract(&result.attestation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockAttestationProvider;
    use crate::store::MemoryIdentifierStore;

    fn session() -> AttestationSession {
        AttestationSession::load(
            Arc::new(MockAttestationProvider::new()),
            Arc::new(MemoryIdentifierStore::new()),
            SessionConfig::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_initial_state_unattested() {
        let snapshot = session().snapshot();
        assert!(!snapshot.is_attested);
        assert_eq!(snapshot.key_id, None);
        assert_eq!(snapshot.status, "Not attested");
    }

    #[tokio::test]
    async fn test_status_tracks_attestation() {
        let session = session();
        session.generate_attestation("aGVsbG8=").await.unwrap();
        assert_eq!(session.status(), "Attested");

        session.reset().unwrap();
        assert_eq!(session.status(), "Reset");
    }

    #[tokio::test]
    async fn test_invalid_challenge_sets_error_status() {
        let session = session();
        let err = session.generate_attestation("%%%").await.unwrap_err();

        assert!(matches!(err, AttestationError::InvalidChallenge(_)));
        assert!(session.status().starts_with("Error: "));
    }

    const ORPHAN_WARNING: &str = "hardware key is orphaned";

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Routes warnings on the current thread into a buffer until the guard drops.
    fn capture_warnings() -> (CapturedLogs, tracing::subscriber::DefaultGuard) {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        (logs, tracing::subscriber::set_default(subscriber))
    }

    #[test]
    fn test_orphan_guard_warns_on_drop() {
        let (logs, _guard) = capture_warnings();

        drop(OrphanGuard::new("abandoned-key"));

        let output = logs.contents();
        assert!(output.contains(ORPHAN_WARNING), "missing warning: {}", output);
        assert!(output.contains("abandoned-key"));
    }

    #[test]
    fn test_orphan_guard_silent_after_disarm() {
        let (logs, _guard) = capture_warnings();

        OrphanGuard::new("kept-key").disarm();

        assert!(!logs.contents().contains(ORPHAN_WARNING));
    }

    #[tokio::test]
    async fn test_failed_attestation_logs_orphan() {
        let (logs, _guard) = capture_warnings();
        let provider = MockAttestationProvider::new();
        provider.fail(
            Operation::Attest,
            ProviderError::Failed(crate::error::ProviderFault::new(4, "server unavailable")),
        );
        let session = AttestationSession::load(
            Arc::new(provider),
            Arc::new(MemoryIdentifierStore::new()),
            SessionConfig::default(),
        )
        .unwrap();

        let err = session.generate_attestation("aGVsbG8=").await.unwrap_err();

        assert!(matches!(err, AttestationError::AttestationFailed(_)));
        assert!(logs.contents().contains(ORPHAN_WARNING));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_attestation_logs_orphan() {
        let (logs, _guard) = capture_warnings();
        let provider = MockAttestationProvider::new();
        provider.set_latency(Duration::from_millis(100));
        let session = AttestationSession::load(
            Arc::new(provider),
            Arc::new(MemoryIdentifierStore::new()),
            SessionConfig::default(),
        )
        .unwrap();

        // Key generation completes at 100ms; attestation would complete at 200ms.
        let outcome = tokio::time::timeout(
            Duration::from_millis(150),
            session.generate_attestation("aGVsbG8="),
        )
        .await;

        assert!(outcome.is_err());
        assert!(logs.contents().contains(ORPHAN_WARNING));
    }

    #[tokio::test]
    async fn test_completed_attestation_logs_no_orphan() {
        let (logs, _guard) = capture_warnings();
        let session = session();

        session.generate_attestation("aGVsbG8=").await.unwrap();

        assert!(!logs.contents().contains(ORPHAN_WARNING));
    }

    #[tokio::test]
    async fn test_no_extractor_yields_no_hint() {
        let session = session();
        let result = session.generate_attestation("aGVsbG8=").await.unwrap();
        assert_eq!(session.public_key_hint(&result), None);
    }
}
