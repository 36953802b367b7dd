//! Concurrency tests for AttestationSession.
//!
//! Verifies per-session mutual exclusion of attestation, concurrent assertions,
//! provider timeouts, cancellation mid-attestation and reset racing persistence.
//!
//! Timing-dependent tests run on a paused clock so they do not depend on
//! scheduler load.

use devattest_core::mock::MockAttestationProvider;
use devattest_core::{
    AttestationError, AttestationSession, IdentifierStore, MemoryIdentifierStore, Operation,
    SessionConfig,
};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const CHALLENGE: &str = "Y29uY3VycmVudC1jaGFsbGVuZ2U=";

fn session_with(
    provider: Arc<MockAttestationProvider>,
    store: MemoryIdentifierStore,
    config: SessionConfig,
) -> Arc<AttestationSession> {
    Arc::new(AttestationSession::load(provider, Arc::new(store), config).unwrap())
}

#[tokio::test(start_paused = true)]
async fn test_racing_attestations_single_winner() {
    let provider = Arc::new(MockAttestationProvider::new());
    provider.set_latency(Duration::from_millis(20));
    let session = session_with(
        provider.clone(),
        MemoryIdentifierStore::new(),
        SessionConfig::default(),
    );

    let (a, b) = tokio::join!(
        session.generate_attestation(CHALLENGE),
        session.generate_attestation(CHALLENGE)
    );

    let (winner, loser) = match (a, b) {
        (Ok(winner), Err(loser)) | (Err(loser), Ok(winner)) => (winner, loser),
        other => panic!("expected exactly one winner, got {:?}", other),
    };
    assert_eq!(
        loser,
        AttestationError::AlreadyAttested {
            key_id: winner.key_id.clone()
        }
    );
    assert_eq!(provider.generate_calls(), 1);
    assert_eq!(session.key_id(), Some(winner.key_id));
}

#[tokio::test(start_paused = true)]
async fn test_racing_attestations_across_tasks() {
    let provider = Arc::new(MockAttestationProvider::new());
    provider.set_latency(Duration::from_millis(10));
    let session = session_with(
        provider.clone(),
        MemoryIdentifierStore::new(),
        SessionConfig::default(),
    );

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let session = session.clone();
            tokio::spawn(async move { session.generate_attestation(CHALLENGE).await })
        })
        .collect();

    let mut successes = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => successes += 1,
            Err(AttestationError::AlreadyAttested { .. }) => {}
            Err(other) => panic!("unexpected error: {}", other),
        }
    }

    assert_eq!(successes, 1);
    assert_eq!(provider.generate_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_assertions() {
    let provider = Arc::new(MockAttestationProvider::new());
    let session = session_with(
        provider.clone(),
        MemoryIdentifierStore::new(),
        SessionConfig::default(),
    );
    let attestation = session.generate_attestation(CHALLENGE).await.unwrap();
    provider.set_latency(Duration::from_millis(5));

    let handles: Vec<_> = (0..16)
        .map(|i| {
            let session = session.clone();
            tokio::spawn(async move { session.generate_assertion(format!("req-{}", i)).await })
        })
        .collect();

    for handle in handles {
        let assertion = handle.await.unwrap().unwrap();
        assert_eq!(assertion.key_id, attestation.key_id);
    }
    assert_eq!(provider.sign_calls(), 16);
}

#[tokio::test(start_paused = true)]
async fn test_provider_timeout_is_reported() {
    let provider = Arc::new(MockAttestationProvider::new());
    provider.set_latency(Duration::from_millis(500));
    let session = session_with(
        provider.clone(),
        MemoryIdentifierStore::new(),
        SessionConfig {
            provider_timeout: Some(Duration::from_millis(10)),
            ..SessionConfig::default()
        },
    );

    let err = session.generate_attestation(CHALLENGE).await.unwrap_err();

    assert_eq!(err, AttestationError::ProviderTimeout(Operation::GenerateKey));
    assert!(err.is_retryable());
    assert!(!session.is_attested());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_attestation_leaves_session_unattested() {
    let provider = Arc::new(MockAttestationProvider::new());
    provider.set_latency(Duration::from_millis(100));
    let store = MemoryIdentifierStore::new();
    let session = session_with(provider.clone(), store.clone(), SessionConfig::default());

    // Key generation finishes at ~100ms; attestation is abandoned at ~150ms.
    let outcome = tokio::time::timeout(
        Duration::from_millis(150),
        session.generate_attestation(CHALLENGE),
    )
    .await;

    assert!(outcome.is_err(), "attestation should have been abandoned");
    assert!(!session.is_attested());
    assert_eq!(store.get("AppAttestKeyId").unwrap(), None);
    assert_eq!(provider.key_count(), 1, "orphaned key remains in hardware");

    // The lock is released; a fresh attempt succeeds with a new key.
    provider.set_latency(Duration::from_millis(0));
    let result = session.generate_attestation(CHALLENGE).await.unwrap();
    assert_eq!(provider.key_count(), 2);
    assert_eq!(session.key_id(), Some(result.key_id));
}

#[tokio::test(start_paused = true)]
async fn test_snapshot_readable_during_attestation() {
    let provider = Arc::new(MockAttestationProvider::new());
    provider.set_latency(Duration::from_millis(50));
    let session = session_with(
        provider.clone(),
        MemoryIdentifierStore::new(),
        SessionConfig::default(),
    );

    let worker = session.clone();
    let task = tokio::spawn(async move { worker.generate_attestation(CHALLENGE).await });

    tokio::time::sleep(Duration::from_millis(20)).await;
    let during = session.snapshot();
    assert!(!during.is_attested);
    assert_eq!(during.status, "Generating key");

    task.await.unwrap().unwrap();
    assert!(session.snapshot().is_attested);
}

/// Store whose `set` writes through and then blocks until released.
struct GatedStore {
    inner: MemoryIdentifierStore,
    entered: Mutex<mpsc::Sender<()>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl IdentifierStore for GatedStore {
    fn get(&self, name: &str) -> devattest_core::Result<Option<String>> {
        self.inner.get(name)
    }

    fn set(&self, name: &str, value: &str) -> devattest_core::Result<()> {
        self.inner.set(name, value)?;
        let _ = self.entered.lock().unwrap().send(());
        let _ = self
            .release
            .lock()
            .unwrap()
            .recv_timeout(Duration::from_secs(5));
        Ok(())
    }

    fn remove(&self, name: &str) -> devattest_core::Result<()> {
        self.inner.remove(name)
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reset_during_persist_leaves_consistent_state() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let persisted = MemoryIdentifierStore::new();
    let store = GatedStore {
        inner: persisted.clone(),
        entered: Mutex::new(entered_tx),
        release: Mutex::new(release_rx),
    };
    let session = Arc::new(
        AttestationSession::load(
            Arc::new(MockAttestationProvider::new()),
            Arc::new(store),
            SessionConfig::default(),
        )
        .unwrap(),
    );

    let attesting = tokio::spawn({
        let session = session.clone();
        async move { session.generate_attestation(CHALLENGE).await }
    });

    // The identifier is written and the store is parked inside `set`.
    tokio::task::spawn_blocking(move || entered_rx.recv_timeout(Duration::from_secs(5)))
        .await
        .unwrap()
        .unwrap();

    let resetting = tokio::task::spawn_blocking({
        let session = session.clone();
        move || session.reset()
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    release_tx.send(()).unwrap();

    attesting.await.unwrap().unwrap();
    resetting.await.unwrap().unwrap();

    let stored = persisted.get("AppAttestKeyId").unwrap();
    assert_eq!(
        session.is_attested(),
        stored.is_some(),
        "in-memory state and persisted identifier disagree: stored={:?}",
        stored
    );
    assert!(!session.is_attested(), "reset issued last must win");
    assert_eq!(session.key_id(), None);
}
