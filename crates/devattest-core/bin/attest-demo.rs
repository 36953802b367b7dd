//! Attestation walkthrough against the software mock provider.
//!
//! Reads configuration from environment variables:
//! - `ATTEST_STORE`: identifier store file. In-memory when unset.
//! - `ATTEST_CHALLENGE`: base64 server challenge. Random when unset.
//!
//! Every command-line argument is signed as one request payload.

use devattest_core::mock::MockAttestationProvider;
use devattest_core::{
    AttestationError, AttestationSession, Challenge, FileIdentifierStore, IdentifierStore,
    MemoryIdentifierStore, SessionConfig, UncompressedPointScanner,
};
use std::env;
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let store: Arc<dyn IdentifierStore> = match env::var("ATTEST_STORE") {
        Ok(path) => Arc::new(FileIdentifierStore::new(path)),
        Err(_) => Arc::new(MemoryIdentifierStore::new()),
    };
    let challenge = match env::var("ATTEST_CHALLENGE") {
        Ok(encoded) => encoded,
        Err(_) => Challenge::random().to_base64(),
    };

    let session = AttestationSession::load(
        Arc::new(MockAttestationProvider::new()),
        store,
        SessionConfig::default(),
    )?
    .with_extractor(UncompressedPointScanner);

    eprintln!("Status: {}", session.status());

    // The mock provider forgets its keys between runs, so a restored
    // identifier cannot sign. Start over in that case.
    if session.is_attested() {
        eprintln!("Discarding restored identifier from a previous run");
        session.reset()?;
    }

    match session.generate_attestation(&challenge).await {
        Ok(result) => {
            println!("key_id: {}", result.key_id);
            println!("challenge: {}", result.challenge_base64());
            println!("attestation: {}", result.attestation_base64());
            if let Some(public_key) = session.public_key_hint(&result) {
                println!("public_key: {}", hex::encode(public_key));
            }
        }
        Err(AttestationError::AlreadyAttested { key_id }) => {
            eprintln!("Already attested as {}", key_id);
        }
        Err(e) => return Err(e.into()),
    }

    let payloads: Vec<String> = env::args().skip(1).collect();
    for payload in &payloads {
        let assertion = session.generate_assertion(payload).await?;
        println!("assertion[{}]: {}", payload, assertion.assertion_base64());
    }

    eprintln!("Status: {}", session.status());
    Ok(())
}
