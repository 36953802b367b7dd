//! Client-side device attestation and request assertion.
//!
//! This crate drives the attestation/assertion lifecycle of one hardware-bound key:
//! - One-time attestation of a fresh key against a server challenge
//! - Repeated assertions binding request payloads to the attested key
//! - SHA-256 client-data hashing that the verifier can reproduce
//! - Persistence of the attested key identifier across restarts
//!
//! Hardware access is delegated to a [`PlatformAttestationProvider`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod challenge;
pub mod digest;
pub mod error;
pub mod extract;
pub mod mock;
pub mod provider;
pub mod session;
pub mod store;

pub use challenge::Challenge;
pub use digest::ClientDataHash;
pub use error::{AttestationError, ProviderFault, Result};
pub use extract::{PublicKeyExtractor, UncompressedPointScanner};
pub use provider::{Operation, PlatformAttestationProvider, ProviderError};
pub use session::{
    AssertionResult, AttestationResult, AttestationSession, SessionConfig, SessionSnapshot,
};
pub use store::{FileIdentifierStore, IdentifierStore, MemoryIdentifierStore};
