//! Hardware-backed key custody for device attestation clients.
//!
//! Implements:
//! - iOS: Secure Enclave P-256 keys gated by biometry-or-passcode
//! - Testing: in-memory software custody with a simulated access gate

// iOS platform code requires unsafe for FFI to Security.framework
#![cfg_attr(not(target_os = "ios"), forbid(unsafe_code))]
#![warn(missing_docs)]

pub mod error;
pub mod mock;
pub mod traits;

#[cfg(target_os = "ios")]
pub mod ios;

pub use error::{KeyError, Result, SignError};
pub use traits::{AccessPolicy, CustodyConfig, KeyCustody, KeyHandle, SignatureAlgorithm};
