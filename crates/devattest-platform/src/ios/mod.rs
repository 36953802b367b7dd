//! iOS platform implementation.
//!
//! Provides hardware-backed key custody via the Secure Enclave.
//!
//! # Architecture
//!
//! - **SecureEnclaveCustody**: Production implementation using Security.framework
//!   - Non-exportable P-256 keys generated inside the Secure Enclave
//!   - Persistent storage in the iOS Keychain, addressed by application tag
//!   - Access control built from [`crate::AccessPolicy`]
//!
//! The simulator has no Secure Enclave; use [`crate::mock::MockKeyCustody`] there.

pub mod secure_enclave;

pub use secure_enclave::{SecureEnclaveCustody, SecureEnclaveKey};
