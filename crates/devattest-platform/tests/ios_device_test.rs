//! Secure Enclave device tests.
//!
//! These tests are marked `#[ignore]` and must be run manually on a physical device:
//!
//! ```bash
//! cargo test --target aarch64-apple-ios --package devattest-platform --test ios_device_test -- --ignored
//! ```
//!
//! Signing prompts for Face ID / Touch ID or the device passcode.

#[cfg(target_os = "ios")]
mod ios_tests {
    use devattest_platform::ios::SecureEnclaveCustody;
    use devattest_platform::{AccessPolicy, CustodyConfig, KeyCustody, KeyError};

    const PREFIX: &str = "com.devattest.device-test.";

    fn custody() -> SecureEnclaveCustody {
        SecureEnclaveCustody::new(CustodyConfig {
            access_policy: AccessPolicy::Unrestricted,
            lookup_requires_auth: false,
        })
        .expect("Secure Enclave should be available")
    }

    #[test]
    #[ignore]
    fn test_create_sign_delete() {
        let custody = custody();
        let tag = format!("{PREFIX}sign");

        let handle = custody.create_key(&tag).expect("Should create key");
        let public_key = custody.public_key_bytes(&handle).expect("Should export public key");
        assert_eq!(public_key.len(), 65);
        assert_eq!(public_key[0], 0x04);

        let signature = custody.sign(&handle, b"device test").expect("Should sign");
        assert!(!signature.is_empty());

        assert!(custody.delete_key(&tag));
        assert!(matches!(
            custody.retrieve_key(&tag),
            Err(KeyError::KeyNotFound(_))
        ));
    }

    #[test]
    #[ignore]
    fn test_delete_by_prefix() {
        let custody = custody();
        custody.create_key(&format!("{PREFIX}a")).unwrap();
        custody.create_key(&format!("{PREFIX}b")).unwrap();

        assert!(custody.delete_keys_by_prefix(PREFIX));
        assert!(custody.retrieve_key(&format!("{PREFIX}a")).is_err());
    }
}
