//! Secure Enclave key custody for iOS.
//!
//! Implements tag-addressed, hardware-backed signing keys using Apple's Secure Enclave.
//!
//! # Security Properties
//!
//! - **Hardware-backed**: P-256 keys generated and stored in the Secure Enclave coprocessor
//! - **Non-exportable**: only the public half can leave the enclave
//! - **Persistent**: keys stored in the iOS Keychain, survive app restarts
//! - **Gated**: `kSecAttrAccessControl` built from the configured [`AccessPolicy`]
//!
//! # Availability
//!
//! - Physical devices with an A7 chip or later
//! - Returns `KeyError::Unavailable` on the simulator
//!
//! # Example
//!
//! ```no_run
//! use devattest_platform::ios::SecureEnclaveCustody;
//! use devattest_platform::{CustodyConfig, KeyCustody};
//!
//! let custody = SecureEnclaveCustody::new(CustodyConfig::default()).unwrap();
//! let handle = custody.create_key("com.example.app.signing").unwrap();
//! let signature = custody.sign(&handle, b"request body").unwrap();
//! ```

use crate::error::{KeyError, SignError};
use crate::traits::{AccessPolicy, CustodyConfig, KeyCustody, KeyHandle, SignatureAlgorithm};
use core_foundation::base::{CFType, TCFType};
use core_foundation::boolean::CFBoolean;
use core_foundation::data::CFData;
use core_foundation::dictionary::CFDictionary;
use core_foundation::error::CFError;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_foundation_sys::base::{kCFAllocatorDefault, CFTypeRef};
use core_foundation_sys::error::CFErrorRef;
use security_framework::key::SecKey;
use security_framework_sys::access_control::{
    kSecAccessControlBiometryCurrentSet, kSecAccessControlPrivateKeyUsage,
    kSecAccessControlUserPresence, kSecAttrAccessibleWhenUnlockedThisDeviceOnly,
    SecAccessControlCreateWithFlags,
};
use security_framework_sys::item::{
    kSecAttrAccessControl, kSecAttrApplicationTag, kSecAttrIsPermanent, kSecAttrKeySizeInBits,
    kSecAttrKeyType, kSecAttrKeyTypeECSECPrimeRandom, kSecAttrTokenID,
    kSecAttrTokenIDSecureEnclave, kSecClass, kSecClassKey, kSecMatchLimit, kSecMatchLimitAll,
    kSecPrivateKeyAttrs, kSecReturnAttributes, kSecReturnRef,
};
use security_framework_sys::key::{
    kSecKeyAlgorithmECDSASignatureMessageX962SHA256,
    kSecKeyAlgorithmECDSASignatureMessageX962SHA384,
    kSecKeyAlgorithmRSASignatureMessagePKCS1v15SHA256, kSecKeyOperationTypeSign,
    SecKeyAlgorithm, SecKeyCopyExternalRepresentation, SecKeyCopyPublicKey,
    SecKeyCreateRandomKey, SecKeyCreateSignature, SecKeyIsAlgorithmSupported,
};
use security_framework_sys::keychain_item::{SecItemCopyMatching, SecItemDelete};
use std::ptr::null_mut;

const ERR_SEC_SUCCESS: i32 = 0;
const ERR_SEC_USER_CANCELED: i32 = -128;
const ERR_SEC_AUTH_FAILED: i32 = -25293;
const ERR_SEC_ITEM_NOT_FOUND: i32 = -25300;

/// Handle to a Secure Enclave private key.
pub struct SecureEnclaveKey {
    tag: String,
    key: SecKey,
}

impl KeyHandle for SecureEnclaveKey {
    fn tag(&self) -> &str {
        &self.tag
    }
}

/// Secure Enclave key custody.
pub struct SecureEnclaveCustody {
    config: CustodyConfig,
}

impl SecureEnclaveCustody {
    /// Creates a custody backend.
    ///
    /// # Errors
    ///
    /// - `KeyError::Unavailable` if the Secure Enclave is not present (simulator)
    pub fn new(config: CustodyConfig) -> Result<Self, KeyError> {
        if !Self::is_secure_enclave_available() {
            return Err(KeyError::Unavailable(
                "Secure Enclave not available on this device".into(),
            ));
        }
        Ok(Self { config })
    }

    fn is_secure_enclave_available() -> bool {
        // Simulator builds target x86_64 or the aarch64-apple-ios-sim ABI.
        cfg!(all(target_arch = "aarch64", not(target_abi = "sim")))
    }

    fn static_key(constant: core_foundation_sys::string::CFStringRef) -> CFString {
        // SAFETY: Security.framework attribute keys are static CFString constants.
        // wrap_under_get_rule retains without taking ownership of the static reference.
        unsafe { CFString::wrap_under_get_rule(constant) }
    }

    fn access_control_flags(policy: AccessPolicy) -> usize {
        let gate = match policy {
            AccessPolicy::UserPresence => kSecAccessControlUserPresence,
            AccessPolicy::BiometryCurrentSet => kSecAccessControlBiometryCurrentSet,
            AccessPolicy::Unrestricted => 0,
        };
        (kSecAccessControlPrivateKeyUsage | gate) as usize
    }

    fn create_access_control(&self) -> Result<CFType, KeyError> {
        let flags = Self::access_control_flags(self.config.access_policy);

        // SAFETY: SecAccessControlCreateWithFlags is called with the default allocator, a static
        // protection-class constant and a valid out-pointer for the error. A null return is checked
        // before the owned SecAccessControlRef is wrapped under the create rule.
        unsafe {
            let mut error: CFErrorRef = null_mut();
            let access = SecAccessControlCreateWithFlags(
                kCFAllocatorDefault,
                kSecAttrAccessibleWhenUnlockedThisDeviceOnly as CFTypeRef,
                flags as _,
                &mut error,
            );
            if access.is_null() {
                let message = if error.is_null() {
                    "unknown error".to_string()
                } else {
                    CFError::wrap_under_create_rule(error).description().to_string()
                };
                return Err(KeyError::AccessControlCreationFailed(message));
            }
            Ok(CFType::wrap_under_create_rule(access as CFTypeRef))
        }
    }

    fn tag_query(tag: &str) -> Vec<(CFString, CFType)> {
        vec![
            (
                Self::static_key(unsafe { kSecClass }),
                Self::static_key(unsafe { kSecClassKey }).as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecAttrApplicationTag }),
                CFData::from_buffer(tag.as_bytes()).as_CFType(),
            ),
        ]
    }

    fn algorithm_ref(algorithm: SignatureAlgorithm) -> SecKeyAlgorithm {
        // SAFETY: algorithm identifiers are static CFString constants exported by Security.framework.
        unsafe {
            match algorithm {
                SignatureAlgorithm::EcdsaSha256 => kSecKeyAlgorithmECDSASignatureMessageX962SHA256,
                SignatureAlgorithm::EcdsaSha384 => kSecKeyAlgorithmECDSASignatureMessageX962SHA384,
                SignatureAlgorithm::RsaPkcs1v15Sha256 => {
                    kSecKeyAlgorithmRSASignatureMessagePKCS1v15SHA256
                }
            }
        }
    }

    /// Enumerates the tags of every key visible to the application.
    fn list_tags() -> Result<Vec<String>, i32> {
        let pairs = [
            (
                Self::static_key(unsafe { kSecClass }),
                Self::static_key(unsafe { kSecClassKey }).as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecReturnAttributes }),
                CFBoolean::true_value().as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecMatchLimit }),
                Self::static_key(unsafe { kSecMatchLimitAll }).as_CFType(),
            ),
        ];
        let query = CFDictionary::from_CFType_pairs(&pairs);

        // SAFETY: SecItemCopyMatching receives a valid query dictionary and out-pointer. On success the
        // result is an owned CFArray of attribute dictionaries, wrapped under the create rule.
        let items = unsafe {
            let mut result: CFTypeRef = std::ptr::null();
            let status = SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result);
            if status == ERR_SEC_ITEM_NOT_FOUND {
                return Ok(Vec::new());
            }
            if status != ERR_SEC_SUCCESS || result.is_null() {
                return Err(status);
            }
            core_foundation::array::CFArray::<CFDictionary>::wrap_under_create_rule(
                result as core_foundation_sys::array::CFArrayRef,
            )
        };

        let tag_key = Self::static_key(unsafe { kSecAttrApplicationTag });
        let tags = items
            .iter()
            .filter_map(|item| {
                let value = item.find(tag_key.as_concrete_TypeRef() as *const _)?;
                // SAFETY: kSecAttrApplicationTag values are CFData; the dictionary keeps them alive
                // and wrap_under_get_rule retains for the duration of the copy below.
                let data = unsafe { CFData::wrap_under_get_rule(*value as _) };
                String::from_utf8(data.bytes().to_vec()).ok()
            })
            .collect();
        Ok(tags)
    }
}

impl KeyCustody for SecureEnclaveCustody {
    type Handle = SecureEnclaveKey;

    fn create_key(&self, tag: &str) -> Result<SecureEnclaveKey, KeyError> {
        let access = self.create_access_control()?;

        let private_attrs = CFDictionary::from_CFType_pairs(&[
            (
                Self::static_key(unsafe { kSecAttrIsPermanent }),
                CFBoolean::true_value().as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecAttrApplicationTag }),
                CFData::from_buffer(tag.as_bytes()).as_CFType(),
            ),
            (Self::static_key(unsafe { kSecAttrAccessControl }), access),
        ]);

        let attributes = CFDictionary::from_CFType_pairs(&[
            (
                Self::static_key(unsafe { kSecAttrKeyType }),
                Self::static_key(unsafe { kSecAttrKeyTypeECSECPrimeRandom }).as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecAttrKeySizeInBits }),
                CFNumber::from(256i32).as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecAttrTokenID }),
                Self::static_key(unsafe { kSecAttrTokenIDSecureEnclave }).as_CFType(),
            ),
            (
                Self::static_key(unsafe { kSecPrivateKeyAttrs }),
                private_attrs.as_CFType(),
            ),
        ]);

        // SAFETY: SecKeyCreateRandomKey is called with a valid attributes dictionary and a valid
        // out-pointer for the error. The returned SecKeyRef is owned; null is checked first.
        let key = unsafe {
            let mut error: CFErrorRef = null_mut();
            let key_ref = SecKeyCreateRandomKey(attributes.as_concrete_TypeRef(), &mut error);
            if key_ref.is_null() {
                if error.is_null() {
                    return Err(KeyError::KeyGenerationFailed {
                        status: 0,
                        message: "unknown error".into(),
                    });
                }
                let cf_error = CFError::wrap_under_create_rule(error);
                return Err(KeyError::KeyGenerationFailed {
                    status: cf_error.code() as i32,
                    message: cf_error.description().to_string(),
                });
            }
            SecKey::wrap_under_create_rule(key_ref)
        };

        tracing::info!(tag, "Generated Secure Enclave key");
        Ok(SecureEnclaveKey {
            tag: tag.to_string(),
            key,
        })
    }

    fn retrieve_key(&self, tag: &str) -> Result<SecureEnclaveKey, KeyError> {
        let mut pairs = Self::tag_query(tag);
        pairs.push((
            Self::static_key(unsafe { kSecReturnRef }),
            CFBoolean::true_value().as_CFType(),
        ));
        let query = CFDictionary::from_CFType_pairs(&pairs);

        // SAFETY: SecItemCopyMatching receives a valid query dictionary and out-pointer. The status
        // and null result are checked before the owned reference is wrapped as a SecKey.
        unsafe {
            let mut result: CFTypeRef = std::ptr::null();
            let status = SecItemCopyMatching(query.as_concrete_TypeRef(), &mut result);
            match status {
                ERR_SEC_SUCCESS if !result.is_null() => Ok(SecureEnclaveKey {
                    tag: tag.to_string(),
                    key: SecKey::wrap_under_create_rule(result as _),
                }),
                ERR_SEC_USER_CANCELED | ERR_SEC_AUTH_FAILED => Err(KeyError::AuthenticationFailed),
                ERR_SEC_ITEM_NOT_FOUND => Err(KeyError::KeyNotFound(tag.to_string())),
                other => {
                    tracing::warn!(tag, status = other, "Keychain lookup failed");
                    Err(KeyError::LookupFailed {
                        status: other,
                        message: format!("SecItemCopyMatching returned {}", other),
                    })
                }
            }
        }
    }

    fn supports_algorithm(&self, handle: &SecureEnclaveKey, algorithm: SignatureAlgorithm) -> bool {
        // SAFETY: the key reference is owned by the handle and the algorithm is a static constant.
        unsafe {
            SecKeyIsAlgorithmSupported(
                handle.key.as_concrete_TypeRef(),
                kSecKeyOperationTypeSign,
                Self::algorithm_ref(algorithm),
            ) != 0
        }
    }

    fn create_signature(
        &self,
        handle: &SecureEnclaveKey,
        algorithm: SignatureAlgorithm,
        data: &[u8],
    ) -> Result<Vec<u8>, SignError> {
        let message = CFData::from_buffer(data);

        // SAFETY: SecKeyCreateSignature is called with the handle's live key, a static algorithm
        // constant, a valid CFData and an error out-pointer. The owned result is checked for null.
        unsafe {
            let mut error: CFErrorRef = null_mut();
            let signature = SecKeyCreateSignature(
                handle.key.as_concrete_TypeRef(),
                Self::algorithm_ref(algorithm),
                message.as_concrete_TypeRef(),
                &mut error,
            );
            if signature.is_null() {
                if error.is_null() {
                    return Err(SignError::SigningFailed {
                        status: 0,
                        message: "unknown error".into(),
                    });
                }
                let cf_error = CFError::wrap_under_create_rule(error);
                let status = cf_error.code() as i32;
                if status == ERR_SEC_USER_CANCELED || status == ERR_SEC_AUTH_FAILED {
                    return Err(SignError::AuthenticationFailed);
                }
                return Err(SignError::SigningFailed {
                    status,
                    message: cf_error.description().to_string(),
                });
            }
            Ok(CFData::wrap_under_create_rule(signature).bytes().to_vec())
        }
    }

    fn public_key_bytes(&self, handle: &SecureEnclaveKey) -> Option<Vec<u8>> {
        // SAFETY: SecKeyCopyPublicKey and SecKeyCopyExternalRepresentation follow the create rule;
        // both results are null-checked and wrapped so they are released on drop.
        unsafe {
            let public_ref = SecKeyCopyPublicKey(handle.key.as_concrete_TypeRef());
            if public_ref.is_null() {
                return None;
            }
            let public_key = SecKey::wrap_under_create_rule(public_ref);

            let mut error: CFErrorRef = null_mut();
            let data_ref = SecKeyCopyExternalRepresentation(public_key.as_concrete_TypeRef(), &mut error);
            if data_ref.is_null() {
                if !error.is_null() {
                    drop(CFError::wrap_under_create_rule(error));
                }
                return None;
            }
            Some(CFData::wrap_under_create_rule(data_ref).bytes().to_vec())
        }
    }

    fn delete_key(&self, tag: &str) -> bool {
        let query = CFDictionary::from_CFType_pairs(&Self::tag_query(tag));

        // SAFETY: SecItemDelete only reads the query dictionary, which outlives the call.
        let status = unsafe { SecItemDelete(query.as_concrete_TypeRef()) };
        match status {
            ERR_SEC_SUCCESS | ERR_SEC_ITEM_NOT_FOUND => true,
            other => {
                tracing::warn!(tag, status = other, "Keychain deletion failed");
                false
            }
        }
    }

    fn delete_keys_by_prefix(&self, prefix: &str) -> bool {
        let tags = match Self::list_tags() {
            Ok(tags) => tags,
            Err(status) => {
                tracing::warn!(prefix, status, "Keychain enumeration failed");
                return false;
            }
        };

        tags.iter()
            .filter(|tag| tag.starts_with(prefix))
            .fold(true, |ok, tag| self.delete_key(tag) && ok)
    }
}
