//! Best-effort public-key recovery from attestation envelopes.
//!
//! The envelope is opaque to this crate. [`UncompressedPointScanner`] is a
//! pattern match, not a parser: it may miss the key, or pick up an unrelated
//! point (for example one inside an embedded certificate). The verifier's parse
//! of the same envelope is the authoritative source of the public key.

use p256::PublicKey;

/// SEC1 tag for an uncompressed elliptic-curve point.
const UNCOMPRESSED_POINT_TAG: u8 = 0x04;

/// Length of `0x04 || X || Y` for P-256.
const UNCOMPRESSED_POINT_LEN: usize = 65;

/// Recovers a public key from an attestation envelope, if it can.
pub trait PublicKeyExtractor: Send + Sync {
    /// Returns the key as an uncompressed SEC1 point, or `None`.
    fn extract(&self, attestation: &[u8]) -> Option<Vec<u8>>;
}

/// Scans for the first `0x04` byte followed by a non-trivial 64-byte body that
/// decodes to a valid P-256 point.
#[derive(Debug, Clone, Copy, Default)]
pub struct UncompressedPointScanner;

impl UncompressedPointScanner {
    fn plausible(candidate: &[u8]) -> bool {
        let body = &candidate[1..];
        let first = body[0];
        if body.iter().all(|&b| b == first) {
            return false;
        }
        PublicKey::from_sec1_bytes(candidate).is_ok()
    }
}

impl PublicKeyExtractor for UncompressedPointScanner {
    fn extract(&self, attestation: &[u8]) -> Option<Vec<u8>> {
        attestation
            .windows(UNCOMPRESSED_POINT_LEN)
            .find(|window| window[0] == UNCOMPRESSED_POINT_TAG && Self::plausible(window))
            .map(<[u8]>::to_vec)
    }
}
