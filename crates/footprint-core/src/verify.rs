//! Integrity verification of stored footprints

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::crypto::{decrypt, MasterKey};
use crate::export::sha256_hex;
use crate::storage::Footprint;

/// Outcome of verifying one footprint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationResult {
    pub content_integrity_passed: bool,
    /// Hash of the decrypted content; empty when decryption failed
    pub hash_computed: String,
    pub provenance_passed: bool,
    pub decryption_passed: bool,
    pub overall_verified: bool,
}

/// Check a footprint against its stored hash and provenance stamp
///
/// The payload is decrypted once and that plaintext feeds both the
/// decryption and the content-hash checks. Failures are reported in the
/// result, never returned as errors.
pub fn verify_footprint(footprint: &Footprint, key: &MasterKey) -> VerificationResult {
    let provenance_passed = footprint.git.is_some();

    let (decryption_passed, hash_computed) =
        match decrypt(&footprint.encrypted_content, &footprint.nonce, key.as_bytes()) {
            Ok(plaintext) => (true, sha256_hex(&plaintext)),
            Err(e) => {
                debug!("Verification could not decrypt {}: {}", footprint.id, e);
                (false, String::new())
            }
        };

    let content_integrity_passed = decryption_passed && hash_computed == footprint.content_hash;
    if decryption_passed && !content_integrity_passed {
        warn!("Footprint {} content hash mismatch", footprint.id);
    }

    VerificationResult {
        content_integrity_passed,
        hash_computed,
        provenance_passed,
        decryption_passed,
        overall_verified: content_integrity_passed && provenance_passed && decryption_passed,
    }
}
