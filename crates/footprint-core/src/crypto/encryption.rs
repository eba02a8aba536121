//! XChaCha20-Poly1305 authenticated encryption
//!
//! Every call to [`encrypt`] draws a fresh random 24-byte nonce. The
//! ciphertext carries the 16-byte Poly1305 tag appended, exactly as the
//! `chacha20poly1305` crate emits it, and is stored as an opaque blob.

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use tracing::debug;

use crate::error::{FootprintError, Result};

/// Key length in bytes (256 bits)
pub const KEY_LEN: usize = 32;

/// Nonce length in bytes for XChaCha20
pub const NONCE_LEN: usize = 24;

/// Ciphertext paired with the nonce it was sealed under
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedData {
    /// Ciphertext with the authentication tag appended
    pub ciphertext: Vec<u8>,
    /// Random nonce (24 bytes), never reused under the same key
    pub nonce: [u8; NONCE_LEN],
}

fn cipher_for(key: &[u8]) -> Result<XChaCha20Poly1305> {
    if key.len() != KEY_LEN {
        return Err(FootprintError::InvalidKeyMaterial(format!(
            "key must be {} bytes, got {}",
            KEY_LEN,
            key.len()
        )));
    }

    XChaCha20Poly1305::new_from_slice(key)
        .map_err(|e| FootprintError::InvalidKeyMaterial(e.to_string()))
}

/// Generate a random nonce
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::rngs::OsRng.fill_bytes(&mut nonce);
    nonce
}

/// Encrypt plaintext using XChaCha20-Poly1305
///
/// # Arguments
/// * `plaintext` - The data to encrypt
/// * `key` - The 256-bit encryption key
///
/// # Returns
/// The ciphertext and the freshly generated nonce
pub fn encrypt(plaintext: &[u8], key: &[u8]) -> Result<EncryptedData> {
    let cipher = cipher_for(key)?;
    let nonce = generate_nonce();

    let ciphertext = cipher
        .encrypt(XNonce::from_slice(&nonce), plaintext)
        .map_err(|e| {
            debug!("AEAD encryption error: {}", e);
            FootprintError::EncryptionFailed
        })?;

    Ok(EncryptedData { ciphertext, nonce })
}

/// Decrypt ciphertext using XChaCha20-Poly1305
///
/// Any authentication failure (wrong key, tampered ciphertext or nonce)
/// surfaces as [`FootprintError::DecryptionFailed`]; the cause is only
/// logged.
pub fn decrypt(ciphertext: &[u8], nonce: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;

    if nonce.len() != NONCE_LEN {
        return Err(FootprintError::InvalidKeyMaterial(format!(
            "nonce must be {} bytes, got {}",
            NONCE_LEN,
            nonce.len()
        )));
    }

    cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|e| {
            debug!(
                ciphertext_len = ciphertext.len(),
                "AEAD authentication failed: {}", e
            );
            FootprintError::DecryptionFailed
        })
}
