//! Cryptographic primitives for the footprint vault
//!
//! This module provides:
//! - XChaCha20-Poly1305 authenticated encryption
//! - Argon2id key derivation from passwords
//! - A per-process key context that derives the master key once
//! - Secure memory handling with zeroize

mod encryption;
mod key_cache;
mod key_derivation;
mod secure_memory;

pub use encryption::{decrypt, encrypt, generate_nonce, EncryptedData, KEY_LEN, NONCE_LEN};
pub use key_cache::KeyContext;
pub use key_derivation::{
    derive_key, generate_salt, verify_key, KeyDerivationParams, Salt, SALT_LEN,
};
pub use secure_memory::{MasterKey, SecretString};
