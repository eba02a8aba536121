//! Password-based key derivation using Argon2id

use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use zeroize::Zeroize;

use super::encryption::KEY_LEN;
use super::MasterKey;
use crate::error::{FootprintError, Result};

/// Salt length in bytes
pub const SALT_LEN: usize = 16;

/// Raw master salt
pub type Salt = [u8; SALT_LEN];

/// Parameters for Argon2id key derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyDerivationParams {
    /// Memory cost in KiB (default: 65536 = 64MB)
    pub memory_cost: u32,
    /// Time cost / iterations (default: 3)
    pub time_cost: u32,
    /// Parallelism (default: 4)
    pub parallelism: u32,
}

impl KeyDerivationParams {
    /// Weakest cost accepted for a new master salt
    pub const MINIMUM: Self = Self {
        memory_cost: 65536, // 64 MB
        time_cost: 3,
        parallelism: 4,
    };

    /// Whether every cost parameter is at or above [`Self::MINIMUM`]
    pub fn meets_minimum(&self) -> bool {
        self.memory_cost >= Self::MINIMUM.memory_cost
            && self.time_cost >= Self::MINIMUM.time_cost
            && self.parallelism >= Self::MINIMUM.parallelism
    }
}

impl Default for KeyDerivationParams {
    fn default() -> Self {
        Self::MINIMUM
    }
}

/// Generate a cryptographically secure random salt
pub fn generate_salt() -> Salt {
    let mut salt = [0u8; SALT_LEN];
    rand::rngs::OsRng.fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit master key from a password using Argon2id
///
/// # Arguments
/// * `password` - The user's password
/// * `salt` - Existing salt to re-derive with, or `None` to generate a fresh one
/// * `params` - Optional key derivation parameters
///
/// # Returns
/// The 32-byte master key together with the salt it was derived from.
/// The same password and salt always yield the same key.
pub fn derive_key(
    password: &str,
    salt: Option<&[u8]>,
    params: Option<KeyDerivationParams>,
) -> Result<(MasterKey, Salt)> {
    if password.is_empty() {
        return Err(FootprintError::InvalidInput(
            "Password cannot be empty".to_string(),
        ));
    }

    let salt: Salt = match salt {
        Some(bytes) => bytes.try_into().map_err(|_| {
            FootprintError::InvalidKeyMaterial(format!(
                "salt must be {} bytes, got {}",
                SALT_LEN,
                bytes.len()
            ))
        })?,
        None => generate_salt(),
    };

    let params = params.unwrap_or_default();
    let argon2_params = Params::new(
        params.memory_cost,
        params.time_cost,
        params.parallelism,
        Some(KEY_LEN),
    )
    .map_err(|e| FootprintError::KeyDerivation(e.to_string()))?;

    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, argon2_params);

    let mut key_bytes = [0u8; KEY_LEN];
    argon2
        .hash_password_into(password.as_bytes(), &salt, &mut key_bytes)
        .map_err(|e| FootprintError::KeyDerivation(e.to_string()))?;

    let key = MasterKey::new(key_bytes);
    key_bytes.zeroize();

    Ok((key, salt))
}

/// Re-derive a key and compare it against `expected` in constant time
pub fn verify_key(
    password: &str,
    salt: &[u8],
    expected: &MasterKey,
    params: Option<KeyDerivationParams>,
) -> Result<bool> {
    let (derived, _) = derive_key(password, Some(salt), params)?;
    Ok(derived.as_bytes().ct_eq(expected.as_bytes()).into())
}
