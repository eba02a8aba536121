//! Per-process master key context
//!
//! The master key is derived from the configured passphrase at most once.
//! Callers that arrive while the first derivation is still running wait on
//! the same in-flight initialization instead of starting their own.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use super::encryption::{decrypt, encrypt};
use super::key_derivation::{derive_key, verify_key, KeyDerivationParams};
use super::secure_memory::{MasterKey, SecretString};
use crate::error::{FootprintError, Result};
use crate::storage::{MasterSalt, RecordStore};

/// Known plaintext sealed under the master key when the salt is created
const VERIFIER_PLAINTEXT: &[u8] = b"footprint-vault-key-check-v1";

/// Owns the derived master key for the lifetime of a vault
pub struct KeyContext {
    store: Arc<RecordStore>,
    passphrase: Option<SecretString>,
    params: KeyDerivationParams,
    allow_weak: bool,
    key: OnceCell<Arc<MasterKey>>,
    derivations: AtomicUsize,
}

impl KeyContext {
    pub fn new(
        store: Arc<RecordStore>,
        passphrase: Option<SecretString>,
        params: KeyDerivationParams,
    ) -> Self {
        Self {
            store,
            passphrase,
            params,
            allow_weak: false,
            key: OnceCell::new(),
            derivations: AtomicUsize::new(0),
        }
    }

    /// Accept cost parameters below [`KeyDerivationParams::MINIMUM`] when
    /// creating a new master salt
    pub fn allow_weak_params(mut self) -> Self {
        self.allow_weak = true;
        self
    }

    /// Whether a passphrase is configured at all
    pub fn has_passphrase(&self) -> bool {
        self.passphrase.is_some()
    }

    /// Whether the key has already been derived
    pub fn is_derived(&self) -> bool {
        self.key.initialized()
    }

    /// Number of derivations started so far
    pub fn derivation_count(&self) -> usize {
        self.derivations.load(Ordering::SeqCst)
    }

    /// Get the master key, deriving it on first use
    ///
    /// The first call reads (or creates) the master salt and runs Argon2id
    /// on the blocking pool. A failed derivation leaves the context empty
    /// so a later call may retry.
    pub async fn key(&self) -> Result<Arc<MasterKey>> {
        let passphrase = self
            .passphrase
            .as_ref()
            .ok_or(FootprintError::MissingPassphrase)?;

        let key = self
            .key
            .get_or_try_init(|| async {
                self.derivations.fetch_add(1, Ordering::SeqCst);
                debug!("Deriving master key");

                let store = self.store.clone();
                let passphrase = passphrase.clone();
                let params = self.params;
                let allow_weak = self.allow_weak;

                let key = tokio::task::spawn_blocking(move || {
                    unlock(&store, passphrase.expose(), params, allow_weak)
                })
                .await
                .map_err(|e| FootprintError::KeyDerivation(e.to_string()))??;

                info!("Master key ready");
                Ok::<_, FootprintError>(Arc::new(key))
            })
            .await?;

        Ok(key.clone())
    }

    /// Check `candidate` against the unlocked master key
    ///
    /// Re-derives with the stored salt and cost, then compares in constant
    /// time. Unlocks with the configured passphrase first if needed.
    pub async fn verify_passphrase(&self, candidate: &str) -> Result<bool> {
        let key = self.key().await?;
        let store = self.store.clone();
        let candidate = SecretString::new(candidate);
        let fallback = self.params;

        tokio::task::spawn_blocking(move || {
            let master = store.load_master_salt()?.ok_or_else(|| {
                FootprintError::KeyDerivation("master salt missing after unlock".to_string())
            })?;
            verify_key(
                candidate.expose(),
                &master.salt,
                &key,
                Some(master.kdf.unwrap_or(fallback)),
            )
        })
        .await
        .map_err(|e| FootprintError::KeyDerivation(e.to_string()))?
    }

    /// Drop the cached key
    ///
    /// The key bytes are zeroed as soon as the last outstanding handle is
    /// released.
    pub fn shutdown(&mut self) {
        if let Some(key) = self.key.take() {
            match Arc::try_unwrap(key) {
                Ok(key) => drop(key),
                Err(shared) => {
                    warn!(
                        "Master key still referenced by {} handle(s); it is zeroed when they drop",
                        Arc::strong_count(&shared) - 1
                    );
                }
            }
            info!("Master key released");
        }
    }
}

/// Derive the master key against the stored salt, creating salt and
/// verifier on first use
///
/// An existing salt is always re-derived with the cost recorded next to it;
/// `params` only applies to stores that predate the recorded cost and to
/// new salts.
fn unlock(
    store: &RecordStore,
    passphrase: &str,
    params: KeyDerivationParams,
    allow_weak: bool,
) -> Result<MasterKey> {
    match store.load_master_salt()? {
        Some(master) => {
            let params = master.kdf.unwrap_or(params);
            let (key, _) = derive_key(passphrase, Some(&master.salt), Some(params))?;
            let check = decrypt(&master.verifier, &master.verifier_nonce, key.as_bytes())?;
            if check != VERIFIER_PLAINTEXT {
                return Err(FootprintError::DecryptionFailed);
            }
            Ok(key)
        }
        None => {
            if !allow_weak && !params.meets_minimum() {
                return Err(FootprintError::KeyDerivation(format!(
                    "cost {}KiB/{}/{} is below the minimum {}KiB/{}/{}",
                    params.memory_cost,
                    params.time_cost,
                    params.parallelism,
                    KeyDerivationParams::MINIMUM.memory_cost,
                    KeyDerivationParams::MINIMUM.time_cost,
                    KeyDerivationParams::MINIMUM.parallelism
                )));
            }
            let (key, salt) = derive_key(passphrase, None, Some(params))?;
            let sealed = encrypt(VERIFIER_PLAINTEXT, key.as_bytes())?;
            store.init_master_salt(&MasterSalt {
                salt: salt.to_vec(),
                verifier: sealed.ciphertext,
                verifier_nonce: sealed.nonce.to_vec(),
                kdf: Some(params),
                created_at: Utc::now(),
            })?;
            info!("Created master salt for new footprint store");
            Ok(key)
        }
    }
}
