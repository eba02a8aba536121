//! Vault configuration
//!
//! The store path and passphrase come from the environment. Non-sensitive
//! tuning (export ceiling, repository directory, KDF cost) can also be kept
//! in a plain JSON settings file next to the database.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::crypto::{KeyDerivationParams, SecretString};
use crate::error::{FootprintError, Result};
use crate::export::DEFAULT_MAX_EXPORT_BYTES;

/// Environment variable holding the database path
pub const DB_PATH_ENV: &str = "FOOTPRINT_DB_PATH";

/// Environment variable holding the passphrase
pub const PASSWORD_ENV: &str = "FOOTPRINT_PASSWORD";

/// Default database file name inside the data directory
pub const DEFAULT_DB_FILE: &str = "footprints.db";

/// Settings file name, looked up next to the database
pub const SETTINGS_FILE: &str = "settings.json";

/// Non-sensitive settings persisted as JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VaultSettings {
    /// Settings file version
    pub version: u32,
    /// Largest uncompressed export payload, in bytes
    pub max_export_bytes: u64,
    /// Directory to read git provenance from (defaults to the working directory)
    pub repo_dir: Option<PathBuf>,
    /// Argon2id cost parameters
    pub kdf: KeyDerivationParams,
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            version: 1,
            max_export_bytes: DEFAULT_MAX_EXPORT_BYTES,
            repo_dir: None,
            kdf: KeyDerivationParams::default(),
        }
    }
}

impl VaultSettings {
    /// Load settings from `path`, falling back to defaults when absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No settings file found, using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let settings: Self = serde_json::from_str(&contents)?;
        debug!("Loaded settings from {:?}", path);
        Ok(settings)
    }

    /// Save settings to `path`
    pub async fn save(&self, path: &Path) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;

        // Write atomically using temp file
        let temp_path = path.with_extension("tmp");
        tokio::fs::write(&temp_path, &contents).await?;
        tokio::fs::rename(&temp_path, path).await?;

        debug!("Saved settings to {:?}", path);
        Ok(())
    }
}

/// Everything needed to open a [`FootprintVault`](crate::FootprintVault)
#[derive(Debug, Clone)]
pub struct VaultConfig {
    pub db_path: PathBuf,
    /// Without a passphrase the vault opens, but nothing can be encrypted
    /// or decrypted
    pub passphrase: Option<SecretString>,
    pub max_export_bytes: u64,
    pub repo_dir: Option<PathBuf>,
    pub kdf: KeyDerivationParams,
    /// Accept a KDF cost below [`KeyDerivationParams::MINIMUM`] for a new
    /// store. Never read from the settings file.
    pub allow_weak_kdf: bool,
}

impl VaultConfig {
    /// Configuration with default settings for the store at `db_path`
    pub fn new(db_path: impl Into<PathBuf>) -> Self {
        Self {
            db_path: db_path.into(),
            passphrase: None,
            max_export_bytes: DEFAULT_MAX_EXPORT_BYTES,
            repo_dir: None,
            kdf: KeyDerivationParams::default(),
            allow_weak_kdf: false,
        }
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(SecretString::new(passphrase));
        self
    }

    pub fn with_max_export_bytes(mut self, max_export_bytes: u64) -> Self {
        self.max_export_bytes = max_export_bytes;
        self
    }

    pub fn with_repo_dir(mut self, repo_dir: impl Into<PathBuf>) -> Self {
        self.repo_dir = Some(repo_dir.into());
        self
    }

    pub fn with_kdf_params(mut self, kdf: KeyDerivationParams) -> Self {
        self.kdf = kdf;
        self
    }

    /// Use `kdf` even if it is cheaper than the minimum (for tests and tooling)
    pub fn with_weak_kdf_params(mut self, kdf: KeyDerivationParams) -> Self {
        self.kdf = kdf;
        self.allow_weak_kdf = true;
        self
    }

    /// Apply persisted settings on top of this configuration
    pub fn with_settings(mut self, settings: VaultSettings) -> Self {
        self.max_export_bytes = settings.max_export_bytes;
        self.repo_dir = settings.repo_dir.or(self.repo_dir);
        self.kdf = settings.kdf;
        self
    }

    /// Build configuration from the process environment
    ///
    /// Reads `FOOTPRINT_DB_PATH` and `FOOTPRINT_PASSWORD`, then any
    /// `settings.json` found next to the database.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let db_path = match lookup(DB_PATH_ENV).filter(|p| !p.trim().is_empty()) {
            Some(path) => PathBuf::from(path),
            None => Self::default_data_dir()?.join(DEFAULT_DB_FILE),
        };

        let mut config = Self::new(db_path);
        match lookup(PASSWORD_ENV).filter(|p| !p.is_empty()) {
            Some(passphrase) => config.passphrase = Some(SecretString::new(passphrase)),
            None => warn!("{} is not set; capture and retrieval are disabled", PASSWORD_ENV),
        }

        let settings = VaultSettings::load(&config.settings_path())?;
        Ok(config.with_settings(settings))
    }

    /// Path of the settings file for this store
    pub fn settings_path(&self) -> PathBuf {
        self.db_path
            .parent()
            .unwrap_or_else(|| Path::new("."))
            .join(SETTINGS_FILE)
    }

    /// Get the default data directory
    fn default_data_dir() -> Result<PathBuf> {
        ProjectDirs::from("dev", "footprint", "footprint")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .ok_or_else(|| {
                FootprintError::Validation(format!(
                    "Could not determine data directory - set {}",
                    DB_PATH_ENV
                ))
            })
    }
}
