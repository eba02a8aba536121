//! Error types for footprint-core

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for footprint operations
pub type Result<T> = std::result::Result<T, FootprintError>;

/// Footprint error types
#[derive(Error, Debug)]
pub enum FootprintError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to open footprint store at {path:?}: {reason} - check the path or move the damaged file aside")]
    StorageInitFailed { path: PathBuf, reason: String },

    #[error("Storage error during {operation}: {reason}")]
    Storage { operation: String, reason: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Footprints not found: {}", .0.join(", "))]
    MissingRecords(Vec<String>),

    #[error("Export too large: estimated {estimated} bytes exceeds the {limit} byte limit - export in smaller batches")]
    ExportTooLarge { estimated: u64, limit: u64 },

    #[error("Invalid key material: {0}")]
    InvalidKeyMaterial(String),

    #[error("Decryption failed - check password")]
    DecryptionFailed,

    #[error("Encryption failed")]
    EncryptionFailed,

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("No passphrase configured - set FOOTPRINT_PASSWORD to enable capture and retrieval")]
    MissingPassphrase,

    #[error("Invalid resource URI: {0}")]
    InvalidResource(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl FootprintError {
    /// Build a storage error tagged with the operation that failed
    pub fn storage(operation: impl Into<String>, reason: impl ToString) -> Self {
        Self::Storage {
            operation: operation.into(),
            reason: reason.to_string(),
        }
    }

    /// Whether this error stems from caller input rather than system state
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::Validation(_) | Self::InvalidResource(_)
        )
    }

    /// Whether this error reports a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::MissingRecords(_))
    }
}

impl From<rusqlite::Error> for FootprintError {
    fn from(err: rusqlite::Error) -> Self {
        Self::storage("sqlite", err)
    }
}

impl From<zip::result::ZipError> for FootprintError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Export(err.to_string())
    }
}
