//! # footprint-core
//!
//! Encrypted evidence vault for AI conversation footprints including:
//! - XChaCha20-Poly1305 encryption under an Argon2id-derived master key
//! - SQLite record store with exact-token tag handling
//! - Best-effort git provenance stamping
//! - Checksummed ZIP export and integrity verification

pub mod config;
pub mod crypto;
pub mod error;
pub mod export;
pub mod params;
pub mod provenance;
pub mod resource;
pub mod storage;
pub mod verify;
mod vault;

pub use config::{VaultConfig, VaultSettings};
pub use crypto::{decrypt, derive_key, encrypt, KeyContext, KeyDerivationParams, MasterKey};
pub use error::{FootprintError, Result};
pub use export::{ExportPackage, ExportPackager};
pub use params::{Capture, CaptureParams, ListParams, Page, SearchParams};
pub use provenance::{GitCommit, GitProvenance, ProvenanceSource};
pub use resource::ResourceUri;
pub use storage::{Footprint, FootprintQuery, FootprintSummary, RecordStore, StoreStats, TagSet};
pub use verify::{verify_footprint, VerificationResult};
pub use vault::{CaptureReceipt, DecryptedFootprint, FootprintPage, FootprintVault};
