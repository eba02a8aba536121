//! Main vault orchestration

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::VaultConfig;
use crate::crypto::{decrypt, encrypt, KeyContext, SecretString};
use crate::error::{FootprintError, Result};
use crate::export::{sha256_hex, ExportPackage, ExportPackager};
use crate::params::{Capture, Page};
use crate::provenance::{GitCommit, GitProvenance, ProvenanceSource};
use crate::resource::ResourceUri;
use crate::storage::{
    Footprint, FootprintQuery, FootprintSummary, GitStamp, NewFootprint, RecordStore, StoreStats,
    TagSet,
};
use crate::verify::{verify_footprint, VerificationResult};

/// Result of a successful capture
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureReceipt {
    pub id: Uuid,
    pub content_hash: String,
    pub git: Option<GitCommit>,
}

/// One page of listing or search results
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintPage {
    pub footprints: Vec<FootprintSummary>,
    /// Matching records ignoring pagination
    pub total: usize,
}

/// Footprint with its content decrypted - content is zeroed when dropped
#[derive(Debug, Clone)]
pub struct DecryptedFootprint {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub provider: String,
    pub content_hash: String,
    pub message_count: u32,
    pub git: Option<GitStamp>,
    pub tags: TagSet,
    content: SecretString,
}

impl DecryptedFootprint {
    fn new(footprint: Footprint, content: SecretString) -> Self {
        Self {
            id: footprint.id,
            timestamp: footprint.timestamp,
            conversation_id: footprint.conversation_id,
            provider: footprint.provider,
            content_hash: footprint.content_hash,
            message_count: footprint.message_count,
            git: footprint.git,
            tags: footprint.tags,
            content,
        }
    }

    /// Get the decrypted content (use carefully)
    pub fn content(&self) -> &str {
        self.content.expose()
    }
}

/// Encrypted evidence vault
///
/// Owns the record store and the per-process key context. Everything that
/// touches plaintext goes through here.
pub struct FootprintVault {
    store: Arc<RecordStore>,
    keys: KeyContext,
    provenance: Box<dyn ProvenanceSource>,
    packager: ExportPackager,
    repo_dir: Option<PathBuf>,
}

impl FootprintVault {
    /// Open the vault described by `config`
    ///
    /// The key is not derived here; that happens on first use.
    pub fn open(config: VaultConfig) -> Result<Self> {
        let store = Arc::new(RecordStore::open(&config.db_path)?);
        if config.passphrase.is_none() {
            info!("Vault opened without a passphrase; capture and retrieval are disabled");
        }

        let mut keys = KeyContext::new(store.clone(), config.passphrase, config.kdf);
        if config.allow_weak_kdf {
            keys = keys.allow_weak_params();
        }

        Ok(Self {
            keys,
            store,
            provenance: Box::new(GitProvenance::new()),
            packager: ExportPackager::new(config.max_export_bytes),
            repo_dir: config.repo_dir,
        })
    }

    /// Replace the provenance source
    pub fn with_provenance(mut self, provenance: impl ProvenanceSource + 'static) -> Self {
        self.provenance = Box::new(provenance);
        self
    }

    /// Underlying record store
    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Key context for this vault
    pub fn keys(&self) -> &KeyContext {
        &self.keys
    }

    async fn current_commit(&self) -> Option<GitCommit> {
        let dir = match &self.repo_dir {
            Some(dir) => dir.clone(),
            None => std::env::current_dir().ok()?,
        };
        self.provenance.current_commit(&dir).await
    }

    /// Encrypt and store a conversation
    pub async fn capture(&self, capture: Capture) -> Result<CaptureReceipt> {
        let key = self.keys.key().await?;

        let plaintext = capture.content.expose().as_bytes();
        let content_hash = sha256_hex(plaintext);
        let sealed = encrypt(plaintext, key.as_bytes())?;

        let git = self.current_commit().await;
        if git.is_none() {
            debug!("Capturing without git provenance");
        }

        let id = self.store.create(&NewFootprint {
            conversation_id: capture.conversation_id,
            provider: capture.provider,
            encrypted_content: sealed.ciphertext,
            nonce: sealed.nonce,
            content_hash: content_hash.clone(),
            message_count: capture.message_count,
            git: git.as_ref().map(GitStamp::from),
            tags: capture.tags,
        })?;

        info!("Captured footprint {}", id);
        Ok(CaptureReceipt {
            id,
            content_hash,
            git,
        })
    }

    fn require(&self, id: &Uuid) -> Result<Footprint> {
        self.store
            .find_by_id(id)?
            .ok_or_else(|| FootprintError::NotFound(format!("Footprint {}", id)))
    }

    /// Fetch and decrypt one footprint
    pub async fn get(&self, id: &Uuid) -> Result<DecryptedFootprint> {
        let footprint = self.require(id)?;
        let key = self.keys.key().await?;

        let plaintext = decrypt(&footprint.encrypted_content, &footprint.nonce, key.as_bytes())?;
        let content = String::from_utf8(plaintext)
            .map_err(|_| FootprintError::storage("get", format!("Footprint {} content is not UTF-8", id)))?;

        Ok(DecryptedFootprint::new(footprint, SecretString::new(content)))
    }

    /// Resolve a `footprint://<id>` URI
    pub async fn read_resource(&self, uri: &str) -> Result<DecryptedFootprint> {
        let uri = ResourceUri::parse(uri)?;
        self.get(&uri.id()).await
    }

    /// Newest-first listing with the total record count
    pub fn list(&self, page: Page) -> Result<FootprintPage> {
        self.search(&FootprintQuery {
            limit: page.limit,
            offset: page.offset,
            ..FootprintQuery::default()
        })
    }

    /// Filtered listing with the total match count
    pub fn search(&self, query: &FootprintQuery) -> Result<FootprintPage> {
        let (footprints, total) = self.store.search_page(query)?;
        Ok(FootprintPage {
            footprints: footprints.iter().map(FootprintSummary::from).collect(),
            total,
        })
    }

    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        self.store.delete(id)
    }

    pub fn delete_many(&self, ids: &[Uuid]) -> Result<usize> {
        self.store.delete_many(ids)
    }

    pub fn update_tags(&self, id: &Uuid, tags: Option<&TagSet>) -> Result<bool> {
        self.store.update_tags(id, tags)
    }

    pub fn add_tags(&self, id: &Uuid, tags: &TagSet) -> Result<()> {
        self.store.add_tags(id, tags)
    }

    pub fn rename_tag(&self, old_tag: &str, new_tag: &str) -> Result<usize> {
        self.store.rename_tag(old_tag, new_tag)
    }

    pub fn remove_tag(&self, tag: &str) -> Result<usize> {
        self.store.remove_tag(tag)
    }

    pub fn tag_counts(&self) -> Result<BTreeMap<String, usize>> {
        self.store.tag_counts()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Package footprints for export; `None` exports everything
    ///
    /// Payloads stay encrypted, so no passphrase is needed.
    pub fn export(&self, ids: Option<&[Uuid]>, include_git: bool) -> Result<ExportPackage> {
        self.packager.export_from(&self.store, ids, include_git)
    }

    /// Check a footprint's content hash, decryption and provenance
    pub async fn verify(&self, id: &Uuid) -> Result<VerificationResult> {
        let footprint = self.require(id)?;
        let key = self.keys.key().await?;
        Ok(verify_footprint(&footprint, &key))
    }

    /// Release the master key
    pub fn shutdown(&mut self) {
        self.keys.shutdown();
        info!("Vault shut down");
    }
}
