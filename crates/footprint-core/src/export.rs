//! Evidence export archives
//!
//! An export is a ZIP archive laid out as:
//!
//! ```text
//! manifest.json
//! checksum.txt
//! <id>/encrypted-data
//! <id>/metadata.json
//! <id>/git-info.json      (only when provenance is requested and present)
//! ```
//!
//! Payloads stay encrypted. `checksum.txt` lists a SHA-256 for every other
//! file in the archive, one `hash  path` line each.

use std::borrow::Cow;
use std::io::{Cursor, Write};

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info};
use uuid::Uuid;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{FootprintError, Result};
use crate::storage::{format_timestamp, Footprint, GitStamp, RecordStore, TagSet};

/// Archive layout version written to the manifest
pub const FORMAT_VERSION: &str = "1.0";

/// Default ceiling on the uncompressed export payload (100 MiB)
pub const DEFAULT_MAX_EXPORT_BYTES: u64 = 100 * 1024 * 1024;

/// Lower bound on the per-record JSON framing in `metadata.json`, used for
/// the size check made before any record is loaded
const RECORD_OVERHEAD: u64 = 256;

const MANIFEST_FILE: &str = "manifest.json";
const CHECKSUM_FILE: &str = "checksum.txt";

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// A finished export
#[derive(Debug, Clone)]
pub struct ExportPackage {
    pub filename: String,
    pub archive_bytes: Vec<u8>,
    /// SHA-256 of `archive_bytes`, hex encoded
    pub checksum: String,
    pub count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Manifest {
    format_version: &'static str,
    export_date: String,
    record_count: usize,
    includes_git_provenance: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RecordMetadata<'a> {
    id: Uuid,
    timestamp: String,
    conversation_id: &'a str,
    provider: &'a str,
    content_hash: &'a str,
    message_count: u32,
    tags: &'a TagSet,
    nonce: &'a [u8],
    created_at: String,
    updated_at: String,
}

impl<'a> From<&'a Footprint> for RecordMetadata<'a> {
    fn from(fp: &'a Footprint) -> Self {
        Self {
            id: fp.id,
            timestamp: format_timestamp(&fp.timestamp),
            conversation_id: &fp.conversation_id,
            provider: &fp.provider,
            content_hash: &fp.content_hash,
            message_count: fp.message_count,
            tags: &fp.tags,
            nonce: &fp.nonce,
            created_at: format_timestamp(&fp.created_at),
            updated_at: format_timestamp(&fp.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GitInfo<'a> {
    commit_hash: &'a str,
    timestamp: String,
}

impl<'a> From<&'a GitStamp> for GitInfo<'a> {
    fn from(stamp: &'a GitStamp) -> Self {
        Self {
            commit_hash: &stamp.commit_hash,
            timestamp: format_timestamp(&stamp.timestamp),
        }
    }
}

/// Request order with repeats dropped
fn distinct(ids: &[Uuid]) -> Vec<Uuid> {
    ids.iter().copied().collect::<IndexSet<_>>().into_iter().collect()
}

/// Resolve the records to export
///
/// `None` selects every stored record. Explicit ids are exported once each
/// in request order and must all exist; otherwise every missing id is
/// reported together.
pub fn collect_records(store: &RecordStore, ids: Option<&[Uuid]>) -> Result<Vec<Footprint>> {
    match ids {
        None => store.list(None, None),
        Some(ids) => {
            let (found, missing) = store.find_by_ids(&distinct(ids))?;
            if !missing.is_empty() {
                return Err(FootprintError::MissingRecords(
                    missing.iter().map(Uuid::to_string).collect(),
                ));
            }
            Ok(found)
        }
    }
}

/// Builds export archives under a size ceiling
#[derive(Debug, Clone, Copy)]
pub struct ExportPackager {
    max_bytes: u64,
}

impl Default for ExportPackager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_EXPORT_BYTES)
    }
}

impl ExportPackager {
    pub fn new(max_bytes: u64) -> Self {
        Self { max_bytes }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn check_ceiling(&self, estimated: u64) -> Result<()> {
        if estimated > self.max_bytes {
            return Err(FootprintError::ExportTooLarge {
                estimated,
                limit: self.max_bytes,
            });
        }
        Ok(())
    }

    /// Load and package records straight from `store`
    ///
    /// The stored sizes are checked against the ceiling before any record
    /// is read, so an oversized request never materialises its payloads.
    pub fn export_from(
        &self,
        store: &RecordStore,
        ids: Option<&[Uuid]>,
        include_git: bool,
    ) -> Result<ExportPackage> {
        let ids = ids.map(distinct);
        let (count, bytes) = store.payload_size(ids.as_deref())?;
        self.check_ceiling(bytes + count as u64 * RECORD_OVERHEAD)?;
        debug!("Pre-export estimate: {} records, {} bytes", count, bytes);

        let footprints = collect_records(store, ids.as_deref())?;
        self.export(&footprints, include_git)
    }

    /// Package `footprints` into a ZIP archive
    pub fn export(&self, footprints: &[Footprint], include_git: bool) -> Result<ExportPackage> {
        self.export_at(footprints, include_git, Utc::now())
    }

    fn export_at(
        &self,
        footprints: &[Footprint],
        include_git: bool,
        now: DateTime<Utc>,
    ) -> Result<ExportPackage> {
        let mut entries: Vec<(String, Cow<'_, [u8]>)> =
            Vec::with_capacity(footprints.len() * 3 + 1);

        let manifest = Manifest {
            format_version: FORMAT_VERSION,
            export_date: format_timestamp(&now),
            record_count: footprints.len(),
            includes_git_provenance: include_git,
        };
        entries.push((
            MANIFEST_FILE.to_string(),
            Cow::Owned(serde_json::to_vec_pretty(&manifest)?),
        ));

        for fp in footprints {
            entries.push((
                format!("{}/encrypted-data", fp.id),
                Cow::Borrowed(fp.encrypted_content.as_slice()),
            ));
            entries.push((
                format!("{}/metadata.json", fp.id),
                Cow::Owned(serde_json::to_vec_pretty(&RecordMetadata::from(fp))?),
            ));
            if include_git {
                if let Some(git) = &fp.git {
                    entries.push((
                        format!("{}/git-info.json", fp.id),
                        Cow::Owned(serde_json::to_vec_pretty(&GitInfo::from(git))?),
                    ));
                }
            }
        }

        let estimated: u64 = entries.iter().map(|(_, data)| data.len() as u64).sum();
        self.check_ceiling(estimated)?;

        let mut checksums = String::new();
        for (path, data) in &entries {
            checksums.push_str(&format!("{}  {}\n", sha256_hex(data), path));
        }

        let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (path, data) in &entries {
            writer.start_file(path.as_str(), options)?;
            writer.write_all(data)?;
        }
        writer.start_file(CHECKSUM_FILE, options)?;
        writer.write_all(checksums.as_bytes())?;
        let archive_bytes = writer.finish()?.into_inner();

        let checksum = sha256_hex(&archive_bytes);
        debug!("Export archive is {} bytes", archive_bytes.len());
        info!("Exported {} footprints", footprints.len());

        Ok(ExportPackage {
            filename: format!("footprints-export-{}.zip", now.format("%Y-%m-%d")),
            archive_bytes,
            checksum,
            count: footprints.len(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::NewFootprint;
    use chrono::TimeZone;
    use std::io::Read;
    use zip::ZipArchive;

    fn footprint(git: bool) -> Footprint {
        let now = Utc::now();
        Footprint {
            id: Uuid::new_v4(),
            timestamp: now,
            conversation_id: "conv-1".to_string(),
            provider: "test".to_string(),
            encrypted_content: vec![0xde, 0xad, 0xbe, 0xef],
            nonce: [5u8; 24],
            content_hash: sha256_hex(b"hello"),
            message_count: 3,
            git: git.then(|| GitStamp {
                commit_hash: "a".repeat(40),
                timestamp: now,
            }),
            tags: TagSet::parse(["api"]).unwrap(),
            created_at: now,
            updated_at: now,
        }
    }

    fn read_entry(archive: &mut ZipArchive<Cursor<Vec<u8>>>, name: &str) -> Vec<u8> {
        let mut file = archive.by_name(name).unwrap();
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).unwrap();
        buf
    }

    fn open(package: &ExportPackage) -> ZipArchive<Cursor<Vec<u8>>> {
        ZipArchive::new(Cursor::new(package.archive_bytes.clone())).unwrap()
    }

    #[test]
    fn test_archive_layout_and_checksums() {
        let a = footprint(true);
        let b = footprint(false);
        let package = ExportPackager::default().export(&[a.clone(), b.clone()], true).unwrap();

        assert_eq!(package.count, 2);
        assert_eq!(package.checksum, sha256_hex(&package.archive_bytes));

        let mut archive = open(&package);
        let checksums = String::from_utf8(read_entry(&mut archive, CHECKSUM_FILE)).unwrap();
        let mut listed: Vec<&str> = checksums
            .lines()
            .map(|line| line.split_once("  ").unwrap().1)
            .collect();
        listed.sort();

        let mut expected = vec![
            MANIFEST_FILE.to_string(),
            format!("{}/encrypted-data", a.id),
            format!("{}/metadata.json", a.id),
            format!("{}/git-info.json", a.id),
            format!("{}/encrypted-data", b.id),
            format!("{}/metadata.json", b.id),
        ];
        expected.sort();
        assert_eq!(listed, expected);

        for line in checksums.lines() {
            let (hash, path) = line.split_once("  ").unwrap();
            assert_eq!(hash, sha256_hex(&read_entry(&mut archive, path)));
        }

        let payload = read_entry(&mut archive, &format!("{}/encrypted-data", a.id));
        assert_eq!(payload, a.encrypted_content);
    }

    #[test]
    fn test_metadata_serializes_nonce_as_bytes() {
        let fp = footprint(false);
        let package = ExportPackager::default().export(&[fp.clone()], false).unwrap();

        let mut archive = open(&package);
        let metadata: serde_json::Value =
            serde_json::from_slice(&read_entry(&mut archive, &format!("{}/metadata.json", fp.id)))
                .unwrap();

        assert_eq!(metadata["nonce"], serde_json::json!(vec![5u8; 24]));
        assert_eq!(metadata["conversationId"], "conv-1");
        assert_eq!(metadata["messageCount"], 3);
        assert_eq!(metadata["tags"], serde_json::json!(["api"]));
        assert!(metadata.get("encryptedContent").is_none());
    }

    #[test]
    fn test_git_info_only_when_requested() {
        let fp = footprint(true);
        let package = ExportPackager::default().export(&[fp.clone()], false).unwrap();

        let archive = open(&package);
        let names: Vec<&str> = archive.file_names().collect();
        assert!(!names.iter().any(|n| n.ends_with("git-info.json")));
    }

    #[test]
    fn test_empty_export() {
        let package = ExportPackager::default().export(&[], false).unwrap();
        assert_eq!(package.count, 0);

        let mut archive = open(&package);
        let mut names: Vec<String> = archive.file_names().map(str::to_string).collect();
        names.sort();
        assert_eq!(names, vec![CHECKSUM_FILE, MANIFEST_FILE]);

        let manifest: serde_json::Value =
            serde_json::from_slice(&read_entry(&mut archive, MANIFEST_FILE)).unwrap();
        assert_eq!(manifest["recordCount"], 0);
        assert_eq!(manifest["formatVersion"], FORMAT_VERSION);
        assert_eq!(manifest["includesGitProvenance"], false);
    }

    #[test]
    fn test_size_ceiling() {
        let mut fp = footprint(false);
        fp.encrypted_content = vec![0u8; 4096];

        let result = ExportPackager::new(1024).export(&[fp], false);
        match result {
            Err(FootprintError::ExportTooLarge { estimated, limit }) => {
                assert!(estimated > 4096);
                assert_eq!(limit, 1024);
            }
            other => panic!("expected ExportTooLarge, got {:?}", other.map(|p| p.count)),
        }
    }

    #[test]
    fn test_filename_embeds_export_date() {
        let now = Utc.with_ymd_and_hms(2024, 3, 9, 12, 0, 0).unwrap();
        let package = ExportPackager::default().export_at(&[], false, now).unwrap();
        assert_eq!(package.filename, "footprints-export-2024-03-09.zip");
    }

    #[test]
    fn test_collect_records_reports_every_missing_id() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("footprints.db")).unwrap();
        let missing = [Uuid::new_v4(), Uuid::new_v4()];

        match collect_records(&store, Some(&missing)) {
            Err(FootprintError::MissingRecords(ids)) => {
                assert_eq!(ids, missing.iter().map(Uuid::to_string).collect::<Vec<_>>());
            }
            other => panic!("expected MissingRecords, got {:?}", other.map(|r| r.len())),
        }

        assert!(collect_records(&store, None).unwrap().is_empty());
    }

    fn stored(store: &RecordStore, content: Vec<u8>) -> Uuid {
        store
            .create(&NewFootprint {
                conversation_id: "conv-1".to_string(),
                provider: "test".to_string(),
                encrypted_content: content,
                nonce: [5u8; 24],
                content_hash: sha256_hex(b"hello"),
                message_count: 1,
                git: None,
                tags: TagSet::default(),
            })
            .unwrap()
    }

    #[test]
    fn test_repeated_ids_export_once() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("footprints.db")).unwrap();
        let a = stored(&store, vec![1, 2, 3]);
        let b = stored(&store, vec![4, 5, 6]);

        let records = collect_records(&store, Some(&[a, b, a])).unwrap();
        assert_eq!(records.iter().map(|r| r.id).collect::<Vec<_>>(), vec![a, b]);

        let package = ExportPackager::default()
            .export_from(&store, Some(&[a, a]), false)
            .unwrap();
        assert_eq!(package.count, 1);

        let mut archive = open(&package);
        let checksums = String::from_utf8(read_entry(&mut archive, CHECKSUM_FILE)).unwrap();
        assert_eq!(checksums.lines().count(), 3);
    }

    #[test]
    fn test_oversized_store_refused_before_loading() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("footprints.db")).unwrap();
        let id = stored(&store, vec![0u8; 4096]);

        let (count, bytes) = store.payload_size(None).unwrap();
        let pre_estimate = bytes + count as u64 * RECORD_OVERHEAD;

        for ids in [None, Some(&[id, id][..])] {
            match ExportPackager::new(1024).export_from(&store, ids, false) {
                Err(FootprintError::ExportTooLarge { estimated, limit }) => {
                    assert_eq!(estimated, pre_estimate);
                    assert_eq!(limit, 1024);
                }
                other => panic!("expected ExportTooLarge, got {:?}", other.map(|p| p.count)),
            }
        }
    }

    #[test]
    fn test_pre_estimate_never_exceeds_exact_size() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("footprints.db")).unwrap();
        stored(&store, vec![7u8; 100]);
        stored(&store, vec![8u8; 10]);

        let (count, bytes) = store.payload_size(None).unwrap();
        let pre_estimate = bytes + count as u64 * RECORD_OVERHEAD;

        let records = collect_records(&store, None).unwrap();
        let exact = match ExportPackager::new(0).export(&records, false) {
            Err(FootprintError::ExportTooLarge { estimated, .. }) => estimated,
            other => panic!("expected ExportTooLarge, got {:?}", other.map(|p| p.count)),
        };
        assert!(pre_estimate <= exact);

        let package = ExportPackager::new(exact).export_from(&store, None, false).unwrap();
        assert_eq!(package.count, 2);
    }
}
