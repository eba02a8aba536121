//! SQLite record store
//!
//! Holds encrypted footprints plus their plaintext metadata in a single
//! SQLite file. The file runs in WAL mode with a bounded busy wait so that
//! overlapping readers and the writer inside one process do not trip over
//! each other. Tag rewrites that span many rows run inside one transaction.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, ToSql};
use tracing::{debug, info};
use uuid::Uuid;

use super::row::{parse_timestamp, FootprintRow, FOOTPRINT_COLUMNS};
use super::tags::{validate_label, TagSet, TAG_SEPARATOR};
use super::types::{
    format_timestamp, Footprint, FootprintQuery, MasterSalt, NewFootprint, StoreStats,
};
use crate::crypto::KeyDerivationParams;
use crate::error::{FootprintError, Result};

/// How long a statement waits on a locked database before giving up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Current schema version (PRAGMA user_version)
const SCHEMA_VERSION: i64 = 2;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS footprints (
    id TEXT PRIMARY KEY,
    timestamp TEXT NOT NULL,
    conversation_id TEXT NOT NULL,
    provider TEXT NOT NULL,
    encrypted_content BLOB NOT NULL,
    nonce BLOB NOT NULL CHECK (length(nonce) = 24),
    content_hash TEXT NOT NULL,
    message_count INTEGER NOT NULL CHECK (message_count >= 1),
    git_commit_hash TEXT,
    git_timestamp TEXT,
    tags TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    CHECK ((git_commit_hash IS NULL) = (git_timestamp IS NULL))
);

CREATE INDEX IF NOT EXISTS footprints_timestamp ON footprints (timestamp DESC);
CREATE INDEX IF NOT EXISTS footprints_conversation ON footprints (conversation_id);

CREATE TABLE IF NOT EXISTS master_salt (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    salt BLOB NOT NULL,
    verifier BLOB NOT NULL,
    verifier_nonce BLOB NOT NULL,
    kdf_memory_cost INTEGER,
    kdf_time_cost INTEGER,
    kdf_parallelism INTEGER,
    created_at TEXT NOT NULL
);
"#;

/// Version 1 stores predate the recorded key derivation cost
const MIGRATE_V1: &str = r#"
ALTER TABLE master_salt ADD COLUMN kdf_memory_cost INTEGER;
ALTER TABLE master_salt ADD COLUMN kdf_time_cost INTEGER;
ALTER TABLE master_salt ADD COLUMN kdf_parallelism INTEGER;
"#;

/// Delimiter-wrapped form used for exact tag-token matching in SQL
fn wrapped_tag(tag: &str) -> String {
    format!("{sep}{tag}{sep}", sep = TAG_SEPARATOR)
}

/// SQL fragment matching rows whose tag column holds `?` as a whole token
const TAG_TOKEN_MATCH: &str = "instr(',' || COALESCE(tags, '') || ',', ?) > 0";

/// Encrypted footprint store backed by SQLite
pub struct RecordStore {
    path: PathBuf,
    conn: Mutex<Connection>,
}

impl RecordStore {
    /// Open (or create) the store at `path`
    ///
    /// A file that is not a usable footprint database fails here with
    /// [`FootprintError::StorageInitFailed`]; the connection is closed
    /// before the error is returned.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let init_failed = |reason: String| FootprintError::StorageInitFailed {
            path: path.clone(),
            reason,
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| init_failed(e.to_string()))?;
        }

        let conn = Connection::open(&path).map_err(|e| init_failed(e.to_string()))?;

        if let Err(e) = Self::initialize(&conn) {
            drop(conn);
            return Err(init_failed(e.to_string()));
        }

        info!("Footprint store opened at {:?}", path);

        Ok(Self {
            path,
            conn: Mutex::new(conn),
        })
    }

    fn initialize(conn: &Connection) -> Result<()> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;

        let version: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > SCHEMA_VERSION {
            return Err(FootprintError::storage(
                "open",
                format!(
                    "schema version {} is newer than supported version {}",
                    version, SCHEMA_VERSION
                ),
            ));
        }

        conn.execute_batch(SCHEMA)?;
        if version == 1 {
            conn.execute_batch(MIGRATE_V1)?;
            info!("Migrated footprint store schema from version 1");
        }
        if version < SCHEMA_VERSION {
            conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
        }

        let check: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
        if check != "ok" {
            return Err(FootprintError::storage("open", format!("integrity check: {}", check)));
        }

        Ok(())
    }

    /// Path of the underlying database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FootprintError::storage("lock", "SQLite connection poisoned"))
    }

    /// Run `f` against the connection, tagging bare SQLite errors with `operation`
    fn with_conn<T>(
        &self,
        operation: &str,
        f: impl FnOnce(&mut Connection) -> Result<T>,
    ) -> Result<T> {
        let mut conn = self.lock_conn()?;
        f(&mut conn).map_err(|e| match e {
            FootprintError::Storage { operation: op, reason } if op == "sqlite" => {
                FootprintError::storage(operation, reason)
            }
            other => other,
        })
    }

    // --- Master salt ---

    /// Load the master salt row, if one has been written
    pub fn load_master_salt(&self) -> Result<Option<MasterSalt>> {
        self.with_conn("load_master_salt", |conn| {
            let row = conn
                .query_row(
                    r#"
                    SELECT salt, verifier, verifier_nonce,
                           kdf_memory_cost, kdf_time_cost, kdf_parallelism, created_at
                    FROM master_salt WHERE id = 1
                    "#,
                    [],
                    |row| {
                        let kdf = match (
                            row.get::<_, Option<u32>>(3)?,
                            row.get::<_, Option<u32>>(4)?,
                            row.get::<_, Option<u32>>(5)?,
                        ) {
                            (Some(memory_cost), Some(time_cost), Some(parallelism)) => {
                                Some(KeyDerivationParams {
                                    memory_cost,
                                    time_cost,
                                    parallelism,
                                })
                            }
                            _ => None,
                        };
                        Ok((
                            row.get::<_, Vec<u8>>(0)?,
                            row.get::<_, Vec<u8>>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            kdf,
                            row.get::<_, String>(6)?,
                        ))
                    },
                )
                .optional()?;

            row.map(|(salt, verifier, verifier_nonce, kdf, created_at)| {
                Ok::<_, FootprintError>(MasterSalt {
                    salt,
                    verifier,
                    verifier_nonce,
                    kdf,
                    created_at: parse_timestamp("created_at", &created_at)?,
                })
            })
            .transpose()
        })
    }

    /// Write the master salt; fails if one already exists
    pub fn init_master_salt(&self, master: &MasterSalt) -> Result<()> {
        self.with_conn("init_master_salt", |conn| {
            let tx = conn.transaction()?;
            let exists: Option<i64> = tx
                .query_row("SELECT id FROM master_salt WHERE id = 1", [], |row| row.get(0))
                .optional()?;
            if exists.is_some() {
                return Err(FootprintError::storage(
                    "init_master_salt",
                    "master salt already exists and is never replaced",
                ));
            }

            tx.execute(
                r#"
                INSERT INTO master_salt (
                    id, salt, verifier, verifier_nonce,
                    kdf_memory_cost, kdf_time_cost, kdf_parallelism, created_at
                )
                VALUES (1, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    master.salt,
                    master.verifier,
                    master.verifier_nonce,
                    master.kdf.map(|k| k.memory_cost),
                    master.kdf.map(|k| k.time_cost),
                    master.kdf.map(|k| k.parallelism),
                    format_timestamp(&master.created_at)
                ],
            )?;
            tx.commit()?;

            info!("Master salt created");
            Ok(())
        })
    }

    // --- Footprint operations ---

    /// Insert a new footprint, returning its freshly assigned id
    pub fn create(&self, footprint: &NewFootprint) -> Result<Uuid> {
        validate_label("Conversation id", &footprint.conversation_id)?;
        if footprint.message_count == 0 {
            return Err(FootprintError::InvalidInput(
                "Message count must be positive".to_string(),
            ));
        }

        let id = Uuid::new_v4();
        let now = format_timestamp(&Utc::now());

        self.with_conn("create", |conn| {
            conn.execute(
                r#"
                INSERT INTO footprints (
                    id, timestamp, conversation_id, provider, encrypted_content, nonce,
                    content_hash, message_count, git_commit_hash, git_timestamp, tags,
                    created_at, updated_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    id.to_string(),
                    now,
                    footprint.conversation_id,
                    footprint.provider,
                    footprint.encrypted_content,
                    &footprint.nonce[..],
                    footprint.content_hash,
                    footprint.message_count,
                    footprint.git.as_ref().map(|g| g.commit_hash.clone()),
                    footprint.git.as_ref().map(|g| format_timestamp(&g.timestamp)),
                    footprint.tags.to_storage(),
                    now,
                    now,
                ],
            )?;
            Ok(())
        })?;

        debug!("Created footprint {}", id);
        Ok(id)
    }

    /// Exact lookup by id
    pub fn find_by_id(&self, id: &Uuid) -> Result<Option<Footprint>> {
        self.with_conn("find_by_id", |conn| {
            let row = conn
                .query_row(
                    &format!("SELECT {} FROM footprints WHERE id = ?", FOOTPRINT_COLUMNS),
                    [id.to_string()],
                    FootprintRow::from_row,
                )
                .optional()?;
            row.map(Footprint::try_from).transpose()
        })
    }

    /// Look up several ids, returning the found records in request order
    /// and the ids that do not exist
    pub fn find_by_ids(&self, ids: &[Uuid]) -> Result<(Vec<Footprint>, Vec<Uuid>)> {
        let mut found = Vec::with_capacity(ids.len());
        let mut missing = Vec::new();
        for id in ids {
            match self.find_by_id(id)? {
                Some(fp) => found.push(fp),
                None => missing.push(*id),
            }
        }
        Ok((found, missing))
    }

    /// Newest-first listing; `None` limit means unbounded
    pub fn list(&self, limit: Option<usize>, offset: Option<usize>) -> Result<Vec<Footprint>> {
        self.search(&FootprintQuery {
            limit,
            offset,
            ..FootprintQuery::default()
        })
    }

    /// Total number of stored footprints
    pub fn count(&self) -> Result<usize> {
        self.count_matching(&FootprintQuery::default())
    }

    /// Filtered, newest-first listing
    pub fn search(&self, query: &FootprintQuery) -> Result<Vec<Footprint>> {
        self.with_conn("search", |conn| Self::select_matching(conn, query))
    }

    /// Number of footprints matching `query`, ignoring its limit and offset
    pub fn count_matching(&self, query: &FootprintQuery) -> Result<usize> {
        self.with_conn("count", |conn| Self::count_with(conn, query))
    }

    /// One page of `query` together with the total match count
    ///
    /// Both reads share one read transaction, so a concurrent write cannot
    /// land between the page and the total.
    pub fn search_page(&self, query: &FootprintQuery) -> Result<(Vec<Footprint>, usize)> {
        self.with_conn("search_page", |conn| {
            let tx = conn.transaction()?;
            let footprints = Self::select_matching(&tx, query)?;
            let total = Self::count_with(&tx, query)?;
            tx.commit()?;
            Ok((footprints, total))
        })
    }

    fn select_matching(conn: &Connection, query: &FootprintQuery) -> Result<Vec<Footprint>> {
        let (where_clause, mut params) = Self::filter_clause(query);

        let mut sql = format!("SELECT {} FROM footprints", FOOTPRINT_COLUMNS);
        sql.push_str(&where_clause);
        sql.push_str(" ORDER BY timestamp DESC, rowid DESC LIMIT ? OFFSET ?");
        params.push(Box::new(query.limit.map(|l| l as i64).unwrap_or(-1)));
        params.push(Box::new(query.offset.unwrap_or(0) as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(params.iter()),
            FootprintRow::from_row,
        )?;

        let mut footprints = Vec::new();
        for row in rows {
            footprints.push(row?.try_into()?);
        }
        Ok(footprints)
    }

    fn count_with(conn: &Connection, query: &FootprintQuery) -> Result<usize> {
        let (where_clause, params) = Self::filter_clause(query);
        let sql = format!("SELECT COUNT(*) FROM footprints{}", where_clause);

        let count: i64 = conn.query_row(
            &sql,
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;
        Ok(count as usize)
    }

    /// Record count and summed size of the variable-length columns for
    /// `ids` (every record when `None`), read without loading any payload
    ///
    /// Unknown ids contribute nothing. Pass distinct ids.
    pub fn payload_size(&self, ids: Option<&[Uuid]>) -> Result<(usize, u64)> {
        const SIZE_COLUMNS: &str = r#"
            SELECT COUNT(*), COALESCE(SUM(
                length(encrypted_content) + length(CAST(conversation_id AS BLOB))
                + length(CAST(provider AS BLOB)) + length(content_hash)
                + COALESCE(length(CAST(tags AS BLOB)), 0)
            ), 0)
            FROM footprints
        "#;

        self.with_conn("payload_size", |conn| {
            let read = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(usize, u64)> {
                Ok((row.get::<_, i64>(0)? as usize, row.get::<_, i64>(1)? as u64))
            };
            match ids {
                None => Ok(conn.query_row(SIZE_COLUMNS, [], read)?),
                Some(ids) => {
                    let mut stmt = conn.prepare(&format!("{} WHERE id = ?", SIZE_COLUMNS))?;
                    let mut total = (0usize, 0u64);
                    for id in ids {
                        let (count, bytes) = stmt.query_row([id.to_string()], read)?;
                        total.0 += count;
                        total.1 += bytes;
                    }
                    Ok(total)
                }
            }
        })
    }

    fn filter_clause(query: &FootprintQuery) -> (String, Vec<Box<dyn ToSql>>) {
        let mut conditions: Vec<&str> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(text) = query.query.as_deref().filter(|q| !q.is_empty()) {
            conditions
                .push("(instr(conversation_id, ?) > 0 OR instr(COALESCE(tags, ''), ?) > 0)");
            params.push(Box::new(text.to_string()));
            params.push(Box::new(text.to_string()));
        }

        for tag in query.tags.iter() {
            conditions.push(TAG_TOKEN_MATCH);
            params.push(Box::new(wrapped_tag(tag)));
        }

        if let Some(from) = query.date_from {
            conditions.push("timestamp >= ?");
            params.push(Box::new(format_timestamp(&from)));
        }

        if let Some(to) = query.date_to {
            conditions.push("timestamp <= ?");
            params.push(Box::new(format_timestamp(&to)));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }

    /// Delete one footprint; `false` if it did not exist
    pub fn delete(&self, id: &Uuid) -> Result<bool> {
        let deleted = self.with_conn("delete", |conn| {
            Ok(conn.execute("DELETE FROM footprints WHERE id = ?", [id.to_string()])?)
        })?;
        if deleted > 0 {
            debug!("Deleted footprint {}", id);
        }
        Ok(deleted > 0)
    }

    /// Delete many footprints, skipping unknown ids; returns how many were removed
    pub fn delete_many(&self, ids: &[Uuid]) -> Result<usize> {
        let removed = self.with_conn("delete_many", |conn| {
            let tx = conn.transaction()?;
            let mut removed = 0;
            {
                let mut stmt = tx.prepare("DELETE FROM footprints WHERE id = ?")?;
                for id in ids {
                    removed += stmt.execute([id.to_string()])?;
                }
            }
            tx.commit()?;
            Ok(removed)
        })?;

        info!("Deleted {} of {} requested footprints", removed, ids.len());
        Ok(removed)
    }

    /// Replace the tag set outright; `None` or an empty set clears it
    pub fn update_tags(&self, id: &Uuid, tags: Option<&TagSet>) -> Result<bool> {
        let stored = tags.and_then(TagSet::to_storage);
        let now = format_timestamp(&Utc::now());

        let updated = self.with_conn("update_tags", |conn| {
            Ok(conn.execute(
                "UPDATE footprints SET tags = ?, updated_at = ? WHERE id = ?",
                params![stored, now, id.to_string()],
            )?)
        })?;
        Ok(updated > 0)
    }

    /// Merge `tags` into the footprint's existing tags
    pub fn add_tags(&self, id: &Uuid, tags: &TagSet) -> Result<()> {
        if tags.is_empty() {
            return Err(FootprintError::InvalidInput(
                "At least one non-empty tag is required".to_string(),
            ));
        }

        self.with_conn("add_tags", |conn| {
            let tx = conn.transaction()?;
            let current: Option<Option<String>> = tx
                .query_row(
                    "SELECT tags FROM footprints WHERE id = ?",
                    [id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(current) = current else {
                return Err(FootprintError::NotFound(format!("Footprint {}", id)));
            };

            let mut merged = current
                .as_deref()
                .map(TagSet::from_storage)
                .unwrap_or_default();
            merged.merge(tags);

            tx.execute(
                "UPDATE footprints SET tags = ?, updated_at = ? WHERE id = ?",
                params![
                    merged.to_storage(),
                    format_timestamp(&Utc::now()),
                    id.to_string()
                ],
            )?;
            tx.commit()?;
            Ok(())
        })
    }

    /// Rename a tag on every footprint carrying it; all rows or none
    pub fn rename_tag(&self, old_tag: &str, new_tag: &str) -> Result<usize> {
        let old_tag = Self::single_tag(old_tag)?;
        let new_tag = Self::single_tag(new_tag)?;
        if old_tag == new_tag {
            return Ok(0);
        }

        let updated = self.rewrite_tags("rename_tag", &old_tag, |tags| {
            tags.rename(&old_tag, &new_tag)
        })?;

        info!("Renamed tag {:?} to {:?} on {} footprints", old_tag, new_tag, updated);
        Ok(updated)
    }

    /// Remove a tag from every footprint carrying it; all rows or none
    pub fn remove_tag(&self, tag: &str) -> Result<usize> {
        let tag = Self::single_tag(tag)?;
        let updated = self.rewrite_tags("remove_tag", &tag, |tags| tags.remove(&tag))?;

        info!("Removed tag {:?} from {} footprints", tag, updated);
        Ok(updated)
    }

    fn single_tag(tag: &str) -> Result<String> {
        let set = TagSet::parse([tag])?;
        let first = set.iter().next().map(str::to_string);
        first.ok_or_else(|| FootprintError::InvalidInput("Tag cannot be empty".to_string()))
    }

    /// Read every row holding `tag`, apply `edit`, and write back inside one
    /// transaction. Any failure drops the transaction, rolling back every row.
    fn rewrite_tags(
        &self,
        operation: &str,
        tag: &str,
        mut edit: impl FnMut(&mut TagSet) -> bool,
    ) -> Result<usize> {
        self.with_conn(operation, |conn| {
            let tx = conn.transaction()?;

            let matching: Vec<(String, String)> = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT id, tags FROM footprints WHERE {} ORDER BY rowid",
                    TAG_TOKEN_MATCH
                ))?;
                let rows = stmt.query_map([wrapped_tag(tag)], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            let now = format_timestamp(&Utc::now());
            let mut updated = 0;
            {
                let mut stmt =
                    tx.prepare("UPDATE footprints SET tags = ?, updated_at = ? WHERE id = ?")?;
                for (id, stored) in &matching {
                    let mut tags = TagSet::from_storage(stored);
                    if edit(&mut tags) {
                        stmt.execute(params![tags.to_storage(), now, id])?;
                        updated += 1;
                    }
                }
            }

            tx.commit()?;
            Ok(updated)
        })
    }

    /// Occurrence count of every tag across all footprints
    pub fn tag_counts(&self) -> Result<BTreeMap<String, usize>> {
        self.with_conn("tag_counts", |conn| {
            let mut stmt = conn.prepare("SELECT tags FROM footprints WHERE tags IS NOT NULL")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;

            let mut counts = BTreeMap::new();
            for row in rows {
                for tag in TagSet::from_storage(&row?).iter() {
                    *counts.entry(tag.to_string()).or_insert(0) += 1;
                }
            }
            Ok(counts)
        })
    }

    /// Aggregate statistics over the whole store
    pub fn stats(&self) -> Result<StoreStats> {
        self.with_conn("stats", |conn| {
            let (total, tagged, with_git, oldest, newest) = conn.query_row(
                r#"
                SELECT COUNT(*), COUNT(tags), COUNT(git_commit_hash), MIN(timestamp), MAX(timestamp)
                FROM footprints
                "#,
                [],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, i64>(2)?,
                        row.get::<_, Option<String>>(3)?,
                        row.get::<_, Option<String>>(4)?,
                    ))
                },
            )?;

            Ok(StoreStats {
                total: total as usize,
                tagged: tagged as usize,
                with_git_provenance: with_git as usize,
                oldest: oldest.map(|ts| parse_timestamp("timestamp", &ts)).transpose()?,
                newest: newest.map(|ts| parse_timestamp("timestamp", &ts)).transpose()?,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::GitStamp;
    use chrono::Duration as ChronoDuration;
    use tempfile::TempDir;

    fn test_store() -> (RecordStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = RecordStore::open(temp_dir.path().join("footprints.db")).unwrap();
        (store, temp_dir)
    }

    fn new_footprint(conversation_id: &str, tags: &[&str]) -> NewFootprint {
        NewFootprint {
            conversation_id: conversation_id.to_string(),
            provider: "test-provider".to_string(),
            encrypted_content: vec![1, 2, 3, 4],
            nonce: [9u8; 24],
            content_hash: "abc123".to_string(),
            message_count: 2,
            git: None,
            tags: TagSet::parse(tags).unwrap(),
        }
    }

    fn tags_of(store: &RecordStore, id: &Uuid) -> Vec<String> {
        store
            .find_by_id(id)
            .unwrap()
            .unwrap()
            .tags
            .iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_create_and_find() {
        let (store, _dir) = test_store();
        let mut input = new_footprint("conv-1", &["api", "review"]);
        input.git = Some(GitStamp {
            commit_hash: "deadbeef".to_string(),
            timestamp: Utc::now(),
        });

        let id = store.create(&input).unwrap();
        let found = store.find_by_id(&id).unwrap().unwrap();

        assert_eq!(found.id, id);
        assert_eq!(found.conversation_id, "conv-1");
        assert_eq!(found.encrypted_content, vec![1, 2, 3, 4]);
        assert_eq!(found.nonce, [9u8; 24]);
        assert_eq!(found.message_count, 2);
        assert_eq!(found.git.unwrap().commit_hash, "deadbeef");
        assert_eq!(tags_of(&store, &id), vec!["api", "review"]);
        assert_eq!(found.created_at, found.updated_at);
    }

    #[test]
    fn test_find_missing_returns_none() {
        let (store, _dir) = test_store();
        assert!(store.find_by_id(&Uuid::new_v4()).unwrap().is_none());
    }

    #[test]
    fn test_create_rejects_reserved_characters_in_conversation_id() {
        let (store, _dir) = test_store();
        let result = store.create(&new_footprint("conv,1", &[]));
        assert!(matches!(result, Err(FootprintError::InvalidInput(_))));
    }

    #[test]
    fn test_empty_store() {
        let (store, _dir) = test_store();
        assert!(store.list(None, None).unwrap().is_empty());
        assert_eq!(store.count().unwrap(), 0);
        assert!(store.tag_counts().unwrap().is_empty());
        assert_eq!(store.stats().unwrap(), StoreStats::default());
    }

    #[test]
    fn test_list_pagination_is_consistent() {
        let (store, _dir) = test_store();
        for i in 0..5 {
            store.create(&new_footprint(&format!("conv-{}", i), &[])).unwrap();
        }

        let all = store.list(None, None).unwrap();
        let first = store.list(Some(2), Some(0)).unwrap();
        let second = store.list(Some(2), Some(2)).unwrap();

        assert_eq!(all.len(), 5);
        let paged: Vec<Uuid> = first.iter().chain(second.iter()).map(|f| f.id).collect();
        let expected: Vec<Uuid> = all.iter().take(4).map(|f| f.id).collect();
        assert_eq!(paged, expected);

        // Newest first
        assert_eq!(all[0].conversation_id, "conv-4");
    }

    #[test]
    fn test_offset_without_limit() {
        let (store, _dir) = test_store();
        for i in 0..3 {
            store.create(&new_footprint(&format!("conv-{}", i), &[])).unwrap();
        }

        let rest = store.list(None, Some(1)).unwrap();
        assert_eq!(rest.len(), 2);
        assert_eq!(rest[0].conversation_id, "conv-1");
    }

    #[test]
    fn test_search_page_returns_page_and_total() {
        let (store, _dir) = test_store();
        for i in 0..4 {
            store.create(&new_footprint(&format!("conv-{}", i), &["api"])).unwrap();
        }
        store.create(&new_footprint("other", &[])).unwrap();

        let query = FootprintQuery {
            tags: TagSet::parse(["api"]).unwrap(),
            limit: Some(3),
            offset: Some(2),
            ..FootprintQuery::default()
        };
        let (page, total) = store.search_page(&query).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(total, 4);
        assert_eq!(page[0].conversation_id, "conv-1");
    }

    #[test]
    fn test_payload_size_without_loading_records() {
        let (store, _dir) = test_store();
        let a = store.create(&new_footprint("conv-a", &["x", "y"])).unwrap();
        let b = store.create(&new_footprint("conv-b", &[])).unwrap();

        // content 4 + "conv-a" 6 + "test-provider" 13 + "abc123" 6 + "x,y" 3
        assert_eq!(store.payload_size(Some(&[a])).unwrap(), (1, 32));
        assert_eq!(store.payload_size(Some(&[b, Uuid::new_v4()])).unwrap(), (1, 29));
        assert_eq!(store.payload_size(None).unwrap(), (2, 61));
        assert_eq!(store.payload_size(Some(&[])).unwrap(), (0, 0));
    }

    #[test]
    fn test_search_tags_match_exact_tokens() {
        let (store, _dir) = test_store();
        let apigee = store.create(&new_footprint("conv-a", &["apigee"])).unwrap();
        let api = store.create(&new_footprint("conv-b", &["x", "api"])).unwrap();

        let query = FootprintQuery {
            tags: TagSet::parse(["api"]).unwrap(),
            ..FootprintQuery::default()
        };
        let results = store.search(&query).unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, api);
        assert_ne!(results[0].id, apigee);
    }

    #[test]
    fn test_search_tags_require_all() {
        let (store, _dir) = test_store();
        let both = store.create(&new_footprint("c1", &["api", "bug"])).unwrap();
        store.create(&new_footprint("c2", &["api"])).unwrap();

        let query = FootprintQuery {
            tags: TagSet::parse(["bug", "api"]).unwrap(),
            ..FootprintQuery::default()
        };
        let results = store.search(&query).unwrap();
        assert_eq!(results.iter().map(|f| f.id).collect::<Vec<_>>(), vec![both]);
        assert_eq!(store.count_matching(&query).unwrap(), 1);
    }

    #[test]
    fn test_search_query_matches_conversation_or_tags() {
        let (store, _dir) = test_store();
        let by_conv = store.create(&new_footprint("project-alpha-7", &[])).unwrap();
        let by_tag = store.create(&new_footprint("other", &["alphabet"])).unwrap();
        store.create(&new_footprint("unrelated", &["beta"])).unwrap();

        let query = FootprintQuery {
            query: Some("alpha".to_string()),
            ..FootprintQuery::default()
        };
        let mut ids: Vec<Uuid> = store.search(&query).unwrap().iter().map(|f| f.id).collect();
        ids.sort();
        let mut expected = vec![by_conv, by_tag];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_search_date_bounds_are_inclusive() {
        let (store, _dir) = test_store();
        let id = store.create(&new_footprint("conv", &[])).unwrap();
        let ts = store.find_by_id(&id).unwrap().unwrap().timestamp;

        let exact = FootprintQuery {
            date_from: Some(ts),
            date_to: Some(ts),
            ..FootprintQuery::default()
        };
        assert_eq!(store.search(&exact).unwrap().len(), 1);

        let later = FootprintQuery {
            date_from: Some(ts + ChronoDuration::milliseconds(1)),
            ..FootprintQuery::default()
        };
        assert!(store.search(&later).unwrap().is_empty());

        let earlier = FootprintQuery {
            date_to: Some(ts - ChronoDuration::milliseconds(1)),
            ..FootprintQuery::default()
        };
        assert!(store.search(&earlier).unwrap().is_empty());
    }

    #[test]
    fn test_delete_and_delete_many() {
        let (store, _dir) = test_store();
        let a = store.create(&new_footprint("a", &[])).unwrap();
        let b = store.create(&new_footprint("b", &[])).unwrap();
        let c = store.create(&new_footprint("c", &[])).unwrap();

        assert!(store.delete(&a).unwrap());
        assert!(!store.delete(&a).unwrap());

        let removed = store.delete_many(&[b, Uuid::new_v4(), c, b]).unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_update_tags_replaces() {
        let (store, _dir) = test_store();
        let id = store.create(&new_footprint("a", &["one", "two"])).unwrap();
        let before = store.find_by_id(&id).unwrap().unwrap().updated_at;

        std::thread::sleep(std::time::Duration::from_millis(5));
        let replacement = TagSet::parse(["three"]).unwrap();
        assert!(store.update_tags(&id, Some(&replacement)).unwrap());
        assert_eq!(tags_of(&store, &id), vec!["three"]);
        assert!(store.find_by_id(&id).unwrap().unwrap().updated_at > before);

        assert!(store.update_tags(&id, None).unwrap());
        assert!(tags_of(&store, &id).is_empty());

        assert!(!store.update_tags(&Uuid::new_v4(), None).unwrap());
    }

    #[test]
    fn test_add_tags_merges_and_is_idempotent() {
        let (store, _dir) = test_store();
        let id = store.create(&new_footprint("a", &["one"])).unwrap();
        let extra = TagSet::parse(["two", "one"]).unwrap();

        store.add_tags(&id, &extra).unwrap();
        store.add_tags(&id, &extra).unwrap();
        assert_eq!(tags_of(&store, &id), vec!["one", "two"]);
    }

    #[test]
    fn test_add_tags_rejects_empty_set() {
        let (store, _dir) = test_store();
        let id = store.create(&new_footprint("a", &[])).unwrap();
        let empty = TagSet::parse(["  ", ""]).unwrap();

        let result = store.add_tags(&id, &empty);
        assert!(matches!(result, Err(FootprintError::InvalidInput(_))));
    }

    #[test]
    fn test_add_tags_missing_footprint() {
        let (store, _dir) = test_store();
        let result = store.add_tags(&Uuid::new_v4(), &TagSet::parse(["x"]).unwrap());
        assert!(matches!(result, Err(FootprintError::NotFound(_))));
    }

    #[test]
    fn test_rename_tag_touches_only_exact_token() {
        let (store, _dir) = test_store();
        let a = store.create(&new_footprint("a", &["api", "keep"])).unwrap();
        let b = store.create(&new_footprint("b", &["apigee"])).unwrap();
        let c = store.create(&new_footprint("c", &["keep", "api"])).unwrap();

        let updated = store.rename_tag("api", "interface").unwrap();

        assert_eq!(updated, 2);
        assert_eq!(tags_of(&store, &a), vec!["interface", "keep"]);
        assert_eq!(tags_of(&store, &b), vec!["apigee"]);
        assert_eq!(tags_of(&store, &c), vec!["keep", "interface"]);
    }

    #[test]
    fn test_rename_tag_is_atomic_on_failure() {
        let (store, _dir) = test_store();
        let ids: Vec<Uuid> = (0..3)
            .map(|i| store.create(&new_footprint(&format!("c{}", i), &["old"])).unwrap())
            .collect();

        // Make the last row in the batch fail after earlier rows were rewritten.
        store
            .lock_conn()
            .unwrap()
            .execute_batch(&format!(
                "CREATE TRIGGER fail_rename BEFORE UPDATE ON footprints WHEN NEW.id = '{}' \
                 BEGIN SELECT RAISE(ABORT, 'simulated failure'); END;",
                ids[2]
            ))
            .unwrap();

        let result = store.rename_tag("old", "new");
        assert!(matches!(result, Err(FootprintError::Storage { .. })));

        for id in &ids {
            assert_eq!(tags_of(&store, id), vec!["old"]);
        }
        assert_eq!(store.tag_counts().unwrap().get("new"), None);
    }

    #[test]
    fn test_remove_tag() {
        let (store, _dir) = test_store();
        let a = store.create(&new_footprint("a", &["drop", "keep"])).unwrap();
        let b = store.create(&new_footprint("b", &["drop"])).unwrap();
        let c = store.create(&new_footprint("c", &["dropped"])).unwrap();

        assert_eq!(store.remove_tag("drop").unwrap(), 2);
        assert_eq!(tags_of(&store, &a), vec!["keep"]);
        assert!(tags_of(&store, &b).is_empty());
        assert_eq!(tags_of(&store, &c), vec!["dropped"]);
    }

    #[test]
    fn test_tag_counts() {
        let (store, _dir) = test_store();
        store.create(&new_footprint("a", &["api", "bug"])).unwrap();
        store.create(&new_footprint("b", &["api"])).unwrap();
        store.create(&new_footprint("c", &[])).unwrap();

        let counts = store.tag_counts().unwrap();
        assert_eq!(counts.get("api"), Some(&2));
        assert_eq!(counts.get("bug"), Some(&1));
        assert_eq!(counts.len(), 2);
    }

    #[test]
    fn test_master_salt_written_once() {
        let (store, _dir) = test_store();
        assert!(store.load_master_salt().unwrap().is_none());

        let master = MasterSalt {
            salt: vec![1u8; 16],
            verifier: vec![2u8; 40],
            verifier_nonce: vec![3u8; 24],
            kdf: Some(KeyDerivationParams {
                memory_cost: 8192,
                time_cost: 2,
                parallelism: 1,
            }),
            created_at: Utc::now(),
        };
        store.init_master_salt(&master).unwrap();

        let loaded = store.load_master_salt().unwrap().unwrap();
        assert_eq!(loaded.salt, vec![1u8; 16]);
        assert_eq!(loaded.kdf, master.kdf);

        let replacement = MasterSalt {
            salt: vec![7u8; 16],
            ..master
        };
        assert!(store.init_master_salt(&replacement).is_err());
        assert_eq!(store.load_master_salt().unwrap().unwrap().salt, vec![1u8; 16]);
    }

    #[test]
    fn test_reopen_persists() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("footprints.db");

        let id = {
            let store = RecordStore::open(&path).unwrap();
            store.create(&new_footprint("persisted", &["t"])).unwrap()
        };

        let store = RecordStore::open(&path).unwrap();
        let found = store.find_by_id(&id).unwrap().unwrap();
        assert_eq!(found.conversation_id, "persisted");
    }

    #[test]
    fn test_version_one_store_gains_kdf_columns() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("footprints.db");
        {
            let conn = Connection::open(&path).unwrap();
            conn.execute_batch(
                r#"
                CREATE TABLE master_salt (
                    id INTEGER PRIMARY KEY CHECK (id = 1),
                    salt BLOB NOT NULL,
                    verifier BLOB NOT NULL,
                    verifier_nonce BLOB NOT NULL,
                    created_at TEXT NOT NULL
                );
                INSERT INTO master_salt VALUES (1, x'01', x'02', x'03', '2024-01-01T00:00:00.000Z');
                PRAGMA user_version = 1;
                "#,
            )
            .unwrap();
        }

        let store = RecordStore::open(&path).unwrap();
        let loaded = store.load_master_salt().unwrap().unwrap();
        assert_eq!(loaded.salt, vec![1u8]);
        assert!(loaded.kdf.is_none());
    }

    #[test]
    fn test_corrupted_file_fails_fast() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("footprints.db");
        std::fs::write(&path, vec![0x5au8; 4096]).unwrap();

        let result = RecordStore::open(&path);
        assert!(matches!(
            result,
            Err(FootprintError::StorageInitFailed { .. })
        ));
    }
}
