//! Footprint row type for database queries.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::tags::TagSet;
use super::types::{Footprint, GitStamp};
use crate::crypto::NONCE_LEN;
use crate::error::{FootprintError, Result};

/// Column list matching [`FootprintRow::from_row`]
pub(crate) const FOOTPRINT_COLUMNS: &str = "id, timestamp, conversation_id, provider, \
     encrypted_content, nonce, content_hash, message_count, git_commit_hash, git_timestamp, \
     tags, created_at, updated_at";

/// Raw row data from the footprints table, before parsing into domain types.
#[derive(Debug)]
pub(crate) struct FootprintRow {
    pub id: String,
    pub timestamp: String,
    pub conversation_id: String,
    pub provider: String,
    pub encrypted_content: Vec<u8>,
    pub nonce: Vec<u8>,
    pub content_hash: String,
    pub message_count: i64,
    pub git_commit_hash: Option<String>,
    pub git_timestamp: Option<String>,
    pub tags: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FootprintRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            timestamp: row.get(1)?,
            conversation_id: row.get(2)?,
            provider: row.get(3)?,
            encrypted_content: row.get(4)?,
            nonce: row.get(5)?,
            content_hash: row.get(6)?,
            message_count: row.get(7)?,
            git_commit_hash: row.get(8)?,
            git_timestamp: row.get(9)?,
            tags: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
        })
    }
}

pub(crate) fn parse_timestamp(field: &str, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|ts| ts.with_timezone(&Utc))
        .map_err(|e| FootprintError::storage("decode row", format!("Invalid {}: {}", field, e)))
}

impl TryFrom<FootprintRow> for Footprint {
    type Error = FootprintError;

    fn try_from(row: FootprintRow) -> Result<Self> {
        let id = Uuid::parse_str(&row.id)
            .map_err(|e| FootprintError::storage("decode row", format!("Invalid id: {}", e)))?;
        let nonce: [u8; NONCE_LEN] = row.nonce.as_slice().try_into().map_err(|_| {
            FootprintError::storage(
                "decode row",
                format!("Footprint {} has a {}-byte nonce", id, row.nonce.len()),
            )
        })?;
        let message_count = u32::try_from(row.message_count).map_err(|_| {
            FootprintError::storage(
                "decode row",
                format!("Footprint {} has message count {}", id, row.message_count),
            )
        })?;

        let git = match (row.git_commit_hash, row.git_timestamp) {
            (Some(commit_hash), Some(ts)) => Some(GitStamp {
                commit_hash,
                timestamp: parse_timestamp("git_timestamp", &ts)?,
            }),
            (None, None) => None,
            _ => {
                return Err(FootprintError::storage(
                    "decode row",
                    format!("Footprint {} has a partial git stamp", id),
                ))
            }
        };

        Ok(Footprint {
            id,
            timestamp: parse_timestamp("timestamp", &row.timestamp)?,
            conversation_id: row.conversation_id,
            provider: row.provider,
            encrypted_content: row.encrypted_content,
            nonce,
            content_hash: row.content_hash,
            message_count,
            git,
            tags: row
                .tags
                .as_deref()
                .map(TagSet::from_storage)
                .unwrap_or_default(),
            created_at: parse_timestamp("created_at", &row.created_at)?,
            updated_at: parse_timestamp("updated_at", &row.updated_at)?,
        })
    }
}
