//! Footprint record types

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::tags::TagSet;
use crate::crypto::{KeyDerivationParams, NONCE_LEN};

/// Render a timestamp the way it is stored: RFC 3339, UTC, millisecond precision
///
/// Fixed width keeps lexical and chronological order identical.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Version-control commit a footprint is bound to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitStamp {
    pub commit_hash: String,
    pub timestamp: DateTime<Utc>,
}

/// A stored footprint (content still encrypted)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Footprint {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub provider: String,
    pub encrypted_content: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    /// SHA-256 of the plaintext, hex encoded
    pub content_hash: String,
    pub message_count: u32,
    pub git: Option<GitStamp>,
    pub tags: TagSet,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Input for a new footprint
#[derive(Debug, Clone)]
pub struct NewFootprint {
    pub conversation_id: String,
    pub provider: String,
    pub encrypted_content: Vec<u8>,
    pub nonce: [u8; NONCE_LEN],
    pub content_hash: String,
    pub message_count: u32,
    pub git: Option<GitStamp>,
    pub tags: TagSet,
}

/// Non-secret view of a footprint for listings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FootprintSummary {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub conversation_id: String,
    pub provider: String,
    pub message_count: u32,
    pub content_hash: String,
    pub tags: TagSet,
    pub has_git_provenance: bool,
}

impl From<&Footprint> for FootprintSummary {
    fn from(fp: &Footprint) -> Self {
        Self {
            id: fp.id,
            timestamp: fp.timestamp,
            conversation_id: fp.conversation_id.clone(),
            provider: fp.provider.clone(),
            message_count: fp.message_count,
            content_hash: fp.content_hash.clone(),
            tags: fp.tags.clone(),
            has_git_provenance: fp.git.is_some(),
        }
    }
}

/// Search criteria; every present field narrows the result (AND)
#[derive(Debug, Clone, Default)]
pub struct FootprintQuery {
    /// Substring of the conversation id or the stored tag string
    pub query: Option<String>,
    /// All of these tags must be present
    pub tags: TagSet,
    /// Inclusive lower bound on the capture timestamp
    pub date_from: Option<DateTime<Utc>>,
    /// Inclusive upper bound on the capture timestamp
    pub date_to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

/// Aggregate store statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreStats {
    pub total: usize,
    pub tagged: usize,
    pub with_git_provenance: usize,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

/// The single master salt row plus the password verifier sealed with it
#[derive(Debug, Clone)]
pub struct MasterSalt {
    pub salt: Vec<u8>,
    pub verifier: Vec<u8>,
    pub verifier_nonce: Vec<u8>,
    /// Argon2id cost the key was derived with; `None` for stores created
    /// before the cost was recorded
    pub kdf: Option<KeyDerivationParams>,
    pub created_at: DateTime<Utc>,
}

/// Start of a calendar day in UTC
pub fn start_of_day(date: NaiveDate) -> DateTime<Utc> {
    date.and_time(chrono::NaiveTime::MIN).and_utc()
}

/// Last representable millisecond of a calendar day in UTC
pub fn end_of_day(date: NaiveDate) -> DateTime<Utc> {
    start_of_day(date) + chrono::Duration::days(1) - chrono::Duration::milliseconds(1)
}
