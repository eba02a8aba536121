//! Typed request parameters
//!
//! The request layer deserializes caller input into these structs and
//! calls `validate()` before anything reaches storage. Validation turns
//! loosely typed values (signed numbers, date strings, raw tag lists) into
//! the checked types the vault works with.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;

use crate::crypto::SecretString;
use crate::error::{FootprintError, Result};
use crate::storage::{end_of_day, start_of_day, validate_label, FootprintQuery, TagSet};

/// Largest plaintext accepted for a single capture (10 MiB)
pub const MAX_CONTENT_BYTES: usize = 10 * 1024 * 1024;

fn non_negative(name: &str, value: Option<i64>) -> Result<Option<usize>> {
    value
        .map(|v| {
            usize::try_from(v).map_err(|_| {
                FootprintError::Validation(format!("{} must be non-negative, got {}", name, v))
            })
        })
        .transpose()
}

fn required(name: &str, value: &str) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(FootprintError::Validation(format!("{} is required", name)));
    }
    Ok(value.to_string())
}

fn parse_tags(tags: Option<&[String]>) -> Result<TagSet> {
    TagSet::parse(tags.unwrap_or_default())
        .map_err(|e| FootprintError::Validation(e.to_string()))
}

/// Parse an RFC 3339 timestamp or a bare `YYYY-MM-DD` date
///
/// A bare date resolves to the start of the day, or to its last
/// millisecond when `end_of_range` is set.
pub fn parse_date(name: &str, value: &str, end_of_range: bool) -> Result<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map(|date| {
            if end_of_range {
                end_of_day(date)
            } else {
                start_of_day(date)
            }
        })
        .map_err(|_| {
            FootprintError::Validation(format!(
                "{} must be an RFC 3339 timestamp or YYYY-MM-DD date, got {:?}",
                name, value
            ))
        })
}

/// Pagination for `list`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Checked pagination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Page {
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ListParams {
    pub fn validate(&self) -> Result<Page> {
        Ok(Page {
            limit: non_negative("limit", self.limit)?,
            offset: non_negative("offset", self.offset)?,
        })
    }
}

/// Filters for `search`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchParams {
    pub query: Option<String>,
    pub tags: Option<Vec<String>>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl SearchParams {
    pub fn validate(&self) -> Result<FootprintQuery> {
        let page = ListParams {
            limit: self.limit,
            offset: self.offset,
        }
        .validate()?;

        let date_from = self
            .date_from
            .as_deref()
            .map(|d| parse_date("dateFrom", d, false))
            .transpose()?;
        let date_to = self
            .date_to
            .as_deref()
            .map(|d| parse_date("dateTo", d, true))
            .transpose()?;

        if let (Some(from), Some(to)) = (date_from, date_to) {
            if from > to {
                return Err(FootprintError::Validation(
                    "dateFrom must not be after dateTo".to_string(),
                ));
            }
        }

        Ok(FootprintQuery {
            query: self.query.clone().filter(|q| !q.is_empty()),
            tags: parse_tags(self.tags.as_deref())?,
            date_from,
            date_to,
            limit: page.limit,
            offset: page.offset,
        })
    }
}

/// Input for `capture`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureParams {
    pub conversation_id: String,
    pub provider: String,
    pub content: String,
    pub message_count: i64,
    pub tags: Option<Vec<String>>,
}

/// Checked capture input
#[derive(Debug, Clone)]
pub struct Capture {
    pub conversation_id: String,
    pub provider: String,
    pub content: SecretString,
    pub message_count: u32,
    pub tags: TagSet,
}

impl Capture {
    /// Convenience constructor; equivalent to validating [`CaptureParams`]
    pub fn new(
        conversation_id: &str,
        provider: &str,
        content: &str,
        message_count: u32,
    ) -> Result<Self> {
        CaptureParams {
            conversation_id: conversation_id.to_string(),
            provider: provider.to_string(),
            content: content.to_string(),
            message_count: i64::from(message_count),
            tags: None,
        }
        .validate()
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.tags = TagSet::parse(tags).map_err(|e| FootprintError::Validation(e.to_string()))?;
        Ok(self)
    }
}

impl CaptureParams {
    pub fn validate(&self) -> Result<Capture> {
        let conversation_id = required("conversationId", &self.conversation_id)?;
        validate_label("conversationId", &conversation_id)
            .map_err(|e| FootprintError::Validation(e.to_string()))?;
        let provider = required("provider", &self.provider)?;

        if self.content.is_empty() {
            return Err(FootprintError::Validation("content is required".to_string()));
        }
        if self.content.len() > MAX_CONTENT_BYTES {
            return Err(FootprintError::Validation(format!(
                "content is {} bytes, above the {} byte limit",
                self.content.len(),
                MAX_CONTENT_BYTES
            )));
        }

        let message_count = u32::try_from(self.message_count)
            .ok()
            .filter(|&n| n >= 1)
            .ok_or_else(|| {
                FootprintError::Validation(format!(
                    "messageCount must be a positive integer, got {}",
                    self.message_count
                ))
            })?;

        Ok(Capture {
            conversation_id,
            provider,
            content: SecretString::new(self.content.as_str()),
            message_count,
            tags: parse_tags(self.tags.as_deref())?,
        })
    }
}
