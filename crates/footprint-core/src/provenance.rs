//! Version-control provenance lookup
//!
//! Binds a capture to the commit that was checked out when it happened.
//! Lookup is best effort: a missing repository, an empty history or any
//! git failure yields `None` and capture carries on without a stamp.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use git2::{ErrorCode, Repository};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::storage::GitStamp;

/// Commit identity at the time of capture
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GitCommit {
    pub commit_hash: String,
    pub timestamp: DateTime<Utc>,
    pub message: Option<String>,
    pub author: Option<String>,
}

impl From<&GitCommit> for GitStamp {
    fn from(commit: &GitCommit) -> Self {
        GitStamp {
            commit_hash: commit.commit_hash.clone(),
            timestamp: commit.timestamp,
        }
    }
}

/// Source of provenance stamps
#[async_trait]
pub trait ProvenanceSource: Send + Sync {
    /// Current commit for the repository containing `dir`, if any
    async fn current_commit(&self, dir: &Path) -> Option<GitCommit>;
}

/// Reads HEAD from the enclosing git repository
#[derive(Debug, Clone, Copy, Default)]
pub struct GitProvenance;

impl GitProvenance {
    pub fn new() -> Self {
        Self
    }

    fn lookup(dir: &Path) -> Result<Option<GitCommit>, git2::Error> {
        let repo = match Repository::discover(dir) {
            Ok(repo) => repo,
            Err(e) if e.code() == ErrorCode::NotFound => {
                debug!("No git repository above {:?}", dir);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let head = match repo.head() {
            Ok(head) => head,
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                debug!("Git repository at {:?} has no commits", repo.path());
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let commit = head.peel_to_commit()?;
        let timestamp = Utc
            .timestamp_opt(commit.time().seconds(), 0)
            .single()
            .ok_or_else(|| git2::Error::from_str("commit time out of range"))?;

        let author = commit.author();
        let author = match (author.name(), author.email()) {
            (Some(name), Some(email)) => Some(format!("{} <{}>", name, email)),
            (Some(name), None) => Some(name.to_string()),
            _ => None,
        };

        Ok(Some(GitCommit {
            commit_hash: commit.id().to_string(),
            timestamp,
            message: commit.message().map(|m| m.trim_end().to_string()),
            author,
        }))
    }
}

#[async_trait]
impl ProvenanceSource for GitProvenance {
    async fn current_commit(&self, dir: &Path) -> Option<GitCommit> {
        let dir: PathBuf = dir.to_path_buf();

        match tokio::task::spawn_blocking(move || Self::lookup(&dir)).await {
            Ok(Ok(commit)) => commit,
            Ok(Err(e)) => {
                warn!("Git provenance lookup failed: {}", e);
                None
            }
            Err(e) => {
                warn!("Git provenance task failed: {}", e);
                None
            }
        }
    }
}
