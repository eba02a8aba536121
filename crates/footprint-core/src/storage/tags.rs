//! Ordered, deduplicated tag sets
//!
//! Tags live in memory as an [`IndexSet`] and are only joined into the
//! comma-delimited column form at the storage edge.

use indexmap::IndexSet;
use serde::{Deserialize, Serialize};

use crate::error::{FootprintError, Result};

/// Separator used in the stored tag column
pub const TAG_SEPARATOR: char = ',';

/// Characters reserved by the tag/id serialization format
pub const RESERVED_CHARS: [char; 3] = ['\0', '\n', TAG_SEPARATOR];

/// Reject labels containing reserved separator characters
pub fn validate_label(kind: &str, value: &str) -> Result<()> {
    if let Some(c) = value.chars().find(|c| RESERVED_CHARS.contains(c)) {
        return Err(FootprintError::InvalidInput(format!(
            "{} {:?} contains reserved character {:?}",
            kind, value, c
        )));
    }
    Ok(())
}

/// Ordered set of tag labels
///
/// Serializes as a plain list. Deserializing goes through [`TagSet::parse`],
/// so the same trimming and reserved-character checks apply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<String>", into = "Vec<String>")]
pub struct TagSet(IndexSet<String>);

impl TagSet {
    /// Create an empty tag set
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tag set from caller input
    ///
    /// Each tag is trimmed and blanks are dropped. Tags containing a
    /// reserved character are rejected.
    pub fn parse<I, S>(tags: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = IndexSet::new();
        for tag in tags {
            let tag = tag.as_ref().trim();
            if tag.is_empty() {
                continue;
            }
            validate_label("Tag", tag)?;
            set.insert(tag.to_string());
        }
        Ok(Self(set))
    }

    /// Decode the stored column value
    pub fn from_storage(value: &str) -> Self {
        Self(
            value
                .split(TAG_SEPARATOR)
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Encode for the stored column; an empty set is stored as NULL
    pub fn to_storage(&self) -> Option<String> {
        if self.0.is_empty() {
            return None;
        }
        Some(
            self.0
                .iter()
                .map(String::as_str)
                .collect::<Vec<_>>()
                .join(&TAG_SEPARATOR.to_string()),
        )
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Exact token membership
    pub fn contains(&self, tag: &str) -> bool {
        self.0.contains(tag)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Add every tag from `other`, keeping first-seen order
    pub fn merge(&mut self, other: &TagSet) {
        for tag in &other.0 {
            self.0.insert(tag.clone());
        }
    }

    /// Remove a tag, keeping the order of the rest
    pub fn remove(&mut self, tag: &str) -> bool {
        self.0.shift_remove(tag)
    }

    /// Replace `old` with `new` in place
    ///
    /// If `new` is already present the old token is simply dropped.
    pub fn rename(&mut self, old: &str, new: &str) -> bool {
        let Some(index) = self.0.get_index_of(old) else {
            return false;
        };

        if self.0.contains(new) {
            self.0.shift_remove_index(index);
        } else {
            self.0.insert(new.to_string());
            let last = self.0.len() - 1;
            self.0.move_index(last, index);
            self.0.shift_remove(old);
        }
        true
    }
}

impl TryFrom<Vec<String>> for TagSet {
    type Error = FootprintError;

    fn try_from(tags: Vec<String>) -> Result<Self> {
        Self::parse(tags)
    }
}

impl From<TagSet> for Vec<String> {
    fn from(tags: TagSet) -> Self {
        tags.0.into_iter().collect()
    }
}

impl<'a> IntoIterator for &'a TagSet {
    type Item = &'a String;
    type IntoIter = indexmap::set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(list: &[&str]) -> TagSet {
        TagSet::parse(list).unwrap()
    }

    #[test]
    fn test_parse_trims_and_dedups() {
        let set = tags(&[" api ", "bug", "api", "", "  "]);
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["api", "bug"]);
    }

    #[test]
    fn test_parse_rejects_reserved_characters() {
        assert!(TagSet::parse(["a,b"]).is_err());
        assert!(TagSet::parse(["a\nb"]).is_err());
        assert!(TagSet::parse(["a\0b"]).is_err());
    }

    #[test]
    fn test_deserialize_validates() {
        let set: TagSet = serde_json::from_str(r#"[" x ", "x", "", "y"]"#).unwrap();
        assert_eq!(set, tags(&["x", "y"]));
        assert_eq!(serde_json::to_string(&set).unwrap(), r#"["x","y"]"#);

        let err = serde_json::from_str::<TagSet>(r#"["a,b"]"#).unwrap_err();
        assert!(err.to_string().contains("reserved character"));
    }

    #[test]
    fn test_storage_edge() {
        let set = tags(&["api", "apigee", "review"]);
        let stored = set.to_storage().unwrap();
        assert_eq!(stored, "api,apigee,review");
        assert_eq!(TagSet::from_storage(&stored), set);

        assert_eq!(TagSet::new().to_storage(), None);
        assert!(TagSet::from_storage("").is_empty());
    }

    #[test]
    fn test_contains_is_exact() {
        let set = tags(&["apigee"]);
        assert!(!set.contains("api"));
        assert!(set.contains("apigee"));
    }

    #[test]
    fn test_merge_is_idempotent() {
        let mut set = tags(&["a"]);
        let extra = tags(&["b"]);
        set.merge(&extra);
        set.merge(&extra);
        assert_eq!(set, tags(&["a", "b"]));
    }

    #[test]
    fn test_rename_keeps_position() {
        let mut set = tags(&["a", "old", "c"]);
        assert!(set.rename("old", "new"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a", "new", "c"]);
    }

    #[test]
    fn test_rename_onto_existing_tag_dedups() {
        let mut set = tags(&["old", "b", "new"]);
        assert!(set.rename("old", "new"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["b", "new"]);
    }

    #[test]
    fn test_rename_missing_is_noop() {
        let mut set = tags(&["a"]);
        assert!(!set.rename("zzz", "new"));
        assert_eq!(set, tags(&["a"]));
    }

    #[test]
    fn test_remove_keeps_order() {
        let mut set = tags(&["a", "b", "c"]);
        assert!(set.remove("b"));
        assert!(!set.remove("b"));
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[test]
    fn test_validate_label() {
        assert!(validate_label("Conversation id", "conv-42").is_ok());
        assert!(validate_label("Conversation id", "conv,42").is_err());
    }
}
