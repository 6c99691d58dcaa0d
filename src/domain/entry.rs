use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Current version tag of stored entry records.
pub const ENTRY_RECORD_VERSION: u32 = 3;

/// Deletion state of an entry. Stored as `0`, `"trashed"` or `"deleted"` so
/// that it can take part in index keys.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "RawDeleted", into = "RawDeleted")]
pub enum DeletedState {
    #[default]
    No,
    Trashed,
    Deleted,
}

impl DeletedState {
    pub const ALL: [DeletedState; 3] = [DeletedState::No, DeletedState::Trashed, DeletedState::Deleted];

    pub fn to_json(self) -> serde_json::Value {
        match self {
            DeletedState::No => serde_json::json!(0),
            DeletedState::Trashed => serde_json::json!("trashed"),
            DeletedState::Deleted => serde_json::json!("deleted"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawDeleted {
    Int(i64),
    Str(String),
}

impl TryFrom<RawDeleted> for DeletedState {
    type Error = String;

    fn try_from(raw: RawDeleted) -> Result<Self, Self::Error> {
        match raw {
            RawDeleted::Int(0) => Ok(DeletedState::No),
            RawDeleted::Str(s) => s.parse(),
            RawDeleted::Int(other) => Err(format!("invalid deleted state {}", other)),
        }
    }
}

impl From<DeletedState> for RawDeleted {
    fn from(state: DeletedState) -> Self {
        match state {
            DeletedState::No => RawDeleted::Int(0),
            DeletedState::Trashed => RawDeleted::Str("trashed".into()),
            DeletedState::Deleted => RawDeleted::Str("deleted".into()),
        }
    }
}

impl FromStr for DeletedState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "0" | "no" | "none" => Ok(DeletedState::No),
            "trashed" => Ok(DeletedState::Trashed),
            "deleted" => Ok(DeletedState::Deleted),
            other => Err(format!("invalid deleted state {:?}", other)),
        }
    }
}

impl fmt::Display for DeletedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeletedState::No => write!(f, "no"),
            DeletedState::Trashed => write!(f, "trashed"),
            DeletedState::Deleted => write!(f, "deleted"),
        }
    }
}

/// Booleans are stored as 0/1; index keys cannot hold booleans.
pub(crate) mod flag {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(u8::from(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Int(i64),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Bool(b) => b,
            Raw::Int(i) => i != 0,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub id: i64,
    pub feed_id: String,
    /// Publisher-supplied GUID, empty when the feed gave none.
    pub provided_id: String,
    pub entry_url: String,
    pub date: i64,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(with = "flag")]
    pub read: bool,
    #[serde(with = "flag")]
    pub starred: bool,
    pub deleted: DeletedState,
    #[serde(with = "flag")]
    pub marked_unread_on_update: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bookmark_id: Option<i64>,
    pub revisions: Vec<i64>,
    #[serde(rename = "_v")]
    pub version: u32,
}

impl Entry {
    pub fn new(id: i64, feed_id: &str, revision_id: i64) -> Self {
        Self {
            id,
            feed_id: feed_id.to_string(),
            provided_id: String::new(),
            entry_url: String::new(),
            date: 0,
            tags: Vec::new(),
            read: false,
            starred: false,
            deleted: DeletedState::No,
            marked_unread_on_update: false,
            bookmark_id: None,
            revisions: vec![revision_id],
            version: ENTRY_RECORD_VERSION,
        }
    }

    /// The revision currently shown for this entry.
    pub fn current_revision(&self) -> Option<i64> {
        self.revisions.last().copied()
    }
}

/// A content snapshot of an entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Revision {
    pub id: i64,
    pub title: String,
    pub content: String,
    pub authors: Vec<String>,
    /// Publisher-claimed modification time.
    pub updated: i64,
}

impl Revision {
    pub fn display_title(&self) -> &str {
        if self.title.is_empty() {
            "(Untitled)"
        } else {
            &self.title
        }
    }
}

/// An entry together with its current revision.
#[derive(Debug, Clone, PartialEq)]
pub struct FullEntry {
    pub entry: Entry,
    pub revision: Revision,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_state_serializes_as_key_values() {
        assert_eq!(serde_json::to_string(&DeletedState::No).unwrap(), "0");
        assert_eq!(
            serde_json::to_string(&DeletedState::Trashed).unwrap(),
            "\"trashed\""
        );
        let state: DeletedState = serde_json::from_str("\"deleted\"").unwrap();
        assert_eq!(state, DeletedState::Deleted);
        assert!(serde_json::from_str::<DeletedState>("3").is_err());
    }

    #[test]
    fn test_flags_serialize_as_integers() {
        let mut entry = Entry::new(1, "feed", 1);
        entry.read = true;
        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["read"], 1);
        assert_eq!(value["starred"], 0);
        assert_eq!(value["_v"], ENTRY_RECORD_VERSION);
        assert!(value.get("bookmark_id").is_none());
    }

    #[test]
    fn test_flags_accept_legacy_booleans() {
        let json = r#"{"id":1,"feed_id":"f","provided_id":"","entry_url":"","date":5,
            "read":true,"starred":0,"deleted":0,"marked_unread_on_update":0,
            "revisions":[1],"_v":3}"#;
        let entry: Entry = serde_json::from_str(json).unwrap();
        assert!(entry.read);
        assert!(!entry.starred);
        assert!(entry.tags.is_empty());
    }

    #[test]
    fn test_display_title_without_title() {
        let revision = Revision::default();
        assert_eq!(revision.display_title(), "(Untitled)");
    }
}
