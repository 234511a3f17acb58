//! Bookmark records as exchanged with the sync server.
//!
//! The JSON form follows the Sync bookmark payload (`id`, `type`,
//! `parentid`, `bmkUri`, ...), so batches captured from a server can be
//! deserialized directly.

use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::sync::OnceLock;

use crate::error::{RepositoryError, Result};

pub const BOOKMARKS_COLLECTION: &str = "bookmarks";

/// Reserved folder GUIDs. These always exist and keep their identity.
pub mod guids {
    pub const PLACES: &str = "places";
    pub const MENU: &str = "menu";
    pub const TOOLBAR: &str = "toolbar";
    pub const UNFILED: &str = "unfiled";
    pub const MOBILE: &str = "mobile";
    pub const TAGS: &str = "tags";
    pub const PINNED: &str = "pinned";
}

/// Reserved folders with their fixed parent and title, in seeding order.
pub const RESERVED_FOLDERS: &[(&str, &str, &str)] = &[
    (guids::PLACES, guids::PLACES, ""),
    (guids::MENU, guids::PLACES, "Bookmarks Menu"),
    (guids::TOOLBAR, guids::PLACES, "Bookmarks Toolbar"),
    (guids::UNFILED, guids::PLACES, "Other Bookmarks"),
    (guids::MOBILE, guids::PLACES, "Mobile Bookmarks"),
    (guids::TAGS, guids::PLACES, "Tags"),
    (guids::PINNED, guids::PLACES, "Pinned"),
];

pub fn is_reserved(guid: &str) -> bool {
    RESERVED_FOLDERS.iter().any(|(g, _, _)| *g == guid)
}

/// Fixed parent of a reserved folder.
pub fn reserved_parent(guid: &str) -> Option<&'static str> {
    RESERVED_FOLDERS
        .iter()
        .find(|(g, _, _)| *g == guid)
        .map(|(_, parent, _)| *parent)
}

fn guid_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[A-Za-z0-9_\-]{1,64}$").expect("static regex"))
}

pub fn is_valid_guid(guid: &str) -> bool {
    guid_pattern().is_match(guid)
}

/// Generate a 12 character GUID for a locally created record.
pub fn generate_guid() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..12].to_string()
}

/// Current time in milliseconds since the epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Common surface of every synced record.
pub trait Record {
    fn guid(&self) -> &str;
    fn collection(&self) -> &str;
    fn last_modified(&self) -> i64;
    fn is_deleted(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BookmarkType {
    #[default]
    Bookmark,
    Microsummary,
    Query,
    Folder,
    Livemark,
    Separator,
    Item,
}

impl BookmarkType {
    pub fn name(&self) -> &'static str {
        match self {
            BookmarkType::Bookmark => "bookmark",
            BookmarkType::Microsummary => "microsummary",
            BookmarkType::Query => "query",
            BookmarkType::Folder => "folder",
            BookmarkType::Livemark => "livemark",
            BookmarkType::Separator => "separator",
            BookmarkType::Item => "item",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bookmark" => Some(BookmarkType::Bookmark),
            "microsummary" => Some(BookmarkType::Microsummary),
            "query" => Some(BookmarkType::Query),
            "folder" => Some(BookmarkType::Folder),
            "livemark" => Some(BookmarkType::Livemark),
            "separator" => Some(BookmarkType::Separator),
            "item" => Some(BookmarkType::Item),
            _ => None,
        }
    }

    pub fn is_folder(&self) -> bool {
        matches!(self, BookmarkType::Folder)
    }
}

fn default_collection() -> String {
    BOOKMARKS_COLLECTION.to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A bookmark, folder or separator record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkRecord {
    #[serde(rename = "id")]
    pub guid: String,
    #[serde(skip, default = "default_collection")]
    pub collection: String,
    #[serde(rename = "modified", default)]
    pub last_modified: i64,
    #[serde(default, skip_serializing_if = "is_false")]
    pub deleted: bool,
    #[serde(rename = "type", default)]
    pub kind: BookmarkType,
    #[serde(rename = "parentid", default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_name: Option<String>,
    #[serde(rename = "bmkUri", default, skip_serializing_if = "Option::is_none")]
    pub bookmark_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<String>,
    #[serde(rename = "sortindex", default)]
    pub sort_index: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<i64>,
}

impl BookmarkRecord {
    fn base(guid: &str, kind: BookmarkType, parent: &str) -> Self {
        Self {
            guid: guid.to_string(),
            collection: default_collection(),
            last_modified: now_millis(),
            deleted: false,
            kind,
            parent_id: Some(parent.to_string()),
            parent_name: None,
            bookmark_uri: None,
            title: None,
            description: None,
            children: Vec::new(),
            sort_index: 0,
            pos: None,
        }
    }

    pub fn bookmark(guid: &str, parent: &str, title: &str, uri: &str) -> Self {
        let mut record = Self::base(guid, BookmarkType::Bookmark, parent);
        record.title = Some(title.to_string());
        record.bookmark_uri = Some(uri.to_string());
        record
    }

    pub fn folder(guid: &str, parent: &str, title: &str, children: &[&str]) -> Self {
        let mut record = Self::base(guid, BookmarkType::Folder, parent);
        record.title = Some(title.to_string());
        record.children = children.iter().map(|c| c.to_string()).collect();
        record
    }

    pub fn separator(guid: &str, parent: &str, pos: i64) -> Self {
        let mut record = Self::base(guid, BookmarkType::Separator, parent);
        record.pos = Some(pos);
        record
    }

    pub fn tombstone(guid: &str, last_modified: i64) -> Self {
        let mut record = Self::base(guid, BookmarkType::Bookmark, "");
        record.parent_id = None;
        record.deleted = true;
        record.last_modified = last_modified;
        record
    }

    pub fn with_modified(mut self, last_modified: i64) -> Self {
        self.last_modified = last_modified;
        self
    }

    pub fn with_parent_name(mut self, parent_name: &str) -> Self {
        self.parent_name = Some(parent_name.to_string());
        self
    }

    pub fn with_children(mut self, children: &[&str]) -> Self {
        self.children = children.iter().map(|c| c.to_string()).collect();
        self
    }

    pub fn with_sort_index(mut self, sort_index: i64) -> Self {
        self.sort_index = sort_index;
        self
    }

    pub fn parent_guid(&self) -> Option<&str> {
        self.parent_id.as_deref()
    }

    /// Reject records that can never be applied.
    pub fn validate(&self) -> Result<()> {
        if !is_valid_guid(&self.guid) {
            return Err(RepositoryError::InvalidArgument(format!(
                "invalid guid {:?}",
                self.guid
            )));
        }
        if self.collection != BOOKMARKS_COLLECTION {
            return Err(RepositoryError::InvalidArgument(format!(
                "record {} belongs to collection {:?}",
                self.guid, self.collection
            )));
        }
        if self.last_modified < 0 {
            return Err(RepositoryError::InvalidArgument(format!(
                "record {} has negative timestamp",
                self.guid
            )));
        }
        if self.deleted {
            return Ok(());
        }

        match self.parent_id.as_deref() {
            Some(parent) if parent == self.guid && !is_reserved(parent) => {
                return Err(RepositoryError::InvalidArgument(format!(
                    "record {} is its own parent",
                    self.guid
                )))
            }
            Some(parent) if is_valid_guid(parent) => {}
            Some(parent) => {
                return Err(RepositoryError::InvalidArgument(format!(
                    "record {} has invalid parent {:?}",
                    self.guid, parent
                )))
            }
            None => {
                return Err(RepositoryError::InvalidArgument(format!(
                    "record {} has no parent",
                    self.guid
                )))
            }
        }

        if self.kind.is_folder() && self.bookmark_uri.is_some() {
            return Err(RepositoryError::InvalidArgument(format!(
                "folder {} carries a URI",
                self.guid
            )));
        }
        if !self.kind.is_folder() && !self.children.is_empty() {
            return Err(RepositoryError::InvalidArgument(format!(
                "{} {} carries children",
                self.kind.name(),
                self.guid
            )));
        }
        if self.kind == BookmarkType::Bookmark && self.bookmark_uri.is_none() {
            return Err(RepositoryError::InvalidArgument(format!(
                "bookmark {} has no URI",
                self.guid
            )));
        }
        Ok(())
    }

    /// Digest of everything that makes two records "the same bookmark"
    /// apart from their GUIDs.
    pub fn content_key(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.kind.name().as_bytes());
        for field in [&self.bookmark_uri, &self.title, &self.parent_name] {
            hasher.update([0u8]);
            if let Some(value) = field {
                hasher.update(value.as_bytes());
            }
        }
        if self.kind == BookmarkType::Separator {
            hasher.update([0u8]);
            hasher.update(self.pos.unwrap_or(-1).to_le_bytes());
        }
        format!("{:x}", hasher.finalize())
    }
}

impl Record for BookmarkRecord {
    fn guid(&self) -> &str {
        &self.guid
    }

    fn collection(&self) -> &str {
        &self.collection
    }

    fn last_modified(&self) -> i64 {
        self.last_modified
    }

    fn is_deleted(&self) -> bool {
        self.deleted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_deserialize() {
        let json = r#"{
            "id": "abcdefghijkl",
            "type": "bookmark",
            "parentid": "toolbar",
            "parentName": "Bookmarks Toolbar",
            "bmkUri": "https://example.com/",
            "title": "Example",
            "sortindex": 140,
            "modified": 1700000000000
        }"#;
        let record: BookmarkRecord = serde_json::from_str(json).unwrap();
        assert_eq!(record.guid, "abcdefghijkl");
        assert_eq!(record.kind, BookmarkType::Bookmark);
        assert_eq!(record.parent_guid(), Some("toolbar"));
        assert_eq!(record.bookmark_uri.as_deref(), Some("https://example.com/"));
        assert_eq!(record.sort_index, 140);
        assert_eq!(record.collection, BOOKMARKS_COLLECTION);
        assert!(!record.deleted);
        record.validate().unwrap();
    }

    #[test]
    fn test_tombstone_payload() {
        let record: BookmarkRecord =
            serde_json::from_str(r#"{"id": "abcdefghijkl", "deleted": true}"#).unwrap();
        assert!(record.is_deleted());
        record.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_malformed() {
        let mut folder = BookmarkRecord::folder("folderaaaaaa", guids::MENU, "F", &[]);
        folder.bookmark_uri = Some("https://example.com".to_string());
        assert!(matches!(
            folder.validate(),
            Err(RepositoryError::InvalidArgument(_))
        ));

        let leaf = BookmarkRecord::bookmark("leafaaaaaaaa", guids::MENU, "L", "https://a.com")
            .with_children(&["x"]);
        assert!(leaf.validate().is_err());

        let bad_guid = BookmarkRecord::bookmark("", guids::MENU, "L", "https://a.com");
        assert!(bad_guid.validate().is_err());

        let mut orphan = BookmarkRecord::bookmark("leafbbbbbbbb", guids::MENU, "L", "https://a.com");
        orphan.parent_id = None;
        assert!(orphan.validate().is_err());

        let mut foreign = BookmarkRecord::bookmark("leafcccccccc", guids::MENU, "L", "https://a.com");
        foreign.collection = "passwords".to_string();
        assert!(foreign.validate().is_err());

        let looped = BookmarkRecord::folder("loopaaaaaaaa", "loopaaaaaaaa", "L", &[]);
        assert!(looped.validate().is_err());
        assert!(BookmarkRecord::folder(guids::PLACES, guids::PLACES, "", &[]).validate().is_ok());
    }

    #[test]
    fn test_content_key_ignores_guid() {
        let a = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "T", "https://t.com")
            .with_parent_name("Bookmarks Menu");
        let b = BookmarkRecord::bookmark("bbbbbbbbbbbb", guids::MENU, "T", "https://t.com")
            .with_parent_name("Bookmarks Menu");
        let c = BookmarkRecord::bookmark("cccccccccccc", guids::MENU, "T2", "https://t.com")
            .with_parent_name("Bookmarks Menu");
        assert_eq!(a.content_key(), b.content_key());
        assert_ne!(a.content_key(), c.content_key());
    }

    #[test]
    fn test_reserved_guids() {
        assert!(is_reserved(guids::UNFILED));
        assert!(!is_reserved("abcdefghijkl"));
        assert_eq!(reserved_parent(guids::TOOLBAR), Some(guids::PLACES));
        assert_eq!(BookmarkType::from_name("folder"), Some(BookmarkType::Folder));
    }

    #[test]
    fn test_generated_guid_is_valid() {
        let guid = generate_guid();
        assert_eq!(guid.len(), 12);
        assert!(is_valid_guid(&guid));
    }
}

#[cfg(test)]
mod property_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        #[test]
        fn prop_generated_style_guids_validate(guid in "[A-Za-z0-9_-]{12}") {
            prop_assert!(is_valid_guid(&guid));
        }

        #[test]
        fn prop_content_key_stable_across_guids(
            title in "[a-zA-Z ]{0,20}",
            path in "[a-z]{1,10}",
        ) {
            let uri = format!("https://{}.example/", path);
            let a = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, &title, &uri);
            let b = BookmarkRecord::bookmark("bbbbbbbbbbbb", guids::MENU, &title, &uri);
            prop_assert_eq!(a.content_key(), b.content_key());
        }
    }
}
