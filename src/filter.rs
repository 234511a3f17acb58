//! Records inside excluded subtrees (pinned items, tags) never take part
//! in synchronization, in either direction.

use std::collections::HashSet;

use crate::records::{guids, BookmarkRecord};

#[derive(Debug, Clone)]
pub struct IgnoreFilter {
    ignored: HashSet<String>,
}

impl IgnoreFilter {
    pub fn new<I, S>(guids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ignored: guids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn should_ignore_guid(&self, guid: &str, parent: Option<&str>) -> bool {
        self.ignored.contains(guid) || parent.is_some_and(|p| self.ignored.contains(p))
    }

    /// Tombstones carry no parent, so only their own GUID is checked.
    pub fn should_ignore(&self, record: &BookmarkRecord) -> bool {
        self.should_ignore_guid(&record.guid, record.parent_guid())
    }
}

impl Default for IgnoreFilter {
    fn default() -> Self {
        Self::new([guids::PINNED, guids::TAGS])
    }
}
