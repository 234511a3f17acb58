//! Conflict resolution between incoming records and the local store.
//!
//! Rules, per incoming record:
//! 1. Unknown GUID + tombstone: nothing to do.
//! 2. Unknown GUID + live record: adopt an identical local record under the
//!    incoming GUID if one exists, otherwise insert.
//! 3. Known GUID: the newer `last_modified` wins; ties keep the local copy.
//!    A newer tombstone deletes and moves any children to the orphan folder.
//!
//! Folder orders are collected while records arrive and materialized in
//! [`Reconciler::finish_batch`], so the parent's order wins no matter where
//! the parent sat in the batch.

use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::materializer::materialize;
use crate::records::{is_reserved, now_millis, BookmarkRecord, BookmarkType};
use crate::store::{BookmarkStore, StoredRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Ignore,
    Insert,
    Replace,
    Delete,
    KeepLocal,
}

/// What applying a record did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileAction {
    Inserted,
    Renamed { from: String },
    Updated,
    Deleted,
    KeptLocal,
    Ignored,
}

/// Decide the outcome of storing `incoming` over `local`.
pub fn decide(incoming: &BookmarkRecord, local: Option<&StoredRow>) -> Resolution {
    let Some(local) = local else {
        return if incoming.deleted {
            Resolution::Ignore
        } else {
            Resolution::Insert
        };
    };

    if incoming.last_modified <= local.last_modified {
        return Resolution::KeepLocal;
    }
    if incoming.deleted {
        if is_reserved(&local.guid) {
            return Resolution::KeepLocal;
        }
        return Resolution::Delete;
    }
    Resolution::Replace
}

pub struct Reconciler {
    orphan_folder: String,
    touched: HashSet<String>,
    folder_orders: Vec<(String, Vec<String>)>,
    evacuated: Vec<String>,
    tracked: BTreeSet<String>,
}

impl Reconciler {
    pub fn new(orphan_folder: &str) -> Self {
        Self {
            orphan_folder: orphan_folder.to_string(),
            touched: HashSet::new(),
            folder_orders: Vec::new(),
            evacuated: Vec::new(),
            tracked: BTreeSet::new(),
        }
    }

    pub fn apply(&mut self, store: &BookmarkStore, incoming: &BookmarkRecord) -> Result<ReconcileAction> {
        let local = store.get(&incoming.guid)?;
        let resolution = decide(incoming, local.as_ref());
        debug!("{} -> {:?}", incoming.guid, resolution);

        let action = match (resolution, local) {
            (Resolution::Insert, _) => self.insert(store, incoming)?,
            (Resolution::Replace, Some(local)) => {
                self.replace(store, incoming, &local)?;
                ReconcileAction::Updated
            }
            (Resolution::Delete, Some(local)) => {
                self.delete(store, incoming, &local)?;
                ReconcileAction::Deleted
            }
            (Resolution::KeepLocal, _) => ReconcileAction::KeptLocal,
            _ => ReconcileAction::Ignored,
        };
        Ok(action)
    }

    fn insert(&mut self, store: &BookmarkStore, incoming: &BookmarkRecord) -> Result<ReconcileAction> {
        if let Some(existing) = self.find_duplicate(store, incoming)? {
            info!("🔗 {} matches local {}, adopting incoming GUID", incoming.guid, existing);
            store.rename_guid(&existing, &incoming.guid)?;
            let renamed = store.get_required(&incoming.guid)?;
            let mut merged = incoming.clone();
            merged.last_modified = incoming.last_modified.max(renamed.last_modified);
            self.replace(store, &merged, &renamed)?;
            return Ok(ReconcileAction::Renamed { from: existing });
        }

        let requested = incoming.parent_guid().unwrap_or(self.orphan_folder.as_str());
        if self.can_place(store, &incoming.guid, requested)? {
            store.insert(incoming, requested, None, None)?;
        } else {
            warn!("⚠️  Parent {} of {} unavailable, parking in {}", requested, incoming.guid, self.orphan_folder);
            store.insert(incoming, &self.orphan_folder, Some(requested), None)?;
        }

        if incoming.kind.is_folder() {
            self.adopt_waiting(store, &incoming.guid)?;
            self.queue_order(&incoming.guid, &incoming.children);
        }
        self.touched.insert(incoming.guid.clone());
        Ok(ReconcileAction::Inserted)
    }

    /// A live local record, not yet touched in this batch, whose content is
    /// identical to `incoming`.
    fn find_duplicate(&self, store: &BookmarkStore, incoming: &BookmarkRecord) -> Result<Option<String>> {
        if is_reserved(&incoming.guid) {
            return Ok(None);
        }
        let candidates = store.find_live_by_content_key(&incoming.content_key())?;
        Ok(candidates
            .into_iter()
            .find(|guid| *guid != incoming.guid && !self.touched.contains(guid)))
    }

    fn replace(&mut self, store: &BookmarkStore, incoming: &BookmarkRecord, local: &StoredRow) -> Result<()> {
        let mut record = incoming.clone();
        let reserved = is_reserved(&local.guid);
        if reserved {
            record.kind = BookmarkType::Folder;
            record.bookmark_uri = None;
        }

        if local.kind.is_folder() && !local.deleted && !record.kind.is_folder() {
            self.evacuate(store, &local.guid)?;
        }
        store.update_content(&record)?;

        if !reserved {
            let requested = record.parent_guid().unwrap_or(self.orphan_folder.as_str());
            let current = local.requested_parent.as_deref().unwrap_or(local.parent.as_str());
            if local.deleted || requested != current {
                if self.can_place(store, &record.guid, requested)? {
                    store.set_parent(&record.guid, requested, None, None)?;
                } else {
                    warn!("⚠️  Parent {} of {} unavailable, parking in {}", requested, record.guid, self.orphan_folder);
                    store.set_parent(&record.guid, &self.orphan_folder, Some(requested), None)?;
                }
            }
        }

        if record.kind.is_folder() {
            self.adopt_waiting(store, &record.guid)?;
            self.queue_order(&record.guid, &record.children);
        }
        self.touched.insert(record.guid.clone());
        Ok(())
    }

    fn delete(&mut self, store: &BookmarkStore, incoming: &BookmarkRecord, local: &StoredRow) -> Result<()> {
        if local.kind.is_folder() && !local.deleted {
            self.evacuate(store, &local.guid)?;
        }
        store.mark_deleted(&local.guid, incoming.last_modified)?;
        self.folder_orders.retain(|(folder, _)| *folder != local.guid);
        self.touched.insert(local.guid.clone());
        Ok(())
    }

    /// Move every live child of `folder` to the end of the orphan folder.
    /// Timestamps are advanced in `finish_batch`, so a child tombstone
    /// later in the same batch still compares against the original time.
    fn evacuate(&mut self, store: &BookmarkStore, folder: &str) -> Result<()> {
        for child in store.rows_with_parent(folder)? {
            debug!("moving {} out of {} to {}", child, folder, self.orphan_folder);
            store.append_to_folder(&self.orphan_folder, &child)?;
            self.evacuated.push(child);
        }
        Ok(())
    }

    /// `requested` must be a live folder that does not sit inside `guid`.
    fn can_place(&self, store: &BookmarkStore, guid: &str, requested: &str) -> Result<bool> {
        Ok(store.is_live_folder(requested)? && !store.is_ancestor(guid, requested)?)
    }

    fn adopt_waiting(&mut self, store: &BookmarkStore, folder: &str) -> Result<()> {
        for child in store.waiting_for(folder)? {
            if store.is_ancestor(&child, folder)? {
                warn!("⚠️  {} would become its own ancestor under {}, leaving it parked", child, folder);
                continue;
            }
            debug!("{} arrived, adopting parked {}", folder, child);
            store.set_parent(&child, folder, None, None)?;
        }
        Ok(())
    }

    fn queue_order(&mut self, folder: &str, children: &[String]) {
        self.folder_orders.retain(|(queued, _)| queued != folder);
        self.folder_orders.push((folder.to_string(), children.to_vec()));
    }

    /// Materialize queued folder orders and settle evacuated children.
    /// Returns the tracked GUIDs accumulated so far.
    pub fn finish_batch(&mut self, store: &BookmarkStore) -> Result<BTreeSet<String>> {
        for (folder, order) in std::mem::take(&mut self.folder_orders) {
            if !store.is_live_folder(&folder)? {
                continue;
            }
            if materialize(store, &folder, &order)?.changed {
                self.tracked.insert(folder);
            }
        }

        let mut moved = false;
        for guid in std::mem::take(&mut self.evacuated) {
            let Some(row) = store.get(&guid)? else {
                continue;
            };
            if row.deleted || row.parent != self.orphan_folder || row.requested_parent.is_some() {
                continue;
            }
            store.touch(&guid, now_millis().max(row.last_modified + 1))?;
            self.tracked.insert(guid);
            moved = true;
        }
        if moved {
            let orphan = store.get_required(&self.orphan_folder)?;
            store.touch(&self.orphan_folder, now_millis().max(orphan.last_modified + 1))?;
            self.tracked.insert(self.orphan_folder.clone());
        }

        Ok(self.tracked.clone())
    }
}
