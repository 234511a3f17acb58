//! SQLite-backed record store.
//!
//! One row per GUID. Rows point at their parent by GUID and carry a
//! nullable `position`: `NULL` means the row belongs to the folder but has
//! not been placed in the folder's materialized order yet.

use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::Path;
use tracing::debug;

use crate::error::{RepositoryError, Result};
use crate::records::{guids, is_reserved, BookmarkRecord, BookmarkType, RESERVED_FOLDERS};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS bookmarks (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        guid TEXT NOT NULL UNIQUE,
        kind TEXT NOT NULL,
        parent TEXT NOT NULL,
        requested_parent TEXT,
        title TEXT,
        uri TEXT,
        description TEXT,
        position INTEGER,
        sort_index INTEGER NOT NULL DEFAULT 0,
        pos INTEGER,
        last_modified INTEGER NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        content_key TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_bookmarks_parent ON bookmarks(parent, position);
    CREATE INDEX IF NOT EXISTS idx_bookmarks_modified ON bookmarks(last_modified);
    CREATE INDEX IF NOT EXISTS idx_bookmarks_content ON bookmarks(content_key);
    CREATE INDEX IF NOT EXISTS idx_bookmarks_requested ON bookmarks(requested_parent);
";

const COLUMNS: &str = "guid, kind, parent, requested_parent, title, uri, description, \
                       position, sort_index, pos, last_modified, deleted, content_key";

/// A row as persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub guid: String,
    pub kind: BookmarkType,
    pub parent: String,
    /// Parent named by the record when that folder did not exist yet.
    pub requested_parent: Option<String>,
    pub title: Option<String>,
    pub uri: Option<String>,
    pub description: Option<String>,
    pub position: Option<i64>,
    pub sort_index: i64,
    pub pos: Option<i64>,
    pub last_modified: i64,
    pub deleted: bool,
    pub content_key: String,
}

impl StoredRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        let kind: String = row.get(1)?;
        Ok(Self {
            guid: row.get(0)?,
            kind: BookmarkType::from_name(&kind).unwrap_or(BookmarkType::Item),
            parent: row.get(2)?,
            requested_parent: row.get(3)?,
            title: row.get(4)?,
            uri: row.get(5)?,
            description: row.get(6)?,
            position: row.get(7)?,
            sort_index: row.get(8)?,
            pos: row.get(9)?,
            last_modified: row.get(10)?,
            deleted: row.get::<_, i64>(11)? != 0,
            content_key: row.get(12)?,
        })
    }
}

pub struct BookmarkStore {
    conn: Connection,
}

impl BookmarkStore {
    /// Opens (or creates) a store at `path`, creating the schema and the
    /// reserved folders when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        self.seed_reserved()
    }

    fn seed_reserved(&self) -> Result<()> {
        let mut position = 0i64;
        for (guid, parent, title) in RESERVED_FOLDERS {
            let record = BookmarkRecord::folder(guid, parent, title, &[]).with_modified(0);
            // The root sits outside every folder order.
            let slot = if *guid == guids::PLACES {
                None
            } else {
                position += 1;
                Some(position - 1)
            };
            self.conn.execute(
                "INSERT OR IGNORE INTO bookmarks
                 (guid, kind, parent, title, position, last_modified, content_key)
                 VALUES (?1, 'folder', ?2, ?3, ?4, 0, ?5)",
                params![guid, parent, title, slot, record.content_key()],
            )?;
        }
        Ok(())
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn get(&self, guid: &str) -> Result<Option<StoredRow>> {
        let sql = format!("SELECT {} FROM bookmarks WHERE guid = ?1", COLUMNS);
        let row = self
            .conn
            .query_row(&sql, params![guid], StoredRow::from_row)
            .optional()?;
        Ok(row)
    }

    /// Like [`get`](Self::get), for rows that must exist.
    pub fn get_required(&self, guid: &str) -> Result<StoredRow> {
        self.get(guid)?
            .ok_or_else(|| RepositoryError::NullCursor(guid.to_string()))
    }

    pub fn is_live_folder(&self, guid: &str) -> Result<bool> {
        Ok(matches!(
            self.get(guid)?,
            Some(row) if !row.deleted && row.kind.is_folder()
        ))
    }

    /// True when `guid` is `node` itself or one of its ancestors.
    pub fn is_ancestor(&self, guid: &str, node: &str) -> Result<bool> {
        let mut seen = HashSet::new();
        let mut current = node.to_string();
        loop {
            if current == guid {
                return Ok(true);
            }
            if !seen.insert(current.clone()) {
                return Ok(false);
            }
            match self.get(&current)? {
                Some(row) if row.parent != current => current = row.parent,
                _ => return Ok(false),
            }
        }
    }

    pub fn title_of(&self, guid: &str) -> Result<Option<String>> {
        let title = self
            .conn
            .query_row(
                "SELECT title FROM bookmarks WHERE guid = ?1",
                params![guid],
                |row| row.get::<_, Option<String>>(0),
            )
            .optional()?;
        Ok(title.flatten())
    }

    pub fn insert(
        &self,
        record: &BookmarkRecord,
        parent: &str,
        requested_parent: Option<&str>,
        position: Option<i64>,
    ) -> Result<()> {
        debug!("insert {} under {} (requested {:?})", record.guid, parent, requested_parent);
        self.conn.execute(
            "INSERT INTO bookmarks
             (guid, kind, parent, requested_parent, title, uri, description,
              position, sort_index, pos, last_modified, deleted, content_key)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, 0, ?12)",
            params![
                record.guid,
                record.kind.name(),
                parent,
                requested_parent,
                record.title,
                record.bookmark_uri,
                record.description,
                position,
                record.sort_index,
                record.pos,
                record.last_modified,
                record.content_key(),
            ],
        )?;
        Ok(())
    }

    /// Overwrite content in place. Parent and position are left alone and
    /// a tombstoned row comes back to life.
    pub fn update_content(&self, record: &BookmarkRecord) -> Result<()> {
        debug!("update {}", record.guid);
        let affected = self.conn.execute(
            "UPDATE bookmarks SET kind = ?1, title = ?2, uri = ?3, description = ?4,
                 sort_index = ?5, pos = ?6, last_modified = ?7, deleted = 0, content_key = ?8
             WHERE guid = ?9",
            params![
                record.kind.name(),
                record.title,
                record.bookmark_uri,
                record.description,
                record.sort_index,
                record.pos,
                record.last_modified,
                record.content_key(),
                record.guid,
            ],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NullCursor(record.guid.clone()));
        }
        Ok(())
    }

    pub fn set_parent(
        &self,
        guid: &str,
        parent: &str,
        requested_parent: Option<&str>,
        position: Option<i64>,
    ) -> Result<()> {
        debug!("reparent {} -> {} at {:?}", guid, parent, position);
        self.conn.execute(
            "UPDATE bookmarks SET parent = ?1, requested_parent = ?2, position = ?3 WHERE guid = ?4",
            params![parent, requested_parent, position, guid],
        )?;
        Ok(())
    }

    /// Append `guid` to the end of `folder`'s materialized order.
    pub fn append_to_folder(&self, folder: &str, guid: &str) -> Result<i64> {
        let position: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(position), -1) + 1 FROM bookmarks
             WHERE parent = ?1 AND deleted = 0 AND guid != ?2 AND guid != parent",
            params![folder, guid],
            |row| row.get(0),
        )?;
        self.set_parent(guid, folder, None, Some(position))?;
        Ok(position)
    }

    pub fn touch(&self, guid: &str, last_modified: i64) -> Result<()> {
        self.conn.execute(
            "UPDATE bookmarks SET last_modified = ?1 WHERE guid = ?2",
            params![last_modified, guid],
        )?;
        Ok(())
    }

    /// Give an existing row a new GUID, carrying every reference along.
    pub fn rename_guid(&self, old: &str, new: &str) -> Result<()> {
        debug!("rename {} -> {}", old, new);
        let tx = self.conn.unchecked_transaction()?;
        let affected = tx.execute(
            "UPDATE bookmarks SET guid = ?1 WHERE guid = ?2",
            params![new, old],
        )?;
        if affected == 0 {
            return Err(RepositoryError::NullCursor(old.to_string()));
        }
        tx.execute(
            "UPDATE bookmarks SET parent = ?1 WHERE parent = ?2",
            params![new, old],
        )?;
        tx.execute(
            "UPDATE bookmarks SET requested_parent = ?1 WHERE requested_parent = ?2",
            params![new, old],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Turn a row into a tombstone. The row itself stays so the deletion
    /// can propagate.
    pub fn mark_deleted(&self, guid: &str, last_modified: i64) -> Result<()> {
        debug!("tombstone {}", guid);
        self.conn.execute(
            "UPDATE bookmarks SET deleted = 1, last_modified = ?1, position = NULL,
                 requested_parent = NULL, title = NULL, uri = NULL, description = NULL
             WHERE guid = ?2",
            params![last_modified, guid],
        )?;
        Ok(())
    }

    /// Live, non-reserved rows sharing `content_key`, oldest first.
    pub fn find_live_by_content_key(&self, content_key: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT guid FROM bookmarks WHERE content_key = ?1 AND deleted = 0 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![content_key], |row| row.get::<_, String>(0))?;
        let mut found = Vec::new();
        for guid in rows {
            let guid = guid?;
            if !is_reserved(&guid) {
                found.push(guid);
            }
        }
        Ok(found)
    }

    fn guids_where(&self, sql: &str, folder: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![folder], |row| row.get::<_, String>(0))?;
        let mut guids = Vec::new();
        for guid in rows {
            guids.push(guid?);
        }
        Ok(guids)
    }

    /// The materialized order of `folder`: live children with a position.
    pub fn children_of(&self, folder: &str) -> Result<Vec<String>> {
        self.guids_where(
            "SELECT guid FROM bookmarks
             WHERE parent = ?1 AND deleted = 0 AND position IS NOT NULL AND guid != parent
             ORDER BY position, id",
            folder,
        )
    }

    /// Every live row pointing at `folder`: positioned rows first, then
    /// pending ones in arrival order.
    pub fn rows_with_parent(&self, folder: &str) -> Result<Vec<String>> {
        self.guids_where(
            "SELECT guid FROM bookmarks
             WHERE parent = ?1 AND deleted = 0 AND guid != parent
             ORDER BY position IS NULL, position, id",
            folder,
        )
    }

    /// Rows parked elsewhere until `parent` arrives.
    pub fn waiting_for(&self, parent: &str) -> Result<Vec<String>> {
        self.guids_where(
            "SELECT guid FROM bookmarks
             WHERE requested_parent = ?1 AND deleted = 0
             ORDER BY id",
            parent,
        )
    }

    /// Write zero-based positions for `order` inside `folder`.
    pub fn set_positions(&self, folder: &str, order: &[String]) -> Result<()> {
        let tx = self.conn.unchecked_transaction()?;
        {
            let mut stmt =
                tx.prepare("UPDATE bookmarks SET position = ?1 WHERE guid = ?2 AND parent = ?3")?;
            for (index, guid) in order.iter().enumerate() {
                stmt.execute(params![index as i64, guid, folder])?;
            }
        }
        tx.commit()?;
        debug!("positioned {} children of {}", order.len(), folder);
        Ok(())
    }

    fn rows_where(&self, clause: &str, value: i64) -> Result<Vec<StoredRow>> {
        let sql = format!("SELECT {} FROM bookmarks WHERE {} ORDER BY id", COLUMNS, clause);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params![value], StoredRow::from_row)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row?);
        }
        Ok(result)
    }

    /// Rows (tombstones included) modified at or after `timestamp`.
    pub fn modified_since(&self, timestamp: i64) -> Result<Vec<StoredRow>> {
        self.rows_where("last_modified >= ?1", timestamp)
    }

    pub fn all_rows(&self) -> Result<Vec<StoredRow>> {
        self.rows_where("?1 = ?1", 0)
    }

    /// Remove every non-reserved row.
    pub fn wipe(&self) -> Result<usize> {
        let placeholders = RESERVED_FOLDERS
            .iter()
            .map(|(guid, _, _)| format!("'{}'", guid))
            .collect::<Vec<_>>()
            .join(", ");
        let removed = self.conn.execute(
            &format!("DELETE FROM bookmarks WHERE guid NOT IN ({})", placeholders),
            [],
        )?;
        debug!("wiped {} rows", removed);
        Ok(removed)
    }

    /// Rebuild the record a peer would see for `row`.
    pub fn to_record(&self, row: &StoredRow) -> Result<BookmarkRecord> {
        if row.deleted {
            return Ok(BookmarkRecord::tombstone(&row.guid, row.last_modified));
        }
        let children = if row.kind.is_folder() {
            self.rows_with_parent(&row.guid)?
        } else {
            Vec::new()
        };
        let mut record = BookmarkRecord::folder(&row.guid, &row.parent, "", &[]);
        record.kind = row.kind;
        record.parent_name = self.title_of(&row.parent)?;
        record.title = row.title.clone();
        record.bookmark_uri = row.uri.clone();
        record.description = row.description.clone();
        record.children = children;
        record.sort_index = row.sort_index;
        record.pos = row.pos;
        record.last_modified = row.last_modified;
        Ok(record)
    }
}
