use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use crate::error::Result;
use crate::records::{guids, RESERVED_FOLDERS};
use crate::store::{BookmarkStore, StoredRow};

pub struct ValidationReport {
    integrity: String,
    rows_checked: usize,
    missing_reserved: Vec<String>,
    dangling_parents: Vec<(String, String)>,
    unreachable: Vec<String>,
    duplicate_positions: Vec<(String, i64)>,
    sparse_folders: Vec<String>,
    pending_rows: Vec<(String, String)>,
    parked_orphans: Vec<(String, String)>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self {
            integrity: String::new(),
            rows_checked: 0,
            missing_reserved: Vec::new(),
            dangling_parents: Vec::new(),
            unreachable: Vec::new(),
            duplicate_positions: Vec::new(),
            sparse_folders: Vec::new(),
            pending_rows: Vec::new(),
            parked_orphans: Vec::new(),
        }
    }

    /// Structural problems only; pending and parked rows are expected
    /// between sessions.
    pub fn is_valid(&self) -> bool {
        self.integrity == "ok"
            && self.missing_reserved.is_empty()
            && self.dangling_parents.is_empty()
            && self.unreachable.is_empty()
            && self.duplicate_positions.is_empty()
    }

    pub fn dangling_parents(&self) -> &[(String, String)] {
        &self.dangling_parents
    }

    /// Live rows whose parent chain never reaches the root.
    pub fn unreachable(&self) -> &[String] {
        &self.unreachable
    }

    pub fn duplicate_positions(&self) -> &[(String, i64)] {
        &self.duplicate_positions
    }

    pub fn pending_rows(&self) -> &[(String, String)] {
        &self.pending_rows
    }

    pub fn parked_orphans(&self) -> &[(String, String)] {
        &self.parked_orphans
    }

    pub fn format(&self, detailed: bool) -> String {
        let mut output = String::new();

        output.push_str("\n🔍 Bookmark Store Validation Report\n");
        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n\n");

        output.push_str(&format!("🗄️  SQLite integrity: {}\n", self.integrity));
        output.push_str(&format!("📖 Rows checked: {}\n\n", self.rows_checked));

        if !self.missing_reserved.is_empty() {
            output.push_str("❌ Missing reserved folders:\n");
            for guid in &self.missing_reserved {
                output.push_str(&format!("  • {}\n", guid));
            }
            output.push('\n');
        }

        if !self.dangling_parents.is_empty() {
            output.push_str(&format!(
                "❌ Rows pointing at missing parents: {}\n",
                self.dangling_parents.len()
            ));
            if detailed {
                for (guid, parent) in &self.dangling_parents {
                    output.push_str(&format!("  • {} → {}\n", guid, parent));
                }
            }
            output.push('\n');
        }

        if !self.unreachable.is_empty() {
            output.push_str(&format!(
                "❌ Rows cut off from the root: {}\n",
                self.unreachable.len()
            ));
            if detailed {
                for guid in &self.unreachable {
                    output.push_str(&format!("  • {}\n", guid));
                }
            }
            output.push('\n');
        }

        if !self.duplicate_positions.is_empty() {
            output.push_str("❌ Folders with duplicate positions:\n");
            for (folder, position) in &self.duplicate_positions {
                output.push_str(&format!("  • {} (position {})\n", folder, position));
            }
            output.push('\n');
        }

        if !self.pending_rows.is_empty() {
            output.push_str(&format!(
                "⏳ Rows waiting for their folder order: {}\n",
                self.pending_rows.len()
            ));
            if detailed {
                for (guid, parent) in &self.pending_rows {
                    output.push_str(&format!("  • {} in {}\n", guid, parent));
                }
            }
            output.push('\n');
        }

        if !self.parked_orphans.is_empty() {
            output.push_str(&format!(
                "📦 Rows parked until their parent arrives: {}\n",
                self.parked_orphans.len()
            ));
            if detailed {
                for (guid, requested) in &self.parked_orphans {
                    output.push_str(&format!("  • {} waiting for {}\n", guid, requested));
                }
            }
            output.push('\n');
        }

        if detailed && !self.sparse_folders.is_empty() {
            output.push_str("ℹ️  Folders with position gaps:\n");
            for folder in &self.sparse_folders {
                output.push_str(&format!("  • {}\n", folder));
            }
            output.push('\n');
        }

        output.push_str("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━\n");
        if self.is_valid() {
            output.push_str("\n📊 Summary: ✅ store is consistent\n\n");
        } else {
            output.push_str("\n📊 Summary: ❌ store has structural problems\n\n");
        }

        output
    }
}

impl Default for ValidationReport {
    fn default() -> Self {
        Self::new()
    }
}

/// Check the tree invariants of `store`.
pub fn validate_store(store: &BookmarkStore) -> Result<ValidationReport> {
    let mut report = ValidationReport::new();

    report.integrity = store
        .connection()
        .query_row("PRAGMA quick_check", [], |row| row.get(0))?;

    let rows = store.all_rows()?;
    report.rows_checked = rows.len();
    let by_guid: HashMap<&str, &StoredRow> = rows.iter().map(|r| (r.guid.as_str(), r)).collect();

    for (guid, _, _) in RESERVED_FOLDERS {
        match by_guid.get(guid) {
            Some(row) if !row.deleted && row.kind.is_folder() => {}
            _ => report.missing_reserved.push(guid.to_string()),
        }
    }

    let mut positions: BTreeMap<&str, Vec<i64>> = BTreeMap::new();
    for row in rows.iter().filter(|r| !r.deleted && r.guid != guids::PLACES) {
        let parent_ok = matches!(
            by_guid.get(row.parent.as_str()),
            Some(parent) if !parent.deleted && parent.kind.is_folder()
        );
        if !parent_ok {
            report.dangling_parents.push((row.guid.clone(), row.parent.clone()));
        }
        if let Some(requested) = &row.requested_parent {
            report.parked_orphans.push((row.guid.clone(), requested.clone()));
        }
        match row.position {
            Some(position) => positions.entry(row.parent.as_str()).or_default().push(position),
            None => report.pending_rows.push((row.guid.clone(), row.parent.clone())),
        }
    }

    // Walk down from the root; whatever is left lives in a detached cycle.
    let mut children: HashMap<&str, Vec<&str>> = HashMap::new();
    for row in rows.iter().filter(|r| !r.deleted && r.guid != guids::PLACES) {
        children.entry(row.parent.as_str()).or_default().push(row.guid.as_str());
    }
    let mut reached: HashSet<&str> = HashSet::new();
    let mut queue = VecDeque::from([guids::PLACES]);
    while let Some(guid) = queue.pop_front() {
        if !reached.insert(guid) {
            continue;
        }
        if let Some(kids) = children.get(guid) {
            queue.extend(kids.iter().copied());
        }
    }
    let dangling: HashSet<&str> = report.dangling_parents.iter().map(|(g, _)| g.as_str()).collect();
    for row in rows.iter().filter(|r| !r.deleted) {
        let guid = row.guid.as_str();
        if !reached.contains(guid) && !dangling.contains(guid) {
            report.unreachable.push(row.guid.clone());
        }
    }

    for (folder, mut slots) in positions {
        slots.sort_unstable();
        if let Some(pair) = slots.windows(2).find(|pair| pair[0] == pair[1]) {
            report.duplicate_positions.push((folder.to_string(), pair[0]));
        }
        let contiguous = slots.iter().enumerate().all(|(i, p)| *p == i as i64);
        if !contiguous {
            report.sparse_folders.push(folder.to_string());
        }
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::BookmarkRecord;

    #[test]
    fn test_fresh_store_is_valid() {
        let store = BookmarkStore::open_in_memory().unwrap();
        let report = validate_store(&store).unwrap();
        assert!(report.is_valid());
        assert!(report.format(true).contains("store is consistent"));
    }

    #[test]
    fn test_detects_dangling_parent_and_duplicates() {
        let store = BookmarkStore::open_in_memory().unwrap();
        let a = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "A", "https://a.example/");
        let b = BookmarkRecord::bookmark("bbbbbbbbbbbb", guids::MENU, "B", "https://b.example/");
        let lost = BookmarkRecord::bookmark("cccccccccccc", "nowhereaaaaa", "C", "https://c.example/");
        store.insert(&a, guids::MENU, None, Some(0)).unwrap();
        store.insert(&b, guids::MENU, None, Some(0)).unwrap();
        store.insert(&lost, "nowhereaaaaa", None, Some(0)).unwrap();

        let report = validate_store(&store).unwrap();
        assert!(!report.is_valid());
        assert_eq!(
            report.dangling_parents(),
            &[("cccccccccccc".to_string(), "nowhereaaaaa".to_string())]
        );
        assert_eq!(report.duplicate_positions(), &[(guids::MENU.to_string(), 0)]);
        assert!(report.format(false).contains("structural problems"));
    }

    #[test]
    fn test_detects_detached_cycle() {
        let store = BookmarkStore::open_in_memory().unwrap();
        let x = BookmarkRecord::folder("folderxxxxxx", "folderyyyyyy", "X", &[]);
        let y = BookmarkRecord::folder("folderyyyyyy", "folderxxxxxx", "Y", &[]);
        let leaf = BookmarkRecord::bookmark("leafaaaaaaaa", "folderyyyyyy", "L", "https://l.example/");
        store.insert(&x, "folderyyyyyy", None, Some(0)).unwrap();
        store.insert(&y, "folderxxxxxx", None, Some(0)).unwrap();
        store.insert(&leaf, "folderyyyyyy", None, Some(1)).unwrap();

        let report = validate_store(&store).unwrap();
        assert!(report.dangling_parents().is_empty());
        assert!(!report.is_valid());
        let mut cut_off = report.unreachable().to_vec();
        cut_off.sort();
        assert_eq!(cut_off, vec!["folderxxxxxx", "folderyyyyyy", "leafaaaaaaaa"]);
        assert!(report.format(true).contains("cut off from the root"));
    }

    #[test]
    fn test_pending_rows_are_not_errors() {
        let store = BookmarkStore::open_in_memory().unwrap();
        let a = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "A", "https://a.example/");
        store.insert(&a, guids::MENU, None, None).unwrap();

        let report = validate_store(&store).unwrap();
        assert!(report.is_valid());
        assert_eq!(report.pending_rows().len(), 1);
    }
}
