//! Repository sessions: the begin → store* → store_done → finish unit of
//! work, plus the read operations a sync driver needs.

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::error::{RepositoryError, Result};
use crate::filter::IgnoreFilter;
use crate::reconciler::{ReconcileAction, Reconciler};
use crate::records::{now_millis, BookmarkRecord};
use crate::store::{BookmarkStore, StoredRow};

/// Receives the outcome of each `store` call.
pub trait StoreDelegate: Send {
    fn on_record_store_succeeded(&mut self, guid: &str);
    fn on_record_store_failed(&mut self, error: &RepositoryError, guid: &str);
    fn on_store_completed(&mut self, end_timestamp: i64);
}

/// What a [`CollectingDelegate`] saw.
#[derive(Debug, Default, Clone)]
pub struct StoreReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
    pub completed_at: Option<i64>,
}

/// Delegate that records every callback into a shared [`StoreReport`].
#[derive(Debug, Default, Clone)]
pub struct CollectingDelegate {
    report: Arc<Mutex<StoreReport>>,
}

impl CollectingDelegate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn report(&self) -> StoreReport {
        self.report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn with_report(&self, f: impl FnOnce(&mut StoreReport)) {
        let mut report = self
            .report
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut report);
    }
}

impl StoreDelegate for CollectingDelegate {
    fn on_record_store_succeeded(&mut self, guid: &str) {
        self.with_report(|r| r.succeeded.push(guid.to_string()));
    }

    fn on_record_store_failed(&mut self, error: &RepositoryError, guid: &str) {
        self.with_report(|r| r.failed.push((guid.to_string(), error.to_string())));
    }

    fn on_store_completed(&mut self, end_timestamp: i64) {
        self.with_report(|r| r.completed_at = Some(end_timestamp));
    }
}

/// Cooperative cancellation for long fetches.
#[derive(Debug, Clone, Default)]
pub struct CancellationSignal {
    cancelled: Arc<AtomicBool>,
    /// Checks left before the signal trips on its own.
    #[cfg(test)]
    trip_after: Option<Arc<std::sync::atomic::AtomicUsize>>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.count_check();
        self.cancelled.load(Ordering::SeqCst)
    }

    #[cfg(test)]
    fn cancelled_after(checks: usize) -> Self {
        Self {
            cancelled: Arc::default(),
            trip_after: Some(Arc::new(std::sync::atomic::AtomicUsize::new(checks))),
        }
    }

    #[cfg(test)]
    fn count_check(&self) {
        if let Some(remaining) = &self.trip_after {
            let spent = remaining
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_err();
            if spent {
                self.cancel();
            }
        }
    }

    #[cfg(not(test))]
    fn count_check(&self) {}
}

fn check_cancelled(signal: Option<&CancellationSignal>) -> Result<()> {
    match signal {
        Some(signal) if signal.is_cancelled() => Err(RepositoryError::Cancelled),
        _ => Ok(()),
    }
}

fn lock_store(store: &Mutex<BookmarkStore>) -> MutexGuard<'_, BookmarkStore> {
    store.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Unstarted,
    Active,
    Finished,
}

impl SessionState {
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unstarted => "unstarted",
            SessionState::Active => "active",
            SessionState::Finished => "finished",
        }
    }
}

/// Per-session counters, returned by [`RepositorySession::finish`].
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub renamed: usize,
    pub kept_local: usize,
    pub ignored: usize,
    pub failed: usize,
}

impl SessionStats {
    fn count(&mut self, action: &ReconcileAction) {
        match action {
            ReconcileAction::Inserted => self.inserted += 1,
            ReconcileAction::Renamed { .. } => self.renamed += 1,
            ReconcileAction::Updated => self.updated += 1,
            ReconcileAction::Deleted => self.deleted += 1,
            ReconcileAction::KeptLocal => self.kept_local += 1,
            ReconcileAction::Ignored => self.ignored += 1,
        }
    }
}

/// Owner of a local bookmark store. Hands out sessions, at most one of
/// which may be active at a time.
pub struct BookmarksRepository {
    store: Arc<Mutex<BookmarkStore>>,
    busy: Arc<AtomicBool>,
    filter: IgnoreFilter,
    orphan_folder: String,
}

impl BookmarksRepository {
    pub fn new(store: BookmarkStore, config: &SyncConfig) -> Self {
        Self {
            store: Arc::new(Mutex::new(store)),
            busy: Arc::new(AtomicBool::new(false)),
            filter: IgnoreFilter::new(config.ignored_guids.iter().cloned()),
            orphan_folder: config.orphan_folder.clone(),
        }
    }

    pub fn with_defaults(store: BookmarkStore) -> Self {
        Self::new(store, &SyncConfig::default())
    }

    pub fn create_session(&self) -> RepositorySession {
        RepositorySession {
            store: Arc::clone(&self.store),
            busy: Arc::clone(&self.busy),
            filter: self.filter.clone(),
            state: SessionState::Unstarted,
            holds_lock: false,
            delegate: None,
            reconciler: Reconciler::new(&self.orphan_folder),
            stats: SessionStats::default(),
            tracked: BTreeSet::new(),
            batch_open: false,
        }
    }

    /// Direct read access to the underlying store, outside any session.
    pub fn with_store<T>(&self, f: impl FnOnce(&BookmarkStore) -> Result<T>) -> Result<T> {
        let store = lock_store(&self.store);
        f(&store)
    }
}

pub struct RepositorySession {
    store: Arc<Mutex<BookmarkStore>>,
    busy: Arc<AtomicBool>,
    filter: IgnoreFilter,
    state: SessionState,
    holds_lock: bool,
    delegate: Option<Box<dyn StoreDelegate>>,
    reconciler: Reconciler,
    stats: SessionStats,
    tracked: BTreeSet<String>,
    batch_open: bool,
}

impl RepositorySession {
    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn begin(&mut self) -> Result<()> {
        if self.state != SessionState::Unstarted {
            return Err(RepositoryError::InvalidSessionTransition {
                from: self.state.name(),
                to: SessionState::Active.name(),
            });
        }
        if self
            .busy
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            warn!("⚠️  Another session is already active on this repository");
            return Err(RepositoryError::InvalidSessionTransition {
                from: "locked",
                to: SessionState::Active.name(),
            });
        }
        self.holds_lock = true;
        self.state = SessionState::Active;
        info!("🔓 Session started");
        Ok(())
    }

    pub fn set_store_delegate(&mut self, delegate: Box<dyn StoreDelegate>) {
        self.delegate = Some(delegate);
    }

    fn ensure_active(&self) -> Result<()> {
        if self.state != SessionState::Active {
            return Err(RepositoryError::InactiveSession);
        }
        Ok(())
    }

    /// Apply one incoming record.
    pub fn store(&mut self, record: BookmarkRecord) -> Result<()> {
        self.ensure_active()?;
        let Some(delegate) = self.delegate.as_mut() else {
            return Err(RepositoryError::NoStoreDelegate);
        };
        record.validate()?;

        let store = lock_store(&self.store);
        let local_parent = store.get(&record.guid)?.map(|row| row.parent);
        let parent = record.parent_guid().or(local_parent.as_deref());
        if self.filter.should_ignore_guid(&record.guid, parent) {
            debug!("ignoring {} (excluded subtree)", record.guid);
            self.stats.ignored += 1;
            delegate.on_record_store_succeeded(&record.guid);
            return Ok(());
        }

        self.batch_open = true;
        match self.reconciler.apply(&store, &record) {
            Ok(action) => {
                debug!("stored {}: {:?}", record.guid, action);
                self.stats.count(&action);
                delegate.on_record_store_succeeded(&record.guid);
                Ok(())
            }
            Err(e) => {
                warn!("⚠️  Failed to store {}: {}", record.guid, e);
                self.stats.failed += 1;
                delegate.on_record_store_failed(&e, &record.guid);
                Err(e)
            }
        }
    }

    /// Close the current batch: materialize folder orders and report the
    /// GUIDs that need uploading again.
    pub fn store_done(&mut self) -> Result<BTreeSet<String>> {
        self.ensure_active()?;
        if self.delegate.is_none() {
            return Err(RepositoryError::NoStoreDelegate);
        }

        self.flush()?;
        let end = now_millis();
        if let Some(delegate) = self.delegate.as_mut() {
            delegate.on_store_completed(end);
        }
        info!("📦 Store batch complete, {} record(s) tracked for upload", self.tracked.len());
        Ok(self.tracked.clone())
    }

    fn flush(&mut self) -> Result<()> {
        let store = lock_store(&self.store);
        self.tracked = self.reconciler.finish_batch(&store)?;
        self.batch_open = false;
        Ok(())
    }

    /// GUIDs touched by reconciliation that must be re-uploaded.
    pub fn tracked_guids(&self) -> &BTreeSet<String> {
        &self.tracked
    }

    pub fn finish(&mut self) -> Result<SessionStats> {
        if self.state != SessionState::Active {
            return Err(RepositoryError::InvalidSessionTransition {
                from: self.state.name(),
                to: SessionState::Finished.name(),
            });
        }
        if self.batch_open {
            self.flush()?;
        }
        self.release();
        self.state = SessionState::Finished;
        info!(
            "✅ Session finished: {} inserted, {} updated, {} deleted, {} renamed, {} kept local, {} ignored",
            self.stats.inserted,
            self.stats.updated,
            self.stats.deleted,
            self.stats.renamed,
            self.stats.kept_local,
            self.stats.ignored
        );
        Ok(self.stats.clone())
    }

    fn release(&mut self) {
        if self.holds_lock {
            self.busy.store(false, Ordering::SeqCst);
            self.holds_lock = false;
        }
    }

    fn is_ignored(&self, row: &StoredRow) -> bool {
        self.filter.should_ignore_guid(&row.guid, Some(&row.parent))
    }

    fn rows_to_records(
        &self,
        store: &BookmarkStore,
        rows: Vec<StoredRow>,
        signal: Option<&CancellationSignal>,
    ) -> Result<Vec<BookmarkRecord>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            check_cancelled(signal)?;
            if self.is_ignored(&row) {
                continue;
            }
            records.push(store.to_record(&row)?);
        }
        Ok(records)
    }

    /// Fetch the given GUIDs. Unknown GUIDs are skipped.
    pub fn fetch<S: AsRef<str>>(
        &self,
        guids: &[S],
        signal: Option<&CancellationSignal>,
    ) -> Result<Vec<BookmarkRecord>> {
        self.ensure_active()?;
        if guids.is_empty() {
            return Err(RepositoryError::InvalidRequest("empty GUID list".to_string()));
        }
        if guids.iter().any(|g| g.as_ref().is_empty()) {
            return Err(RepositoryError::InvalidRequest("empty GUID in request".to_string()));
        }

        let store = lock_store(&self.store);
        let mut rows = Vec::with_capacity(guids.len());
        for guid in guids {
            check_cancelled(signal)?;
            if let Some(row) = store.get(guid.as_ref())? {
                rows.push(row);
            }
        }
        self.rows_to_records(&store, rows, signal)
    }

    /// Every record, tombstones included.
    pub fn fetch_all(&self, signal: Option<&CancellationSignal>) -> Result<Vec<BookmarkRecord>> {
        self.fetch_since(-1, signal)
    }

    /// Records modified at or after `timestamp`, tombstones included.
    pub fn fetch_since(
        &self,
        timestamp: i64,
        signal: Option<&CancellationSignal>,
    ) -> Result<Vec<BookmarkRecord>> {
        self.ensure_active()?;
        let store = lock_store(&self.store);
        let rows = store.modified_since(timestamp)?;
        let records = self.rows_to_records(&store, rows, signal)?;
        debug!("fetched {} record(s) since {}", records.len(), timestamp);
        Ok(records)
    }

    pub fn guids_since(&self, timestamp: i64) -> Result<Vec<String>> {
        self.ensure_active()?;
        let store = lock_store(&self.store);
        Ok(store
            .modified_since(timestamp)?
            .into_iter()
            .filter(|row| !self.is_ignored(row))
            .map(|row| row.guid)
            .collect())
    }

    pub fn wipe(&mut self) -> Result<()> {
        self.ensure_active()?;
        let store = lock_store(&self.store);
        let removed = store.wipe()?;
        info!("🧹 Wiped {} record(s)", removed);
        Ok(())
    }
}

impl Drop for RepositorySession {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::guids;

    fn repository() -> BookmarksRepository {
        BookmarksRepository::with_defaults(BookmarkStore::open_in_memory().unwrap())
    }

    fn active_session(repo: &BookmarksRepository) -> (RepositorySession, CollectingDelegate) {
        let mut session = repo.create_session();
        let delegate = CollectingDelegate::new();
        session.set_store_delegate(Box::new(delegate.clone()));
        session.begin().unwrap();
        (session, delegate)
    }

    #[test]
    fn test_lifecycle_transitions() {
        let repo = repository();
        let mut session = repo.create_session();

        assert!(matches!(session.fetch_all(None), Err(RepositoryError::InactiveSession)));
        assert!(matches!(
            session.finish(),
            Err(RepositoryError::InvalidSessionTransition { .. })
        ));

        session.begin().unwrap();
        assert!(matches!(
            session.begin(),
            Err(RepositoryError::InvalidSessionTransition { .. })
        ));

        session.finish().unwrap();
        assert_eq!(session.state(), SessionState::Finished);
        assert!(matches!(session.guids_since(0), Err(RepositoryError::InactiveSession)));
        assert!(matches!(session.wipe(), Err(RepositoryError::InactiveSession)));
    }

    #[test]
    fn test_one_active_session_per_repository() {
        let repo = repository();
        let mut first = repo.create_session();
        let mut second = repo.create_session();

        first.begin().unwrap();
        assert!(matches!(
            second.begin(),
            Err(RepositoryError::InvalidSessionTransition { from: "locked", .. })
        ));

        first.finish().unwrap();
        let mut third = repo.create_session();
        third.begin().unwrap();
    }

    #[test]
    fn test_dropped_session_releases_repository() {
        let repo = repository();
        {
            let mut session = repo.create_session();
            session.begin().unwrap();
        }
        repo.create_session().begin().unwrap();
    }

    #[test]
    fn test_store_requires_delegate() {
        let repo = repository();
        let mut session = repo.create_session();
        session.begin().unwrap();
        let record = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "A", "https://a.example/");
        assert!(matches!(session.store(record), Err(RepositoryError::NoStoreDelegate)));
        assert!(matches!(session.store_done(), Err(RepositoryError::NoStoreDelegate)));
    }

    #[test]
    fn test_store_rejects_malformed() {
        let repo = repository();
        let (mut session, delegate) = active_session(&repo);
        let mut record = BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "A", "https://a.example/");
        record.guid.clear();
        assert!(matches!(session.store(record), Err(RepositoryError::InvalidArgument(_))));
        assert!(delegate.report().succeeded.is_empty());
    }

    #[test]
    fn test_fetch_empty_request() {
        let repo = repository();
        let (session, _) = active_session(&repo);
        let empty: [&str; 0] = [];
        assert!(matches!(session.fetch(&empty, None), Err(RepositoryError::InvalidRequest(_))));
        assert!(matches!(session.fetch(&[""], None), Err(RepositoryError::InvalidRequest(_))));
        assert!(session.fetch(&["unknownguid1"], None).unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_fetch() {
        let repo = repository();
        let (session, _) = active_session(&repo);
        let signal = CancellationSignal::new();
        signal.cancel();
        assert!(matches!(session.fetch_all(Some(&signal)), Err(RepositoryError::Cancelled)));
    }

    #[test]
    fn test_cancelled_partway_through_fetch() {
        let repo = repository();
        let (mut session, _) = active_session(&repo);
        for i in 0..6 {
            let guid = format!("bookmark{:04}", i);
            let url = format!("https://{}.example/", guid);
            session
                .store(BookmarkRecord::bookmark(&guid, guids::MENU, &guid, &url))
                .unwrap();
        }
        session.store_done().unwrap();

        let uncancelled = CancellationSignal::cancelled_after(usize::MAX);
        let everything = session.fetch_all(Some(&uncancelled)).unwrap();
        assert!(everything.len() > 4);

        let signal = CancellationSignal::cancelled_after(4);
        let result = session.fetch_all(Some(&signal));
        assert!(matches!(result, Err(RepositoryError::Cancelled)));
        assert!(signal.is_cancelled());

        let guids: Vec<String> = everything.iter().map(|r| r.guid.clone()).collect();
        let signal = CancellationSignal::cancelled_after(2);
        assert!(matches!(session.fetch(&guids, Some(&signal)), Err(RepositoryError::Cancelled)));
    }

    #[test]
    fn test_delegate_callbacks() {
        let repo = repository();
        let (mut session, delegate) = active_session(&repo);
        session
            .store(BookmarkRecord::bookmark("aaaaaaaaaaaa", guids::MENU, "A", "https://a.example/"))
            .unwrap();
        session
            .store(BookmarkRecord::bookmark("pinnedaaaaaa", guids::PINNED, "P", "https://p.example/"))
            .unwrap();
        session.store_done().unwrap();

        let report = delegate.report();
        assert_eq!(report.succeeded, vec!["aaaaaaaaaaaa", "pinnedaaaaaa"]);
        assert!(report.completed_at.is_some());

        let stats = session.finish().unwrap();
        assert_eq!(stats.inserted, 1);
        assert_eq!(stats.ignored, 1);
    }
}
