//! Bookmark record reconciliation for sync sessions.
//!
//! Incoming records are applied through a [`session::RepositorySession`]
//! against a SQLite [`store::BookmarkStore`]. Conflicts are settled by
//! [`reconciler`], and folder orders are written back as row positions by
//! [`materializer`].

pub mod config;
pub mod error;
pub mod filter;
pub mod materializer;
pub mod progress;
pub mod reconciler;
pub mod records;
pub mod session;
pub mod store;
pub mod sync_state;
pub mod validator;

pub use config::SyncConfig;
pub use error::{RepositoryError, Result};
pub use records::{guids, BookmarkRecord, BookmarkType, Record};
pub use session::{BookmarksRepository, CancellationSignal, CollectingDelegate, RepositorySession, StoreDelegate};
pub use store::BookmarkStore;
