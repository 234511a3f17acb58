use thiserror::Error;

/// Errors surfaced by the record store and repository sessions.
///
/// Reconciliation conflicts are not errors; they are resolved and
/// reported through [`crate::session::StoreDelegate`].
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Operation issued outside the begin/finish window.
    #[error("session is not active")]
    InactiveSession,

    /// `begin`/`finish` called out of order, or another session already
    /// holds the repository.
    #[error("invalid session transition from {from} to {to}")]
    InvalidSessionTransition {
        from: &'static str,
        to: &'static str,
    },

    /// Null or empty GUID list passed to a fetch.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The storage backend returned no readable row where one was expected.
    #[error("no row returned for {0}")]
    NullCursor(String),

    /// `store` called before a delegate was registered.
    #[error("no store delegate registered")]
    NoStoreDelegate,

    /// Malformed record handed to `store`.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Fetch interrupted through a cancellation signal.
    #[error("operation cancelled")]
    Cancelled,

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RepositoryError>;
