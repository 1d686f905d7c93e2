use thiserror::Error;

/// Errors from repository operations (used by trait definitions in parley-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors decoding a directory pagination cursor.
#[derive(Debug, Error)]
pub enum CursorError {
    #[error("malformed cursor: {0}")]
    Malformed(String),
}

/// Errors related to conversation operations.
#[derive(Debug, Error)]
pub enum ConversationError {
    /// Missing, soft-deleted, or owned by someone else.
    #[error("conversation not found")]
    NotFound,

    #[error("invalid title: {0}")]
    InvalidTitle(String),

    #[error(transparent)]
    Cursor(#[from] CursorError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}
