use memdam_types::{QueryError, TypeError};
use uuid::Uuid;

/// Errors from event store operations.
#[derive(Debug, thiserror::Error)]
pub enum EventstoreError {
    /// No stored event has this id.
    #[error("event not found: {}", .0.simple())]
    NotFound(Uuid),

    /// The query could not be validated or translated.
    #[error("invalid query: {0}")]
    Query(#[from] QueryError),

    /// An event or stored value failed validation.
    #[error("invalid event: {0}")]
    Type(#[from] TypeError),

    /// A stored row or table could not be decoded.
    #[error("corrupt table {table}: {reason}")]
    Corrupt { table: String, reason: String },

    /// Error reported by SQLite.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error from the underlying storage backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result alias for event store operations.
pub type EventstoreResult<T> = Result<T, EventstoreError>;
