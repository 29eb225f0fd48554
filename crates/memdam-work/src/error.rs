use std::io;

/// Errors from starting and stopping a work manager.
#[derive(Debug, thiserror::Error)]
pub enum WorkError {
    /// `start` was called on a running manager.
    #[error("work manager {0} is already running")]
    AlreadyRunning(String),

    /// `stop` was called on a manager that is not running.
    #[error("work manager {0} is not running")]
    NotRunning(String),

    /// The OS refused to spawn a thread.
    #[error("failed to spawn thread {name}: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// Convenience alias used throughout the work crate.
pub type Result<T> = std::result::Result<T, WorkError>;
