use std::fmt;

/// Produces work ids. Called by the master thread once per poll interval.
pub trait Manager: Send + 'static {
    type WorkId: Send + fmt::Debug + 'static;
    type Error: fmt::Display;

    /// Ids to enqueue, in order. An error is logged and the tick skipped.
    fn generate_work_ids(&mut self) -> Result<Vec<Self::WorkId>, Self::Error>;
}

/// Processes one work id at a time. Shared by every worker thread.
pub trait Worker: Send + Sync + 'static {
    type WorkId: Send + fmt::Debug + 'static;
    type Error: fmt::Display;

    fn process(&self, id: Self::WorkId) -> Result<(), Self::Error>;
}
