use memdam_blobstore::BlobError;
use memdam_eventstore::EventstoreError;
use memdam_types::BlobReference;
use memdam_work::WorkError;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SyncError {
    /// A referenced blob is in neither the source nor the destination.
    #[error("blob {blob} referenced by event {} is lost", .event_id.simple())]
    BlobLost { event_id: Uuid, blob: BlobReference },

    #[error("collector error: {0}")]
    Collector(String),

    #[error("event store error: {0}")]
    Eventstore(#[from] EventstoreError),

    #[error("blob store error: {0}")]
    Blob(#[from] BlobError),

    #[error("work manager error: {0}")]
    Work(#[from] WorkError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SyncResult<T> = Result<T, SyncError>;
