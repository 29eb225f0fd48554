//! Replication of events and their blobs between store pairs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use memdam_blobstore::{BlobError, Blobstore};
use memdam_eventstore::{EventstoreError, Eventstore};
use memdam_types::{BlobReference, Event, Query, TIME_FIELD};
use memdam_work::{Manager, PollingWorkManager, WorkStats, Worker};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};

/// The four stores a synchronizer moves data between.
#[derive(Clone)]
pub struct SyncStores {
    pub source_events: Arc<dyn Eventstore>,
    pub source_blobs: Arc<dyn Blobstore>,
    pub dest_events: Arc<dyn Eventstore>,
    pub dest_blobs: Arc<dyn Blobstore>,
}

/// Event ids handed to a worker and not yet finished.
///
/// Shared by the [`SyncManager`], which claims ids when it offers them, and
/// the [`SyncWorker`]s, which release them when done.
#[derive(Clone, Debug, Default)]
pub struct InFlight {
    ids: Arc<Mutex<HashSet<Uuid>>>,
}

impl InFlight {
    /// Returns `false` if `id` is already claimed.
    pub fn claim(&self, id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id)
    }

    pub fn release(&self, id: Uuid) {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&id);
    }

    pub fn contains(&self, id: Uuid) -> bool {
        self.ids
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&id)
    }

    pub fn len(&self) -> usize {
        self.ids.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Releases its claim when dropped, including on unwind.
struct Claim<'a> {
    in_flight: &'a InFlight,
    id: Uuid,
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.in_flight.release(self.id);
    }
}

/// Offers the oldest unclaimed source events for synchronization.
pub struct SyncManager {
    events: Arc<dyn Eventstore>,
    in_flight: InFlight,
    batch_size: u64,
}

impl SyncManager {
    pub fn new(events: Arc<dyn Eventstore>, in_flight: InFlight, batch_size: u64) -> Self {
        Self {
            events,
            in_flight,
            batch_size,
        }
    }
}

impl Manager for SyncManager {
    type WorkId = Uuid;
    type Error = EventstoreError;

    fn generate_work_ids(&mut self) -> Result<Vec<Uuid>, EventstoreError> {
        let query = Query::new()
            .order_by(TIME_FIELD, true)
            .limit(self.batch_size);
        let ids: Vec<Uuid> = self
            .events
            .find(&query)?
            .iter()
            .map(Event::id)
            .filter(|id| self.in_flight.claim(*id))
            .collect();
        if !ids.is_empty() {
            debug!(count = ids.len(), "offering events for synchronization");
        }
        Ok(ids)
    }
}

/// Moves one event, and its blobs, from source to destination.
pub struct SyncWorker {
    stores: SyncStores,
    in_flight: InFlight,
}

impl SyncWorker {
    pub fn new(stores: SyncStores, in_flight: InFlight) -> Self {
        Self { stores, in_flight }
    }

    /// Copy blobs, save the event, then remove it from the source.
    ///
    /// Returns `false` if the event was no longer in the source.
    pub fn sync_event(&self, id: Uuid) -> SyncResult<bool> {
        let event = match self.stores.source_events.get(id) {
            Ok(event) => event,
            Err(EventstoreError::NotFound(_)) => {
                debug!(event_id = %id.simple(), "event already gone from source");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };

        let blobs = event.blob_references();
        for blob in &blobs {
            self.copy_blob(&event, blob)?;
        }
        self.stores.dest_events.save(std::slice::from_ref(&event))?;

        self.stores.source_events.delete(id)?;
        for blob in &blobs {
            self.stores.source_blobs.delete(blob)?;
        }
        info!(
            event_id = %id.simple(),
            namespace = %event.namespace(),
            blobs = blobs.len(),
            "synchronized event"
        );
        Ok(true)
    }

    fn copy_blob(&self, event: &Event, blob: &BlobReference) -> SyncResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join(blob.name());
        match self.stores.source_blobs.get_data_to_file(blob, &path) {
            Ok(()) => {
                self.stores.dest_blobs.set_data_from_file(blob, &path)?;
                debug!(event_id = %event.id().simple(), blob = %blob, "copied blob");
                Ok(())
            }
            // Another event referencing the same blob may have moved it already.
            Err(BlobError::MissingBlob(_)) => {
                if !self.stores.dest_blobs.exists(blob)? {
                    return Err(SyncError::BlobLost {
                        event_id: event.id(),
                        blob: blob.clone(),
                    });
                }
                warn!(event_id = %event.id().simple(), blob = %blob, "blob already at destination");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Worker for SyncWorker {
    type WorkId = Uuid;
    type Error = SyncError;

    fn process(&self, id: Uuid) -> SyncResult<()> {
        let _claim = Claim {
            in_flight: &self.in_flight,
            id,
        };
        self.sync_event(id).map(|_| ())
    }
}

/// Outcome of [`Synchronizer::sync_pending`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub synchronized: usize,
    pub failed: usize,
}

/// Background replication from the source stores to the destination stores.
pub struct Synchronizer {
    work: PollingWorkManager<SyncManager, SyncWorker>,
    in_flight: InFlight,
}

impl Synchronizer {
    pub fn new(stores: SyncStores, config: &SyncConfig) -> Self {
        let in_flight = InFlight::default();
        let manager = SyncManager::new(
            stores.source_events.clone(),
            in_flight.clone(),
            config.batch_size,
        );
        let worker = SyncWorker::new(stores, in_flight.clone());
        Self {
            work: PollingWorkManager::new(manager, worker, config.work_config("sync")),
            in_flight,
        }
    }

    pub fn start(&mut self) -> SyncResult<()> {
        Ok(self.work.start()?)
    }

    pub fn stop(&mut self) -> SyncResult<()> {
        Ok(self.work.stop()?)
    }

    pub fn is_running(&self) -> bool {
        self.work.is_running()
    }

    pub fn stats(&self) -> WorkStats {
        self.work.stats()
    }

    /// Events currently being moved.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Synchronize on the calling thread until the source has nothing left
    /// that can be moved.
    pub fn sync_pending(stores: &SyncStores, config: &SyncConfig) -> SyncResult<SyncReport> {
        let in_flight = InFlight::default();
        let worker = SyncWorker::new(stores.clone(), in_flight.clone());

        let mut report = SyncReport::default();
        let mut failed = HashSet::new();
        loop {
            // Failed events stay in the source; widen the window past them.
            let mut manager = SyncManager::new(
                stores.source_events.clone(),
                in_flight.clone(),
                config.batch_size + failed.len() as u64,
            );
            let ids: Vec<Uuid> = manager
                .generate_work_ids()?
                .into_iter()
                .filter(|id| !failed.contains(id))
                .collect();
            if ids.is_empty() {
                break;
            }
            for id in ids {
                match worker.process(id) {
                    Ok(()) => report.synchronized += 1,
                    Err(e) => {
                        warn!(event_id = %id.simple(), error = %e, "failed to synchronize event");
                        failed.insert(id);
                        report.failed += 1;
                    }
                }
            }
        }
        Ok(report)
    }
}
