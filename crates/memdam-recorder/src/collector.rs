use memdam_eventstore::Eventstore;
use memdam_types::Event;
use tracing::{debug, warn};

use crate::error::SyncResult;

/// A producer of new events.
///
/// Collectors are driven by the host: `start` once, then repeated rounds of
/// `collect` followed by `post_collect` once the round has been persisted,
/// then `stop`.
pub trait Collector: Send {
    fn start(&mut self) -> SyncResult<()> {
        Ok(())
    }

    /// Gather at most `limit` new events.
    fn collect(&mut self, limit: usize) -> SyncResult<Vec<Event>>;

    /// Called after the events from the last `collect` were saved.
    fn post_collect(&mut self) -> SyncResult<()> {
        Ok(())
    }

    fn stop(&mut self) -> SyncResult<()> {
        Ok(())
    }
}

/// Outcome of one [`collect_and_persist`] round.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CollectReport {
    pub collected: usize,
    pub saved: usize,
    pub failed: usize,
}

/// Run one collection round and save each event to `events`.
///
/// Events are saved one at a time so a single bad event does not lose the
/// rest of the round.
pub fn collect_and_persist<C: Collector + ?Sized>(
    collector: &mut C,
    events: &dyn Eventstore,
    limit: usize,
) -> SyncResult<CollectReport> {
    let collected = collector.collect(limit)?;
    let mut report = CollectReport {
        collected: collected.len(),
        ..CollectReport::default()
    };
    for event in &collected {
        match events.save(std::slice::from_ref(event)) {
            Ok(()) => report.saved += 1,
            Err(e) => {
                warn!(
                    event_id = %event.id().simple(),
                    namespace = %event.namespace(),
                    error = %e,
                    "failed to save collected event"
                );
                report.failed += 1;
            }
        }
    }
    collector.post_collect()?;
    debug!(collected = report.collected, saved = report.saved, "collection round done");
    Ok(report)
}
