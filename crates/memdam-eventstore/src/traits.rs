use memdam_types::{Event, Query};
use uuid::Uuid;

use crate::error::EventstoreResult;

/// Persistent, queryable collection of events.
///
/// Every call is atomic with respect to the events it touches.
pub trait Eventstore: Send + Sync {
    /// Persist `events`. Saving an event whose id is already stored replaces
    /// the stored copy.
    fn save(&self, events: &[Event]) -> EventstoreResult<()>;

    /// Fetch one event. Returns
    /// [`EventstoreError::NotFound`](crate::EventstoreError::NotFound) if absent.
    fn get(&self, id: Uuid) -> EventstoreResult<Event>;

    /// Events matching `query`, in the query's order, truncated to its limit.
    fn find(&self, query: &Query) -> EventstoreResult<Vec<Event>>;

    /// Remove an event. Removing an unknown id is not an error.
    fn delete(&self, id: Uuid) -> EventstoreResult<()>;
}
