use std::collections::BTreeMap;
use std::sync::RwLock;

use memdam_types::{Event, Query};
use uuid::Uuid;

use crate::error::{EventstoreError, EventstoreResult};
use crate::traits::Eventstore;

/// In-memory event store keyed by event id.
///
/// Queries are evaluated directly against the stored events. Intended for
/// tests and embedding.
pub struct InMemoryEventstore {
    events: RwLock<BTreeMap<Uuid, Event>>,
}

impl InMemoryEventstore {
    pub fn new() -> Self {
        Self {
            events: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of events currently stored.
    pub fn len(&self) -> usize {
        self.events.read().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().expect("lock poisoned").is_empty()
    }
}

impl Default for InMemoryEventstore {
    fn default() -> Self {
        Self::new()
    }
}

impl Eventstore for InMemoryEventstore {
    fn save(&self, events: &[Event]) -> EventstoreResult<()> {
        let mut map = self.events.write().expect("lock poisoned");
        for event in events {
            map.insert(event.id(), event.clone());
        }
        Ok(())
    }

    fn get(&self, id: Uuid) -> EventstoreResult<Event> {
        self.events
            .read()
            .expect("lock poisoned")
            .get(&id)
            .cloned()
            .ok_or(EventstoreError::NotFound(id))
    }

    fn find(&self, query: &Query) -> EventstoreResult<Vec<Event>> {
        let plan = query.plan()?;
        let map = self.events.read().expect("lock poisoned");
        let mut found = Vec::new();
        for event in map.values() {
            if plan.matches(event)? {
                found.push(event.clone());
            }
        }
        Ok(plan.order_and_limit(found))
    }

    fn delete(&self, id: Uuid) -> EventstoreResult<()> {
        self.events.write().expect("lock poisoned").remove(&id);
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryEventstore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventstore")
            .field("event_count", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use memdam_types::{QueryFilter, TIME_FIELD};

    fn event(x: f64) -> Event {
        Event::new("test.ns", [("x__number", x)]).unwrap()
    }

    #[test]
    fn save_get_delete() {
        let store = InMemoryEventstore::new();
        let e = event(1.0);
        store.save(std::slice::from_ref(&e)).unwrap();
        assert_eq!(store.get(e.id()).unwrap(), e);

        store.delete(e.id()).unwrap();
        store.delete(e.id()).unwrap();
        assert!(matches!(store.get(e.id()), Err(EventstoreError::NotFound(id)) if id == e.id()));
    }

    #[test]
    fn save_replaces() {
        let store = InMemoryEventstore::new();
        let e = event(1.0);
        store.save(&[e.clone(), e.clone()]).unwrap();
        store.save(&[e]).unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn find_orders_and_limits() {
        let store = InMemoryEventstore::new();
        store.save(&[event(0.3), event(0.1), event(0.2)]).unwrap();

        let query = Query::new().order_by("x__number", false).limit(2);
        let found = store.find(&query).unwrap();
        let xs: Vec<_> = found.iter().map(|e| e.field("x__number").cloned()).collect();
        assert_eq!(
            xs,
            vec![
                Some(memdam_types::FieldValue::Number(0.3)),
                Some(memdam_types::FieldValue::Number(0.2))
            ]
        );

        let query = Query::new()
            .filter(QueryFilter::namespace("test.ns"))
            .order_by(TIME_FIELD, true);
        assert_eq!(store.find(&query).unwrap().len(), 3);
    }
}
