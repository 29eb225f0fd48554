//! Event replication for memdam.
//!
//! The [`Synchronizer`] moves events, and the blobs they reference, from a
//! source store pair to a destination store pair. Blobs are copied first,
//! then the event is saved at the destination, and only then is anything
//! removed from the source. A crash at any point leaves the event in the
//! source, so it is offered again: delivery is at-least-once.
//!
//! Collectors, the producers of new events, plug in through the
//! [`Collector`] trait.

pub mod collector;
pub mod config;
pub mod error;
pub mod sync;

pub use collector::{collect_and_persist, CollectReport, Collector};
pub use config::SyncConfig;
pub use error::{SyncError, SyncResult};
pub use sync::{InFlight, SyncManager, SyncReport, SyncStores, SyncWorker, Synchronizer};
