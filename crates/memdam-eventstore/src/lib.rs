//! Event storage for memdam.
//!
//! Events are grouped by namespace. The SQLite engine keeps one database file
//! per namespace and grows its schema as new field names show up: every field
//! becomes a column, and TEXT fields additionally get a full-text index.
//!
//! # Storage Backends
//!
//! All backends implement the [`Eventstore`] trait:
//!
//! - [`SqliteEventstore`] -- folder of per-namespace SQLite files
//! - [`InMemoryEventstore`] -- `BTreeMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Saving an event that is already stored replaces it.
//! 2. Deleting an unknown event succeeds.
//! 3. Schema changes are additive only: columns, indexes, and text tables.
//! 4. Concurrent writers to the same namespace serialize on the database's
//!    exclusive transaction; readers are never blocked.

pub mod error;
pub mod memory;
pub mod sqlite;
pub mod traits;

pub use error::{EventstoreError, EventstoreResult};
pub use memory::InMemoryEventstore;
pub use sqlite::SqliteEventstore;
pub use traits::Eventstore;
