//! Foundation types for memdam.
//!
//! Every other memdam crate depends on `memdam-types`. It defines the event
//! model, its canonical JSON form, and the structured query language used to
//! search events.
//!
//! # Key Types
//!
//! - [`Event`] — Immutable, timestamped, namespaced record with typed fields
//! - [`FieldName`] / [`FieldType`] / [`FieldValue`] — The `rawname__type` field grammar
//! - [`BlobReference`] — Names one binary blob stored outside the event
//! - [`Namespace`] — Dot-separated event category, one storage table each
//! - [`Query`] — Filters, ordering, and limit for event searches

pub mod blob;
pub mod error;
pub mod event;
pub mod field;
pub mod namespace;
pub mod query;
pub mod time;

pub use blob::BlobReference;
pub use error::{QueryError, TypeError};
pub use event::{Event, EventBuilder};
pub use field::{
    FieldName, FieldType, FieldValue, ID_FIELD, NAMESPACE_FIELD, TIME_FIELD,
};
pub use namespace::Namespace;
pub use query::{Condition, NamespaceScope, Operand, Operator, Query, QueryFilter, QueryPlan};
