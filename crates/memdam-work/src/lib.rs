//! Polling work manager for memdam.
//!
//! A [`PollingWorkManager`] runs one master thread and a pool of worker
//! threads. Every poll interval the master asks its [`Manager`] for work ids
//! and enqueues them on a shared FIFO queue; workers dequeue ids and hand them
//! to the [`Worker`]. Shutdown is a poison pill: one [`Message::Shutdown`] per
//! thread.
//!
//! Failures stay inside the item that caused them: a worker that returns an
//! error or panics is logged and counted, and the thread moves on to the next
//! id.

pub mod config;
pub mod error;
pub mod manager;
pub mod stats;
pub mod traits;

pub use config::WorkConfig;
pub use error::{Result, WorkError};
pub use manager::{Message, PollingWorkManager};
pub use stats::{StatsSnapshot, WorkStats};
pub use traits::{Manager, Worker};
