//! Blob storage for memdam.
//!
//! Large binary payloads (images, audio, documents) never live inside
//! events. An event carries a [`BlobReference`](memdam_types::BlobReference)
//! and the bytes live in a [`Blobstore`] under that reference.
//!
//! # Storage Backends
//!
//! All backends implement the [`Blobstore`] trait:
//!
//! - [`LocalFolderBlobstore`] -- sharded files under a local directory
//! - [`InMemoryBlobstore`] -- `HashMap`-based store for tests and embedding
//!
//! # Design Rules
//!
//! 1. Every call is atomic per reference: readers never see a partial blob.
//! 2. Deleting a missing blob succeeds.
//! 3. All I/O errors are propagated, never silently ignored.

pub mod error;
pub mod local;
pub mod memory;
pub mod traits;

pub use error::{BlobError, BlobResult};
pub use local::LocalFolderBlobstore;
pub use memory::InMemoryBlobstore;
pub use traits::Blobstore;
