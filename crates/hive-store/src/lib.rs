//! Storage boundary for the hive runtime host.
//!
//! Two seams, each with an in-memory implementation for tests and a
//! durable one for deployment:
//!
//! - [`DocStore`]: project-scoped document collections with an atomic
//!   find-one-and-update (the filter/update evaluation happens inside
//!   the store's own exclusion, so no write interleaves between match
//!   and apply).
//! - [`BlobStore`]: project-scoped named text blobs.
//!
//! Methods are synchronous: every caller sits inside a Cell's dispatch
//! worker and both backends (redb, in-memory maps) are synchronous.

mod blobs;
mod docs;
mod redb_store;

pub use blobs::{BlobStore, LocalBlobStore, MemoryBlobStore};
pub use docs::{DocStore, MemoryStore, document_id};
pub use redb_store::RedbStore;

/// Errors surfaced by the storage backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] redb::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid name: {0}")]
    InvalidName(String),
}

impl From<redb::DatabaseError> for StoreError {
    fn from(err: redb::DatabaseError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(err: redb::TransactionError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(err: redb::TableError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(err: redb::StorageError) -> Self {
        Self::Database(err.into())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(err: redb::CommitError) -> Self {
        Self::Database(err.into())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
