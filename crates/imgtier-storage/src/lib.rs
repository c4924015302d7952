//! Sharded blob store.
//!
//! This crate provides:
//! - Deterministic (id, quality) -> path derivation with shard prefixes
//! - The `BlobStore` trait shared by the API and the worker
//! - A local filesystem backend with atomic writes
//! - An S3-compatible object store backend
//! - Backend selection from configuration

pub mod config;
pub mod error;
pub mod local;
pub mod object_store;
pub mod paths;
pub mod store;

pub use config::{open_store, StorageBackend, StorageConfig};
pub use error::{StorageError, StorageResult};
pub use local::LocalBlobStore;
pub use object_store::{ObjectBlobStore, ObjectStoreConfig};
pub use paths::{blob_file_name, derive_key, derive_path, parse_blob_file_name, shard_prefix};
pub use store::{BlobStore, IdStream};
