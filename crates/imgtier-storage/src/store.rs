//! Blob store abstraction.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use imgtier_models::{ImageId, QualityLevel};

use crate::error::StorageResult;

/// Lazy stream of distinct image ids.
pub type IdStream<'a> = BoxStream<'a, StorageResult<ImageId>>;

/// Keyed blob storage for image variants.
///
/// Every `(id, quality)` pair maps to exactly one blob. Saves overwrite,
/// and operations on distinct keys never interfere with each other.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    /// Where the blob for `(id, quality)` lives, without touching storage.
    fn locate(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<String>;

    /// Write `data` as the blob for `(id, quality)`, replacing any previous blob.
    ///
    /// Returns the blob's locator.
    async fn save(&self, id: &ImageId, quality: QualityLevel, data: &[u8])
        -> StorageResult<String>;

    /// Read the blob for `(id, quality)`.
    async fn get(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<Vec<u8>>;

    /// Remove exactly one blob. Missing blobs are `NotFound`.
    async fn delete(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<()>;

    /// Enumerate every id with at least one stored blob.
    ///
    /// The stream is lazy and finite. Each id appears once per call, and
    /// calling again starts a fresh enumeration.
    fn list(&self) -> IdStream<'_>;

    /// Verify the backend is reachable.
    async fn check_connectivity(&self) -> StorageResult<()>;
}
