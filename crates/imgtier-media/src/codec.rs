//! Codec capability consumed by the pipeline.

use crate::error::MediaResult;

/// Validates image bytes and re-encodes them at a target quality.
///
/// Implementations are synchronous and CPU bound; async callers should run
/// them on the blocking pool.
pub trait Codec: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether the bytes are an image this codec can decode.
    fn is_supported(&self, data: &[u8]) -> bool;

    /// Re-encode `data` at `quality` percent (1..=100).
    fn transcode(&self, data: &[u8], quality: u8) -> MediaResult<Vec<u8>>;
}
