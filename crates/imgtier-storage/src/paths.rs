//! Blob path derivation.
//!
//! A blob for `(id, quality)` lives at `<base>/<id[..2]>/<id>_<token>.jpg`.
//! Derivation is pure, so the API and any number of workers agree on the
//! location without coordination.

use std::path::{Path, PathBuf};

use imgtier_models::{ImageId, QualityLevel};

use crate::error::StorageResult;

/// Number of leading id characters used as the shard directory name.
pub const SHARD_PREFIX_LEN: usize = 2;

/// Extension of every stored blob.
pub const BLOB_EXTENSION: &str = "jpg";

/// Shard directory name for an id.
pub fn shard_prefix(id: &ImageId) -> StorageResult<&str> {
    id.validate()?;
    // validate() guarantees ASCII, so byte slicing is on a char boundary
    Ok(&id.as_str()[..SHARD_PREFIX_LEN])
}

/// File name of a blob inside its shard directory.
pub fn blob_file_name(id: &ImageId, quality: QualityLevel) -> String {
    format!("{}_{}.{}", id, quality.token(), BLOB_EXTENSION)
}

/// Filesystem path of a blob under `base`.
pub fn derive_path(base: &Path, id: &ImageId, quality: QualityLevel) -> StorageResult<PathBuf> {
    let shard = shard_prefix(id)?;
    Ok(base.join(shard).join(blob_file_name(id, quality)))
}

/// Object-store key of a blob; `prefix` may be empty.
pub fn derive_key(prefix: &str, id: &ImageId, quality: QualityLevel) -> StorageResult<String> {
    let shard = shard_prefix(id)?;
    let prefix = prefix.trim_matches('/');
    if prefix.is_empty() {
        Ok(format!("{}/{}", shard, blob_file_name(id, quality)))
    } else {
        Ok(format!("{}/{}/{}", prefix, shard, blob_file_name(id, quality)))
    }
}

/// Recover `(id, quality)` from a blob file name.
///
/// Returns `None` for anything that is not a finished blob, including the
/// hidden temporary files written during a save.
pub fn parse_blob_file_name(name: &str) -> Option<(ImageId, QualityLevel)> {
    if name.starts_with('.') {
        return None;
    }
    let stem = name.strip_suffix(BLOB_EXTENSION)?.strip_suffix('.')?;
    let (id, token) = stem.rsplit_once('_')?;
    let quality = QualityLevel::from_token(token)?;

    let id = ImageId::from(id);
    id.validate().ok()?;
    Some((id, quality))
}
