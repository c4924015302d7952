//! Backend selection.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

use tracing::info;

use crate::error::{StorageError, StorageResult};
use crate::local::LocalBlobStore;
use crate::object_store::{ObjectBlobStore, ObjectStoreConfig};
use crate::store::BlobStore;

/// Which blob store implementation to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl FromStr for StorageBackend {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "s3" => Ok(Self::S3),
            other => Err(StorageError::config_error(format!(
                "unknown STORAGE_TYPE '{}' (expected local or s3)",
                other
            ))),
        }
    }
}

/// Storage configuration.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub backend: StorageBackend,
    /// Root directory for the local backend
    pub local_path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::Local,
            local_path: PathBuf::from("./storage"),
        }
    }
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        let defaults = Self::default();
        let backend = match std::env::var("STORAGE_TYPE") {
            Ok(value) => value.parse()?,
            Err(_) => defaults.backend,
        };

        Ok(Self {
            backend,
            local_path: std::env::var("STORAGE_LOCAL_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.local_path),
        })
    }
}

/// Build the configured blob store.
///
/// S3 credentials are read from the environment only when the S3 backend
/// is selected.
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    let store: Arc<dyn BlobStore> = match config.backend {
        StorageBackend::Local => Arc::new(LocalBlobStore::new(&config.local_path)),
        StorageBackend::S3 => Arc::new(ObjectBlobStore::new(ObjectStoreConfig::from_env()?)),
    };

    info!("Using {} blob store", store.backend());
    Ok(store)
}
