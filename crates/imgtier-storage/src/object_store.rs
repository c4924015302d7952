//! S3-compatible object store backend.

use std::collections::BTreeSet;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::{Builder, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use imgtier_models::{ImageId, QualityLevel};
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::paths::{derive_key, parse_blob_file_name};
use crate::store::{BlobStore, IdStream};

/// Configuration for the object store backend.
#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    /// S3 API endpoint
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    /// Region ("auto" works for most S3-compatible stores)
    pub region: String,
    /// Key prefix prepended to every shard; may be empty
    pub key_prefix: String,
}

impl ObjectStoreConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket_name: std::env::var("S3_BUCKET_NAME")
                .map_err(|_| StorageError::config_error("S3_BUCKET_NAME not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
            key_prefix: std::env::var("S3_KEY_PREFIX").unwrap_or_default(),
        })
    }
}

/// Blob store backed by an S3-compatible bucket.
#[derive(Clone)]
pub struct ObjectBlobStore {
    client: Client,
    bucket: String,
    key_prefix: String,
}

impl ObjectBlobStore {
    /// Create a new store from configuration.
    pub fn new(config: ObjectStoreConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "imgtier",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket_name,
            key_prefix: config.key_prefix.trim_matches('/').to_string(),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(ObjectStoreConfig::from_env()?))
    }

    fn key(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<String> {
        derive_key(&self.key_prefix, id, quality)
    }

    fn list_root(&self) -> String {
        if self.key_prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", self.key_prefix)
        }
    }

    async fn exists(&self, key: &str) -> StorageResult<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    Ok(false)
                } else {
                    Err(StorageError::AwsSdk(e.to_string()))
                }
            }
        }
    }

    /// Shard prefixes (`<root><shard>/`) directly under the root.
    async fn list_shards(&self) -> StorageResult<Vec<String>> {
        let mut shards = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(self.list_root())
                .delimiter("/");

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            shards.extend(
                response
                    .common_prefixes()
                    .iter()
                    .filter_map(|p| p.prefix().map(str::to_string)),
            );

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        shards.sort();
        Ok(shards)
    }

    /// Distinct ids under one shard prefix.
    async fn list_shard_ids(&self, shard: String) -> StorageResult<Vec<ImageId>> {
        let mut ids = BTreeSet::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&shard)
                .delimiter("/");

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request
                .send()
                .await
                .map_err(|e| StorageError::ListFailed(e.to_string()))?;

            for object in response.contents() {
                let Some(name) = object.key().and_then(|k| k.strip_prefix(shard.as_str()))
                else {
                    continue;
                };
                if let Some((id, _quality)) = parse_blob_file_name(name) {
                    ids.insert(id);
                }
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
            } else {
                break;
            }
        }

        Ok(ids.into_iter().collect())
    }
}

#[async_trait]
impl BlobStore for ObjectBlobStore {
    fn backend(&self) -> &'static str {
        "s3"
    }

    fn locate(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<String> {
        Ok(format!("s3://{}/{}", self.bucket, self.key(id, quality)?))
    }

    async fn save(
        &self,
        id: &ImageId,
        quality: QualityLevel,
        data: &[u8],
    ) -> StorageResult<String> {
        let key = self.key(id, quality)?;
        debug!("Uploading {} bytes to {}", data.len(), key);

        // Single PUT; the object becomes visible all at once
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(data.to_vec()))
            .content_type("image/jpeg")
            .send()
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        Ok(format!("s3://{}/{}", self.bucket, key))
    }

    async fn get(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<Vec<u8>> {
        let key = self.key(id, quality)?;
        debug!("Downloading {}", key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    StorageError::not_found(key.clone())
                } else {
                    StorageError::DownloadFailed(e.to_string())
                }
            })?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn delete(&self, id: &ImageId, quality: QualityLevel) -> StorageResult<()> {
        let key = self.key(id, quality)?;

        // S3 deletes are idempotent, so existence is checked first
        if !self.exists(&key).await? {
            return Err(StorageError::not_found(key));
        }

        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| StorageError::delete_failed(e.to_string()))?;

        info!("Deleted {}", key);
        Ok(())
    }

    fn list(&self) -> IdStream<'_> {
        stream::once(self.list_shards())
            .map_ok(|shards| stream::iter(shards.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten()
            .and_then(move |shard| self.list_shard_ids(shard))
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok::<_, StorageError>)))
            .try_flatten()
            .boxed()
    }

    async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::AwsSdk(e.to_string()))?;
        Ok(())
    }
}
