//! Variant processing for one task.

use std::sync::Arc;

use imgtier_media::{generate_variants, Codec};
use imgtier_models::{ProcessingTask, QualityLevel};
use imgtier_storage::BlobStore;
use tracing::debug;

use crate::error::{WorkerError, WorkerResult};
use crate::metrics;

/// What a successful run wrote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// Locator of each persisted derived variant, in configured order.
    pub locators: Vec<(QualityLevel, String)>,
    pub bytes_written: u64,
}

/// Fetches an original, derives its variants and persists them.
///
/// Every variant is generated before the first one is written, so a codec
/// failure leaves the store untouched. Writes overwrite, which makes
/// reprocessing the same task converge to the same state.
#[derive(Clone)]
pub struct VariantProcessor {
    store: Arc<dyn BlobStore>,
    codec: Arc<dyn Codec>,
    qualities: Vec<QualityLevel>,
}

impl VariantProcessor {
    pub fn new(store: Arc<dyn BlobStore>, codec: Arc<dyn Codec>, qualities: Vec<QualityLevel>) -> Self {
        Self {
            store,
            codec,
            qualities,
        }
    }

    pub fn qualities(&self) -> &[QualityLevel] {
        &self.qualities
    }

    pub async fn process(&self, task: &ProcessingTask) -> WorkerResult<ProcessOutcome> {
        let id = &task.id;

        let original = self
            .store
            .get(id, QualityLevel::Original)
            .await
            .map_err(|source| WorkerError::FetchOriginal {
                id: id.clone(),
                source,
            })?;
        debug!(task_id = %id, bytes = original.len(), "Fetched original");

        let codec = Arc::clone(&self.codec);
        let qualities = self.qualities.clone();
        let variants = tokio::task::spawn_blocking(move || {
            generate_variants(codec.as_ref(), &original, &qualities)
        })
        .await
        .map_err(|e| WorkerError::CodecAborted {
            id: id.clone(),
            message: e.to_string(),
        })?
        .map_err(|source| WorkerError::Variants {
            id: id.clone(),
            source,
        })?;

        let mut outcome = ProcessOutcome {
            locators: Vec::with_capacity(self.qualities.len()),
            bytes_written: 0,
        };

        for (quality, data) in variants.derived_in_order(&self.qualities) {
            let locator = self
                .store
                .save(id, quality, data)
                .await
                .map_err(|source| WorkerError::Persist {
                    id: id.clone(),
                    quality,
                    source,
                })?;

            debug!(task_id = %id, quality = %quality, bytes = data.len(), "Persisted variant");
            metrics::record_variant_bytes(quality.token(), data.len());
            outcome.bytes_written += data.len() as u64;
            outcome.locators.push((quality, locator));
        }

        Ok(outcome)
    }
}
