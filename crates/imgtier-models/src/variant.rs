//! Variant sets produced by one processing run.

use std::collections::HashMap;

use thiserror::Error;

use crate::QualityLevel;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VariantSetError {
    #[error("the original level is fixed when the set is created")]
    OriginalOverwrite,

    #[error("variant set is missing quality levels: {0:?}")]
    Incomplete(Vec<QualityLevel>),
}

/// Mapping of quality level to encoded bytes.
///
/// The original is supplied at construction and never changes, so a set
/// always contains it byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantSet {
    variants: HashMap<QualityLevel, Vec<u8>>,
}

impl VariantSet {
    /// Start a set from the original upload.
    pub fn from_original(original: Vec<u8>) -> Self {
        let mut variants = HashMap::with_capacity(QualityLevel::ALL.len());
        variants.insert(QualityLevel::Original, original);
        Self { variants }
    }

    /// Add a derived level, replacing any previous bytes for it.
    pub fn insert_derived(
        &mut self,
        level: QualityLevel,
        data: Vec<u8>,
    ) -> Result<(), VariantSetError> {
        if level.is_original() {
            return Err(VariantSetError::OriginalOverwrite);
        }
        self.variants.insert(level, data);
        Ok(())
    }

    pub fn original(&self) -> &[u8] {
        self.variants
            .get(&QualityLevel::Original)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn get(&self, level: QualityLevel) -> Option<&[u8]> {
        self.variants.get(&level).map(Vec::as_slice)
    }

    pub fn contains(&self, level: QualityLevel) -> bool {
        self.variants.contains_key(&level)
    }

    pub fn len(&self) -> usize {
        self.variants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variants.is_empty()
    }

    /// Levels present in the set, in `QualityLevel::ALL` order.
    pub fn levels(&self) -> Vec<QualityLevel> {
        QualityLevel::ALL
            .into_iter()
            .filter(|level| self.variants.contains_key(level))
            .collect()
    }

    /// Check that every required level is present.
    pub fn ensure_complete(&self, required: &[QualityLevel]) -> Result<(), VariantSetError> {
        let missing: Vec<QualityLevel> = required
            .iter()
            .copied()
            .filter(|level| !self.variants.contains_key(level))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(VariantSetError::Incomplete(missing))
        }
    }

    /// Derived variants in the order given, skipping levels not in the set.
    pub fn derived_in_order<'a>(
        &'a self,
        order: &'a [QualityLevel],
    ) -> impl Iterator<Item = (QualityLevel, &'a [u8])> + 'a {
        order
            .iter()
            .copied()
            .filter(|level| !level.is_original())
            .filter_map(|level| self.get(level).map(|data| (level, data)))
    }
}
