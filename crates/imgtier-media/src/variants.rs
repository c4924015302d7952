//! Variant-set generation.

use imgtier_models::{QualityLevel, VariantSet};
use tracing::debug;

use crate::codec::Codec;
use crate::error::{MediaError, MediaResult};

/// Produce the full variant set for `original`.
///
/// The original is carried through untouched; each derived level is
/// transcoded in the order given. The first failure aborts the run, so a
/// returned set always holds every requested level.
pub fn generate_variants(
    codec: &dyn Codec,
    original: &[u8],
    derived: &[QualityLevel],
) -> MediaResult<VariantSet> {
    if !codec.is_supported(original) {
        return Err(MediaError::unsupported_format(format!(
            "{} codec cannot decode the input",
            codec.name()
        )));
    }

    let mut variants = VariantSet::from_original(original.to_vec());

    for level in derived.iter().copied().filter(|level| !level.is_original()) {
        let encoded = codec.transcode(original, level.percent())?;
        debug!("Generated quality {} ({} bytes)", level, encoded.len());
        variants.insert_derived(level, encoded)?;
    }

    variants.ensure_complete(derived)?;
    Ok(variants)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jpeg::tests::sample_jpeg;
    use crate::JpegCodec;

    /// Fails on one specific quality.
    struct FailingAt(u8);

    impl Codec for FailingAt {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn is_supported(&self, _data: &[u8]) -> bool {
            true
        }

        fn transcode(&self, data: &[u8], quality: u8) -> MediaResult<Vec<u8>> {
            if quality == self.0 {
                Err(MediaError::encode_failed(quality, "boom"))
            } else {
                Ok(data[..data.len().min(4)].to_vec())
            }
        }
    }

    #[test]
    fn test_complete_variant_set() {
        let original = sample_jpeg();
        let set = generate_variants(&JpegCodec::new(), &original, &QualityLevel::DERIVED).unwrap();

        assert_eq!(set.levels(), QualityLevel::ALL.to_vec());
        assert_eq!(set.original(), original.as_slice());

        let sizes: Vec<usize> = QualityLevel::ALL
            .iter()
            .map(|level| set.get(*level).unwrap().len())
            .collect();
        // 100 > 75 > 50 > 25
        assert!(sizes.windows(2).all(|pair| pair[0] > pair[1]), "{sizes:?}");
    }

    #[test]
    fn test_unsupported_input_is_rejected() {
        let result = generate_variants(&JpegCodec::new(), b"plain text", &QualityLevel::DERIVED);
        assert!(matches!(result, Err(MediaError::UnsupportedFormat(_))));
    }

    #[test]
    fn test_transcode_failure_aborts_whole_set() {
        let result = generate_variants(&FailingAt(50), b"data", &QualityLevel::DERIVED);
        assert!(matches!(
            result,
            Err(MediaError::EncodeFailed { quality: 50, .. })
        ));
    }

    #[test]
    fn test_configured_subset() {
        let set = generate_variants(&FailingAt(0), b"data", &[QualityLevel::Low]).unwrap();
        assert_eq!(set.levels(), vec![QualityLevel::Original, QualityLevel::Low]);
    }
}
