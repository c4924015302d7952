//! JPEG codec built on the `image` crate.

use image::codecs::jpeg::JpegEncoder;
use image::{ColorType, ImageFormat};
use tracing::debug;

use crate::codec::Codec;
use crate::error::{MediaError, MediaResult};

/// Input formats accepted for upload by default.
pub const DEFAULT_INPUT_FORMATS: [ImageFormat; 3] =
    [ImageFormat::Jpeg, ImageFormat::Png, ImageFormat::WebP];

/// Decodes JPEG, PNG or WebP input and re-encodes it as baseline JPEG.
#[derive(Debug, Clone)]
pub struct JpegCodec {
    input_formats: Vec<ImageFormat>,
}

impl Default for JpegCodec {
    fn default() -> Self {
        Self {
            input_formats: DEFAULT_INPUT_FORMATS.to_vec(),
        }
    }
}

impl JpegCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restrict or extend the accepted input formats.
    pub fn with_input_formats(mut self, formats: impl IntoIterator<Item = ImageFormat>) -> Self {
        self.input_formats = formats.into_iter().collect();
        self
    }

    fn detect(&self, data: &[u8]) -> MediaResult<ImageFormat> {
        let format = image::guess_format(data)
            .map_err(|e| MediaError::unsupported_format(e.to_string()))?;

        if self.input_formats.contains(&format) {
            Ok(format)
        } else {
            Err(MediaError::unsupported_format(format!("{:?}", format)))
        }
    }
}

impl Codec for JpegCodec {
    fn name(&self) -> &'static str {
        "jpeg"
    }

    fn is_supported(&self, data: &[u8]) -> bool {
        self.detect(data).is_ok()
    }

    fn transcode(&self, data: &[u8], quality: u8) -> MediaResult<Vec<u8>> {
        if quality == 0 || quality > 100 {
            return Err(MediaError::InvalidQuality(quality));
        }

        let format = self.detect(data)?;
        let decoded = image::load_from_memory_with_format(data, format)
            .map_err(|e| MediaError::decode_failed(e.to_string()))?;

        // JPEG has no alpha channel
        let rgb = decoded.to_rgb8();
        let mut out = Vec::with_capacity(data.len() / 2);
        JpegEncoder::new_with_quality(&mut out, quality)
            .encode(rgb.as_raw(), rgb.width(), rgb.height(), ColorType::Rgb8)
            .map_err(|e| MediaError::encode_failed(quality, e.to_string()))?;

        debug!(
            "Transcoded {:?} {}x{} at quality {}: {} -> {} bytes",
            format,
            rgb.width(),
            rgb.height(),
            quality,
            data.len(),
            out.len()
        );

        Ok(out)
    }
}
