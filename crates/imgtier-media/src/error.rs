//! Error types for media operations.

use thiserror::Error;

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while validating or re-encoding an image.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Invalid quality {0}, expected 1..=100")]
    InvalidQuality(u8),

    #[error("Decode failed: {0}")]
    DecodeFailed(String),

    #[error("Encode at quality {quality} failed: {message}")]
    EncodeFailed { quality: u8, message: String },

    #[error("Variant set incomplete: {0}")]
    Incomplete(#[from] imgtier_models::VariantSetError),
}

impl MediaError {
    pub fn unsupported_format(msg: impl Into<String>) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    pub fn decode_failed(msg: impl Into<String>) -> Self {
        Self::DecodeFailed(msg.into())
    }

    pub fn encode_failed(quality: u8, msg: impl Into<String>) -> Self {
        Self::EncodeFailed {
            quality,
            message: msg.into(),
        }
    }
}
