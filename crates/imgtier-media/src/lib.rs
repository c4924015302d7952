//! Image codec boundary for the imgtier pipeline.
//!
//! This crate provides:
//! - The `Codec` capability (format check + re-encode at a target quality)
//! - A JPEG codec built on the `image` crate
//! - Variant-set generation for a configured list of quality levels

pub mod codec;
pub mod error;
pub mod jpeg;
pub mod variants;

pub use codec::Codec;
pub use error::{MediaError, MediaResult};
pub use jpeg::JpegCodec;
pub use variants::generate_variants;
