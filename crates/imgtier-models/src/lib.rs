//! Shared data models for the imgtier pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Image identifiers
//! - Quality levels and their storage tokens
//! - Processing tasks carried on the task channel
//! - Variant sets produced by one processing run

pub mod image;
pub mod quality;
pub mod task;
pub mod variant;

// Re-export common types
pub use image::{ImageId, ImageIdError};
pub use quality::{QualityLevel, QualityParseError};
pub use task::{ProcessingTask, TASK_CONTENT_TYPE};
pub use variant::{VariantSet, VariantSetError};
