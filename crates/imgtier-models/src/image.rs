//! Image identifiers.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// Minimum identifier length; the shard prefix is taken from the first characters.
pub const MIN_ID_LEN: usize = 2;

/// Maximum identifier length accepted for storage keys.
pub const MAX_ID_LEN: usize = 128;

/// Reasons an identifier cannot be used as a storage key.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ImageIdError {
    #[error("identifier is shorter than 2 characters: {0:?}")]
    TooShort(String),

    #[error("identifier is longer than 128 characters")]
    TooLong,

    #[error("identifier contains a character outside [A-Za-z0-9_-]: {0:?}")]
    InvalidCharacter(String),
}

/// Unique identifier for an uploaded image.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct ImageId(pub String);

impl ImageId {
    /// Generate a new random image ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that the identifier is safe to embed in a storage path.
    ///
    /// Only ASCII alphanumerics, `-` and `_` are accepted, so the identifier
    /// can never traverse out of its shard directory.
    pub fn validate(&self) -> Result<(), ImageIdError> {
        if self.0.len() < MIN_ID_LEN {
            return Err(ImageIdError::TooShort(self.0.clone()));
        }
        if self.0.len() > MAX_ID_LEN {
            return Err(ImageIdError::TooLong);
        }
        if !self
            .0
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(ImageIdError::InvalidCharacter(self.0.clone()));
        }
        Ok(())
    }
}

impl Default for ImageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for ImageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for ImageId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
