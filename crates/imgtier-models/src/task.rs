//! Processing task carried on the task channel.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::ImageId;

/// Content type tag attached to every published task payload.
pub const TASK_CONTENT_TYPE: &str = "application/json";

/// Request to derive the quality variants of a stored original.
///
/// Wire format: `{"id": "<image id>", "filePath": "<locator of the original>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ProcessingTask {
    /// Image the task refers to
    pub id: ImageId,
    /// Locator of the stored original, as returned by the blob store
    #[serde(rename = "filePath")]
    pub source_path: String,
}

impl ProcessingTask {
    pub fn new(id: ImageId, source_path: impl Into<String>) -> Self {
        Self {
            id,
            source_path: source_path.into(),
        }
    }

    /// Serialize to the UTF-8 JSON wire payload.
    pub fn to_payload(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    /// Parse a wire payload.
    pub fn from_payload(payload: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_field_names() {
        let task = ProcessingTask::new(ImageId::from("a1b2"), "storage/a1/a1b2_100.jpg");
        let value: serde_json::Value = serde_json::from_slice(&task.to_payload().unwrap()).unwrap();

        assert_eq!(value["id"], "a1b2");
        assert_eq!(value["filePath"], "storage/a1/a1b2_100.jpg");
        assert_eq!(value.as_object().unwrap().len(), 2);
    }

    #[test]
    fn test_payload_roundtrip() {
        let task = ProcessingTask::new(ImageId::new(), "storage/xx/original.jpg");
        let decoded = ProcessingTask::from_payload(&task.to_payload().unwrap()).unwrap();
        assert_eq!(decoded, task);
    }

    #[test]
    fn test_missing_field_is_rejected() {
        assert!(ProcessingTask::from_payload(br#"{"id":"a1b2"}"#).is_err());
        assert!(ProcessingTask::from_payload(b"not json").is_err());
    }
}
