//! Quality levels.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a quality token cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown quality level: {0:?} (expected one of 100, 75, 50, 25)")]
pub struct QualityParseError(pub String);

/// Encode-target tier for a stored image.
///
/// Serialized as its quality token ("100", "75", "50", "25"), which is also
/// the token used in storage keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum QualityLevel {
    /// Uploaded bytes, stored verbatim
    #[serde(rename = "100")]
    Original,
    #[serde(rename = "75")]
    High,
    #[serde(rename = "50")]
    Medium,
    #[serde(rename = "25")]
    Low,
}

impl QualityLevel {
    /// Every level, original first.
    pub const ALL: [QualityLevel; 4] = [
        QualityLevel::Original,
        QualityLevel::High,
        QualityLevel::Medium,
        QualityLevel::Low,
    ];

    /// Levels derived from the original by re-encoding.
    pub const DERIVED: [QualityLevel; 3] =
        [QualityLevel::High, QualityLevel::Medium, QualityLevel::Low];

    /// Numeric encode target in percent.
    pub fn percent(&self) -> u8 {
        match self {
            QualityLevel::Original => 100,
            QualityLevel::High => 75,
            QualityLevel::Medium => 50,
            QualityLevel::Low => 25,
        }
    }

    /// Token used in storage keys and wire payloads.
    pub fn token(&self) -> &'static str {
        match self {
            QualityLevel::Original => "100",
            QualityLevel::High => "75",
            QualityLevel::Medium => "50",
            QualityLevel::Low => "25",
        }
    }

    /// Exact token lookup, as used in storage keys and on the HTTP API.
    pub fn from_token(token: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|level| level.token() == token)
    }

    pub fn is_original(&self) -> bool {
        matches!(self, QualityLevel::Original)
    }
}

impl fmt::Display for QualityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for QualityLevel {
    type Err = QualityParseError;

    /// Accepts the storage token or the level name, case-insensitively.
    ///
    /// Meant for configuration; boundaries that take tokens only use
    /// `from_token`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "100" | "original" => Ok(QualityLevel::Original),
            "75" | "high" => Ok(QualityLevel::High),
            "50" | "medium" => Ok(QualityLevel::Medium),
            "25" | "low" => Ok(QualityLevel::Low),
            _ => Err(QualityParseError(s.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokens_match_percent() {
        for level in QualityLevel::ALL {
            assert_eq!(level.token(), level.percent().to_string());
        }
    }

    #[test]
    fn test_parse_tokens_and_names() {
        assert_eq!("75".parse::<QualityLevel>().unwrap(), QualityLevel::High);
        assert_eq!("Low".parse::<QualityLevel>().unwrap(), QualityLevel::Low);
        assert_eq!(
            "original".parse::<QualityLevel>().unwrap(),
            QualityLevel::Original
        );
        assert!("90".parse::<QualityLevel>().is_err());
    }

    #[test]
    fn test_from_token_is_exact() {
        assert_eq!(QualityLevel::from_token("100"), Some(QualityLevel::Original));
        assert_eq!(QualityLevel::from_token("25"), Some(QualityLevel::Low));
        assert_eq!(QualityLevel::from_token("high"), None);
        assert_eq!(QualityLevel::from_token(" 75"), None);
        assert_eq!(QualityLevel::from_token("075"), None);
    }

    #[test]
    fn test_serializes_as_token() {
        let json = serde_json::to_string(&QualityLevel::Medium).unwrap();
        assert_eq!(json, "\"50\"");
        let level: QualityLevel = serde_json::from_str("\"25\"").unwrap();
        assert_eq!(level, QualityLevel::Low);
    }

    #[test]
    fn test_derived_excludes_original() {
        assert!(QualityLevel::DERIVED.iter().all(|q| !q.is_original()));
    }
}
