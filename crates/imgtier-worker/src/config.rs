//! Worker configuration.

use std::str::FromStr;
use std::time::Duration;

use imgtier_models::QualityLevel;
use imgtier_queue::Rejection;
use tracing::warn;

/// Where per-task failure counts are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptTrackerKind {
    /// Local to this process
    Memory,
    /// Shared by every worker through Redis
    Redis,
}

impl FromStr for AttemptTrackerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(format!("unknown attempt tracker: {}", other)),
        }
    }
}

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Derived levels to generate, in order
    pub qualities: Vec<QualityLevel>,
    /// Rejection used when processing fails below the attempt cap
    pub failure_policy: Rejection,
    /// Failures after which a task is discarded; 0 disables the cap
    pub max_attempts: u32,
    pub attempt_tracker: AttemptTrackerKind,
    /// Redis URL for the shared attempt tracker
    pub redis_url: String,
    /// Per-task deadline
    pub task_timeout: Option<Duration>,
    /// Port for the Prometheus scrape endpoint
    pub metrics_port: Option<u16>,
    /// Retries when opening the task channel
    pub connect_retries: u32,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            qualities: QualityLevel::DERIVED.to_vec(),
            failure_policy: Rejection::Requeue,
            max_attempts: 5,
            attempt_tracker: AttemptTrackerKind::Memory,
            redis_url: "redis://localhost:6379".to_string(),
            task_timeout: None,
            metrics_port: None,
            connect_retries: 5,
        }
    }
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            qualities: match std::env::var("WORKER_QUALITIES") {
                Ok(value) => parse_qualities(&value).unwrap_or_else(|e| {
                    warn!("Ignoring WORKER_QUALITIES: {}", e);
                    defaults.qualities.clone()
                }),
                Err(_) => defaults.qualities.clone(),
            },
            failure_policy: std::env::var("WORKER_FAILURE_POLICY")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.failure_policy),
            max_attempts: std::env::var("WORKER_MAX_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_attempts),
            attempt_tracker: std::env::var("WORKER_ATTEMPT_TRACKER")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.attempt_tracker),
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            task_timeout: std::env::var("WORKER_TASK_TIMEOUT_SECS")
                .ok()
                .and_then(|s| s.parse::<u64>().ok())
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs),
            metrics_port: std::env::var("METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            connect_retries: std::env::var("WORKER_CONNECT_RETRIES")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.connect_retries),
        }
    }
}

/// Parse a comma-separated list of derived quality tokens.
///
/// The original level is always stored by ingestion, so it is not a valid
/// entry here. Duplicates keep their first position.
pub fn parse_qualities(value: &str) -> Result<Vec<QualityLevel>, String> {
    let mut qualities = Vec::new();
    for token in value.split(',').map(str::trim).filter(|t| !t.is_empty()) {
        let level: QualityLevel = token.parse().map_err(|e| format!("{}", e))?;
        if level.is_original() {
            return Err("the original level cannot be regenerated".to_string());
        }
        if !qualities.contains(&level) {
            qualities.push(level);
        }
    }

    if qualities.is_empty() {
        return Err("no quality levels given".to_string());
    }
    Ok(qualities)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.qualities, QualityLevel::DERIVED.to_vec());
        assert_eq!(config.failure_policy, Rejection::Requeue);
        assert_eq!(config.max_attempts, 5);
        assert!(config.task_timeout.is_none());
    }

    #[test]
    fn test_parse_qualities() {
        assert_eq!(
            parse_qualities("75, 50,25").unwrap(),
            vec![QualityLevel::High, QualityLevel::Medium, QualityLevel::Low]
        );
        assert_eq!(
            parse_qualities("25,25,75").unwrap(),
            vec![QualityLevel::Low, QualityLevel::High]
        );
        assert!(parse_qualities("100,75").is_err());
        assert!(parse_qualities("80").is_err());
        assert!(parse_qualities(" , ").is_err());
    }

    #[test]
    fn test_tracker_kind_parse() {
        assert_eq!("Redis".parse::<AttemptTrackerKind>().unwrap(), AttemptTrackerKind::Redis);
        assert!("etcd".parse::<AttemptTrackerKind>().is_err());
    }
}
