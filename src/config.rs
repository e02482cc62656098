//! Configuration for the report queue.
//!
//! # Example
//!
//! ```
//! use report_queue::QueueConfig;
//!
//! // Minimal config (uses defaults)
//! let config = QueueConfig::new("/tmp/reports");
//! assert_eq!(config.max_retries, 3);
//!
//! // Full config
//! let config = QueueConfig {
//!     max_record_count: 100,
//!     max_store_bytes: 50 * 1024 * 1024, // 50 MB
//!     retry_interval_secs: 30,
//!     ..QueueConfig::new("/tmp/reports")
//! };
//! assert!(config.validate().is_ok());
//! ```

use std::path::PathBuf;
use serde::Deserialize;

use crate::dedup::DedupStrategy;
use crate::error::QueueError;

/// Order in which records within a generation are retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryOrder {
    /// Oldest record in the generation first.
    #[default]
    Fifo,
    /// Most recently added record first.
    Lifo,
}

/// Settings consumed by the queue. All limits treat `0` as "unlimited"
/// except `max_retries`, which must be at least 1.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Directory holding record artifacts.
    pub store_dir: PathBuf,

    /// Maximum number of records held at once (0 = unlimited).
    #[serde(default = "default_max_record_count")]
    pub max_record_count: usize,

    /// Maximum bytes of on-disk artifacts (0 = unlimited).
    #[serde(default)]
    pub max_store_bytes: u64,

    /// Number of retry generations a record passes through before eviction.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Seconds between background drain ticks.
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,

    /// Retrieval order within a generation.
    #[serde(default)]
    pub retry_order: RetryOrder,

    /// Route immediate sends through persistence-first semantics.
    #[serde(default)]
    pub auto_send_mode: bool,

    /// Which payload fields participate in the dedup fingerprint.
    #[serde(default)]
    pub dedup_strategy: DedupStrategy,

    /// Accepted submissions per sliding minute (0 = unlimited).
    #[serde(default = "default_reports_per_minute")]
    pub reports_per_minute: u32,
}

fn default_max_record_count() -> usize { 8 }
fn default_max_retries() -> usize { 3 }
fn default_retry_interval_secs() -> u64 { 60 }
fn default_reports_per_minute() -> u32 { 30 }

impl QueueConfig {
    /// Config with defaults for everything but the store directory.
    pub fn new(store_dir: impl Into<PathBuf>) -> Self {
        Self {
            store_dir: store_dir.into(),
            max_record_count: default_max_record_count(),
            max_store_bytes: 0,
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
            retry_order: RetryOrder::default(),
            auto_send_mode: false,
            dedup_strategy: DedupStrategy::default(),
            reports_per_minute: default_reports_per_minute(),
        }
    }

    /// Validate settings. Called at construction so bad config fails fast,
    /// never at steady-state call time.
    pub fn validate(&self) -> Result<(), QueueError> {
        if self.max_retries == 0 {
            return Err(QueueError::Configuration(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.retry_interval_secs == 0 {
            return Err(QueueError::Configuration(
                "retry_interval_secs must be at least 1".into(),
            ));
        }
        if self.reports_per_minute == u32::MAX {
            return Err(QueueError::Configuration(format!(
                "reports_per_minute of {} is at the counter overflow boundary",
                u32::MAX
            )));
        }
        if self.store_dir.as_os_str().is_empty() {
            return Err(QueueError::Configuration("store_dir is empty".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = QueueConfig::new("/tmp/reports");
        assert_eq!(config.max_record_count, 8);
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_interval_secs, 60);
        assert_eq!(config.retry_order, RetryOrder::Fifo);
        assert!(!config.auto_send_mode);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = QueueConfig {
            max_retries: 0,
            ..QueueConfig::new("/tmp/reports")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_retries"));
    }

    #[test]
    fn test_rate_limit_overflow_boundary_rejected() {
        let config = QueueConfig {
            reports_per_minute: u32::MAX,
            ..QueueConfig::new("/tmp/reports")
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("overflow"));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = QueueConfig {
            retry_interval_secs: 0,
            ..QueueConfig::new("/tmp/reports")
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_store_dir_rejected() {
        let config = QueueConfig::new("");
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let config: QueueConfig =
            serde_json::from_str(r#"{"store_dir": "/var/lib/reports"}"#).unwrap();
        assert_eq!(config.store_dir, PathBuf::from("/var/lib/reports"));
        assert_eq!(config.max_record_count, 8);
        assert_eq!(config.reports_per_minute, 30);
    }

    #[test]
    fn test_deserialize_retry_order() {
        let config: QueueConfig = serde_json::from_str(
            r#"{"store_dir": "/tmp/r", "retry_order": "lifo"}"#,
        )
        .unwrap();
        assert_eq!(config.retry_order, RetryOrder::Lifo);
    }
}
