use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced to callers of the queue.
///
/// Transient delivery and file I/O failures are absorbed into state
/// transitions (unlock, advance, evict) and never reach the caller; only
/// capacity, rate-limit, persistence and configuration problems do.
#[derive(Error, Debug)]
pub enum QueueError {
    #[error("record limit reached: {count} records (max {max})")]
    RecordLimit { count: usize, max: usize },

    #[error("store size limit reached: {stored} + {incoming} bytes (max {max})")]
    SizeLimit { stored: u64, incoming: u64, max: u64 },

    #[error("failed to persist record {id} to {}: {source}", path.display())]
    Persistence {
        id: Uuid,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("submission rate limit reached, report dropped")]
    RateLimited,

    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl QueueError {
    /// True for the capacity family (`RecordLimit` / `SizeLimit`).
    ///
    /// Capacity rejections are caller-visible and never retried
    /// automatically; callers typically branch on this.
    #[must_use]
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::RecordLimit { .. } | Self::SizeLimit { .. })
    }
}
