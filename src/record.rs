//! Durable record metadata.
//!
//! A [`Record`] is the unit of undelivered work: the index entry for a
//! payload persisted on disk. The record itself is what gets serialized
//! into the `<id>-record.json` metadata file; the payload bytes live in
//! their own file and the duplicate counter in a third (see
//! [`crate::storage::entry`]).

use std::path::PathBuf;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Index entry for one persisted, retryable report.
///
/// Records hold no reference back to the owning store; the store looks
/// them up by id in its own table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    /// Stable unique identifier, generated at creation.
    pub id: Uuid,
    /// Deduplication fingerprint (computed or caller-supplied).
    pub fingerprint: String,
    /// Retry generation, 0-based. Only ever increases.
    pub generation: usize,
    /// Exact bytes on disk: payload + metadata + attachment. Measured
    /// from file lengths at save time and re-measured at load, never
    /// trusted from serialized state.
    #[serde(skip)]
    pub size_bytes: u64,
    /// Persisted payload blob.
    pub payload_path: PathBuf,
    /// This metadata file.
    pub metadata_path: PathBuf,
    /// Loosely-coupled dump file, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment_path: Option<PathBuf>,

    /// Number of equivalent payloads observed (>= 1). Persisted in the
    /// counter file, not here, so it survives without rewriting metadata.
    #[serde(skip, default = "default_duplicate_count")]
    pub duplicate_count: u32,
    /// True while a delivery attempt is in flight.
    #[serde(skip)]
    pub locked: bool,
}

fn default_duplicate_count() -> u32 {
    1
}

impl Record {
    /// Fresh generation-0 record. Paths and size are filled in by the
    /// entry writer at save time.
    pub(crate) fn new(fingerprint: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            fingerprint,
            generation: 0,
            size_bytes: 0,
            payload_path: PathBuf::new(),
            metadata_path: PathBuf::new(),
            attachment_path: None,
            duplicate_count: 1,
            locked: false,
        }
    }
}
