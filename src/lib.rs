//! # Report Queue
//!
//! The offline-resilience core of a crash/error-reporting client: a
//! persistent local queue that buffers report payloads when they cannot
//! be delivered immediately, retries delivery on a schedule, enforces
//! storage limits, deduplicates repeated identical failures and
//! throttles submission rate.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Submit Path                            │
//! │  • Rate limiter gate (sliding one-minute window)           │
//! │  • Immediate delivery attempt via Transport                │
//! │  • Persist on failure (or persist-first in auto-send mode) │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                 Record Store (generations)                  │
//! │  • Gen 0: never retried … Gen N-1: last chance             │
//! │  • FIFO/LIFO within a generation, dedup by fingerprint     │
//! │  • Count/byte capacity limits (reject, never evict)        │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    On-Disk Artifacts                        │
//! │  • <id>-record.json     metadata                           │
//! │  • <id>-attachment.json payload blob                       │
//! │  • <id>-counter.json    duplicate count                    │
//! │  • temp-file + rename writes; orphans swept at start       │
//! └─────────────────────────────────────────────────────────────┘
//!                              ▲
//!                              │ (timer tick)
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   Drain Orchestrator                        │
//! │  • Single-flight periodic drain, lowest generation first   │
//! │  • Success deletes; first failure ages the front and stops │
//! │  • flush(): pop-then-send full drain (at-most-once)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use report_queue::{QueueConfig, Report, ReportQueue, NullTransport};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), report_queue::QueueError> {
//!     let config = QueueConfig {
//!         max_record_count: 100,
//!         retry_interval_secs: 30,
//!         ..QueueConfig::new("/var/lib/my-app/reports")
//!     };
//!
//!     // Inject the real HTTP transport here; NullTransport discards.
//!     let queue = ReportQueue::new(config, Arc::new(NullTransport))?;
//!     queue.start().await?;
//!
//!     let report = Report::new(br#"{"error":"oops"}"#.to_vec())
//!         .with_classifier("Panic")
//!         .with_stack(["main", "do_work"]);
//!     queue.submit(report).await?;
//!
//!     queue.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Modules
//!
//! - [`queue`]: the [`ReportQueue`] facade wiring everything together
//! - [`store`]: generational record store (add/advance/evict/order)
//! - [`storage`]: atomic on-disk artifact reader/writer
//! - [`dedup`]: content fingerprinting under a configurable strategy
//! - [`rate_limit`]: sliding-window submission limiter
//! - [`drain`]: periodic retry loop and full drain
//! - [`transport`]: delivery capability boundary

pub mod config;
pub mod dedup;
pub mod drain;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod rate_limit;
pub mod record;
pub mod report;
pub mod storage;
pub mod store;
pub mod transport;

pub use config::{QueueConfig, RetryOrder};
pub use dedup::{fingerprint, DedupStrategy};
pub use drain::{DrainOrchestrator, FlushStats};
pub use error::QueueError;
pub use queue::{ReportQueue, SubmitOutcome};
pub use rate_limit::RateLimiter;
pub use record::Record;
pub use report::Report;
pub use store::{RecordStore, StoreStats};
pub use transport::{NullTransport, Transport, TransportError};
