//! Integration tests for the report queue.
//!
//! Everything runs against a real temp directory and scripted
//! transports; no external services are required.
//!
//! # Test Organization
//! - `lifecycle_*` - start/stop, crash recovery, restart behavior
//! - `drain_*` - periodic drain and full-drain semantics
//! - `dedup_*` - fingerprint collapse across the public API
//! - `limits_*` - capacity and rate limiting end to end

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::tempdir;

use report_queue::{
    DedupStrategy, QueueConfig, QueueError, Report, ReportQueue, RetryOrder, SubmitOutcome,
    Transport, TransportError,
};

// =============================================================================
// Helpers
// =============================================================================

/// Transport whose behavior can be toggled mid-test; records every
/// payload it was asked to deliver.
struct SwitchableTransport {
    up: AtomicBool,
    sends: AtomicUsize,
    delivered: std::sync::Mutex<Vec<String>>,
}

impl SwitchableTransport {
    fn new(up: bool) -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(up),
            sends: AtomicUsize::new(0),
            delivered: std::sync::Mutex::new(Vec::new()),
        })
    }

    fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::SeqCst);
    }

    fn sends(&self) -> usize {
        self.sends.load(Ordering::SeqCst)
    }

    fn delivered(&self) -> Vec<String> {
        self.delivered.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for SwitchableTransport {
    async fn send(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.sends.fetch_add(1, Ordering::SeqCst);
        if self.up.load(Ordering::SeqCst) {
            self.delivered
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(payload).into_owned());
            Ok(())
        } else {
            Err(TransportError::Network("transport offline".into()))
        }
    }
}

fn base_config(dir: &Path) -> QueueConfig {
    QueueConfig {
        dedup_strategy: DedupStrategy::none(),
        reports_per_minute: 0,
        ..QueueConfig::new(dir)
    }
}

fn crash_report(tag: &str) -> Report {
    Report::new(format!("{{\"crash\":\"{tag}\"}}").into_bytes())
        .with_stack([tag, "handler", "main"])
        .with_classifier("Panic")
        .with_message(format!("crashed in {tag}"))
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test]
async fn lifecycle_records_survive_restart() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);

    {
        let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
        queue.start().await.unwrap();
        queue.submit(crash_report("a")).await.unwrap();
        queue.submit(crash_report("b")).await.unwrap();
        assert_eq!(queue.count(), 2);
        queue.stop().await;
    }

    let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
    queue.start().await.unwrap();
    assert_eq!(queue.count(), 2);

    transport.set_up(true);
    assert_eq!(queue.drain_once().await, 2);
    assert_eq!(queue.count(), 0);
    queue.stop().await;
}

#[tokio::test]
async fn lifecycle_stop_start_cycle_keeps_full_store_intact() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let config = QueueConfig {
        max_record_count: 1,
        ..base_config(dir.path())
    };
    let queue = ReportQueue::new(config, transport.clone()).unwrap();
    queue.start().await.unwrap();

    let record = match queue.submit(crash_report("only")).await.unwrap() {
        SubmitOutcome::Queued(record) => record,
        SubmitOutcome::Delivered => panic!("transport is down"),
    };
    let bytes = queue.size_bytes();
    queue.stop().await;

    // Restarting the same instance re-indexes the store; a full (but not
    // over-full) store must come back byte for byte, files included.
    queue.start().await.unwrap();
    assert_eq!(queue.count(), 1);
    assert_eq!(queue.size_bytes(), bytes);
    assert!(record.payload_path.exists());

    transport.set_up(true);
    assert_eq!(queue.drain_once().await, 1);
    queue.stop().await;
}

#[tokio::test]
async fn lifecycle_partial_record_discarded_at_start() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);

    let metadata_path = {
        let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
        queue.start().await.unwrap();
        let outcome = queue.submit(crash_report("torn")).await.unwrap();
        let record = match outcome {
            SubmitOutcome::Queued(record) => record,
            SubmitOutcome::Delivered => panic!("transport is down"),
        };
        queue.stop().await;

        // Simulate a crash mid-save: payload vanished, metadata stayed.
        std::fs::remove_file(&record.payload_path).unwrap();
        record.metadata_path
    };

    let queue = ReportQueue::new(base_config(dir.path()), transport).unwrap();
    queue.start().await.unwrap();

    assert_eq!(queue.count(), 0);
    assert!(!metadata_path.exists(), "orphan metadata must be swept");
    queue.stop().await;
}

#[tokio::test]
async fn lifecycle_stray_files_swept_at_start() {
    let dir = tempdir().unwrap();
    let stray = dir.path().join(format!("{}-attachment.json", uuid::Uuid::new_v4()));
    let half_written = dir.path().join(format!("{}-record.json.tmp", uuid::Uuid::new_v4()));
    std::fs::write(&stray, b"no metadata refers to me").unwrap();
    std::fs::write(&half_written, b"crashed mid-rename").unwrap();

    let queue =
        ReportQueue::new(base_config(dir.path()), SwitchableTransport::new(true)).unwrap();
    queue.start().await.unwrap();

    assert!(!stray.exists());
    assert!(!half_written.exists());
    queue.stop().await;
}

// =============================================================================
// Drain semantics
// =============================================================================

#[tokio::test(start_paused = true)]
async fn drain_timer_retries_until_transport_recovers() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let config = QueueConfig {
        retry_interval_secs: 10,
        max_retries: 10,
        ..base_config(dir.path())
    };

    let queue = ReportQueue::new(config, transport.clone()).unwrap();
    queue.start().await.unwrap();
    queue.submit(crash_report("flaky")).await.unwrap();
    let attempts_after_submit = transport.sends();

    // Two failed timer ticks age the record.
    tokio::time::sleep(Duration::from_secs(25)).await;
    assert!(transport.sends() >= attempts_after_submit + 2);
    assert_eq!(queue.count(), 1);

    transport.set_up(true);
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert_eq!(queue.count(), 0);
    queue.stop().await;
}

#[tokio::test]
async fn drain_failure_ages_whole_front_generation() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
    queue.start().await.unwrap();

    for tag in ["a", "b", "c"] {
        queue.add(&crash_report(tag)).unwrap();
    }

    assert_eq!(queue.drain_once().await, 0);
    let stats = queue.stats();
    assert_eq!(stats.records, 3);
    assert_eq!(stats.generations, vec![0, 3, 0]);
    queue.stop().await;
}

#[tokio::test]
async fn drain_evicts_after_max_retries() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let config = QueueConfig {
        max_retries: 3,
        ..base_config(dir.path())
    };
    let queue = ReportQueue::new(config, transport).unwrap();
    queue.start().await.unwrap();
    queue.add(&crash_report("doomed")).unwrap();

    // Each failed pass ages the record by one generation.
    queue.drain_once().await;
    queue.drain_once().await;
    assert_eq!(queue.count(), 1);

    queue.drain_once().await;
    assert_eq!(queue.count(), 0, "record must be evicted past the horizon");
    assert_eq!(
        std::fs::read_dir(dir.path()).unwrap().count(),
        0,
        "eviction removes artifacts"
    );
    queue.stop().await;
}

#[tokio::test]
async fn drain_fifo_delivery_order() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(true);
    let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
    queue.start().await.unwrap();

    for tag in ["a", "b", "c"] {
        queue.add(&crash_report(tag)).unwrap();
    }

    assert_eq!(queue.drain_once().await, 3);
    assert_eq!(queue.count(), 0);
    let bodies = transport.delivered();
    assert_eq!(
        bodies,
        vec![
            r#"{"crash":"a"}"#.to_string(),
            r#"{"crash":"b"}"#.to_string(),
            r#"{"crash":"c"}"#.to_string(),
        ]
    );
    queue.stop().await;
}

#[tokio::test]
async fn drain_lifo_returns_newest_first() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let config = QueueConfig {
        retry_order: RetryOrder::Lifo,
        ..base_config(dir.path())
    };
    let queue = ReportQueue::new(config, transport.clone()).unwrap();
    queue.start().await.unwrap();

    queue.add(&crash_report("old")).unwrap();
    let newest = queue.add(&crash_report("new")).unwrap();

    // The failing pass touches exactly one record: the newest.
    queue.drain_once().await;
    assert_eq!(transport.sends(), 1);

    // Deliverable now; newest drains first.
    transport.set_up(true);
    queue.delete(newest.id);
    assert_eq!(queue.drain_once().await, 1);
    assert_eq!(transport.delivered(), vec![r#"{"crash":"old"}"#.to_string()]);
    queue.stop().await;
}

#[tokio::test]
async fn flush_is_at_most_once() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let queue = ReportQueue::new(base_config(dir.path()), transport.clone()).unwrap();
    queue.start().await.unwrap();

    for tag in ["a", "b", "c"] {
        queue.add(&crash_report(tag)).unwrap();
    }

    let stats = queue.flush().await;
    assert_eq!(stats.delivered, 0);
    assert_eq!(stats.lost, 3);
    // Popped before send: the failures are gone for good.
    assert_eq!(queue.count(), 0);
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    queue.stop().await;
}

#[tokio::test]
async fn flush_delivers_all_when_transport_up() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(true);
    let config = QueueConfig {
        max_record_count: 0,
        ..base_config(dir.path())
    };
    let queue = ReportQueue::new(config, transport.clone()).unwrap();
    queue.start().await.unwrap();

    for i in 0..10 {
        queue.add(&crash_report(&format!("r{i}"))).unwrap();
    }

    let stats = queue.flush().await;
    assert_eq!(stats.delivered, 10);
    assert_eq!(stats.lost, 0);
    assert_eq!(queue.count(), 0);
    queue.stop().await;
}

// =============================================================================
// Deduplication
// =============================================================================

#[tokio::test]
async fn dedup_collapses_identical_crashes() {
    let dir = tempdir().unwrap();
    let transport = SwitchableTransport::new(false);
    let config = QueueConfig {
        dedup_strategy: DedupStrategy::stack_trace().with_classifier(),
        ..base_config(dir.path())
    };
    let queue = ReportQueue::new(config, transport).unwrap();
    queue.start().await.unwrap();

    let first = match queue.submit(crash_report("same")).await.unwrap() {
        SubmitOutcome::Queued(record) => record,
        SubmitOutcome::Delivered => panic!("transport is down"),
    };
    let second = match queue.submit(crash_report("same")).await.unwrap() {
        SubmitOutcome::Queued(record) => record,
        SubmitOutcome::Delivered => panic!("transport is down"),
    };

    assert_eq!(first.id, second.id);
    assert_eq!(second.duplicate_count, 2);
    assert_eq!(queue.count(), 1);
    queue.stop().await;
}

#[tokio::test]
async fn dedup_fingerprint_override_wins() {
    let dir = tempdir().unwrap();
    let config = QueueConfig {
        dedup_strategy: DedupStrategy::stack_trace(),
        ..base_config(dir.path())
    };
    let queue =
        ReportQueue::new(config, SwitchableTransport::new(false)).unwrap();
    queue.start().await.unwrap();

    // Different stacks, same explicit fingerprint: still one record.
    let a = crash_report("one").with_fingerprint("forced");
    let b = crash_report("two").with_fingerprint("forced");

    let first = queue.add(&a).unwrap();
    let second = queue.add(&b).unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.fingerprint, "forced");
    queue.stop().await;
}

#[tokio::test]
async fn dedup_factor_splits_identical_crashes() {
    let dir = tempdir().unwrap();
    let config = QueueConfig {
        dedup_strategy: DedupStrategy::stack_trace(),
        ..base_config(dir.path())
    };
    let queue =
        ReportQueue::new(config, SwitchableTransport::new(false)).unwrap();
    queue.start().await.unwrap();

    let first = queue.add(&crash_report("same")).unwrap();
    let second = queue
        .add(&crash_report("same").with_factor("second-launch"))
        .unwrap();

    assert_ne!(first.id, second.id);
    assert_eq!(queue.count(), 2);
    queue.stop().await;
}

// =============================================================================
// Limits
// =============================================================================

#[tokio::test]
async fn limits_record_count_rejects_with_capacity_error() {
    let dir = tempdir().unwrap();
    let config = QueueConfig {
        max_record_count: 2,
        ..base_config(dir.path())
    };
    let queue =
        ReportQueue::new(config, SwitchableTransport::new(false)).unwrap();
    queue.start().await.unwrap();

    queue.add(&crash_report("a")).unwrap();
    queue.add(&crash_report("b")).unwrap();
    let err = queue.add(&crash_report("c")).unwrap_err();

    assert!(err.is_capacity());
    assert_eq!(queue.count(), 2);
    queue.stop().await;
}

#[tokio::test]
async fn limits_store_bytes_hold_after_every_add() {
    let dir = tempdir().unwrap();
    let config = QueueConfig {
        max_store_bytes: 2048,
        max_record_count: 0,
        ..base_config(dir.path())
    };
    let queue =
        ReportQueue::new(config, SwitchableTransport::new(false)).unwrap();
    queue.start().await.unwrap();

    for i in 0..20 {
        let _ = queue.add(&crash_report(&format!("r{i}")));
        assert!(queue.size_bytes() <= 2048);
    }
    queue.stop().await;
}

#[tokio::test]
async fn limits_rate_limiter_drops_excess_submissions() {
    let dir = tempdir().unwrap();
    let config = QueueConfig {
        reports_per_minute: 2,
        ..base_config(dir.path())
    };
    let queue =
        ReportQueue::new(config, SwitchableTransport::new(true)).unwrap();
    queue.start().await.unwrap();

    assert!(queue.submit(crash_report("1")).await.is_ok());
    assert!(queue.submit(crash_report("2")).await.is_ok());
    let err = queue.submit(crash_report("3")).await.unwrap_err();
    assert!(matches!(err, QueueError::RateLimited));

    // Dropped means dropped: nothing queued for retry.
    assert_eq!(queue.count(), 0);
    queue.stop().await;
}
