//! The queue facade: lifecycle, submission, and the operations the rest
//! of the reporting client calls.
//!
//! Wires the record store, rate limiter and drain orchestrator together
//! and owns the background timer task. The timer is explicit state with
//! a `start`/`stop` lifecycle; nothing global.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::drain::{DrainOrchestrator, FlushStats};
use crate::error::QueueError;
use crate::metrics;
use crate::rate_limit::RateLimiter;
use crate::record::Record;
use crate::report::Report;
use crate::store::{RecordStore, StoreStats};
use crate::transport::Transport;

/// What happened to an immediately-submitted report.
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Delivered; nothing remains on disk.
    Delivered,
    /// Delivery failed (or was skipped); the report is persisted for
    /// background retry.
    Queued(Record),
}

/// Persistent offline queue for crash/error reports.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use report_queue::{QueueConfig, Report, ReportQueue, NullTransport};
///
/// # async fn example() -> Result<(), report_queue::QueueError> {
/// let config = QueueConfig::new("/var/lib/my-app/reports");
/// let queue = ReportQueue::new(config, Arc::new(NullTransport))?;
/// queue.start().await?;
///
/// let report = Report::new(br#"{"error":"oops"}"#.to_vec());
/// queue.submit(report).await?;
///
/// queue.stop().await;
/// # Ok(())
/// # }
/// ```
pub struct ReportQueue {
    config: QueueConfig,
    store: Arc<RecordStore>,
    limiter: RateLimiter,
    drain: Arc<DrainOrchestrator>,
    /// Shutdown channel and task handle for the running drain loop.
    runner: Mutex<Option<(watch::Sender<bool>, JoinHandle<()>)>>,
}

impl ReportQueue {
    /// Construct the queue. Configuration problems (zero retries, rate
    /// limit at the overflow boundary) fail here, never at steady state.
    pub fn new(config: QueueConfig, transport: Arc<dyn Transport>) -> Result<Self, QueueError> {
        config.validate()?;
        let limiter = RateLimiter::per_minute(config.reports_per_minute)?;
        let store = Arc::new(RecordStore::new(&config));
        let drain = Arc::new(DrainOrchestrator::new(store.clone(), transport));
        Ok(Self {
            config,
            store,
            limiter,
            drain,
            runner: Mutex::new(None),
        })
    }

    /// Load persisted records (discarding invalid ones, sweeping
    /// orphans) and start the background drain timer. A second call
    /// while running is a no-op.
    #[tracing::instrument(skip(self))]
    pub async fn start(&self) -> Result<(), QueueError> {
        let mut runner = self.runner.lock().await;
        if runner.is_some() {
            debug!("Queue already started");
            return Ok(());
        }

        let loaded = self.store.load_from_disk()?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = Duration::from_secs(self.config.retry_interval_secs);
        let handle = tokio::spawn(self.drain.clone().run(interval, shutdown_rx));
        *runner = Some((shutdown_tx, handle));

        info!(records = loaded, "Report queue started");
        Ok(())
    }

    /// Stop the background timer and release any in-flight locks.
    #[tracing::instrument(skip(self))]
    pub async fn stop(&self) {
        let mut runner = self.runner.lock().await;
        if let Some((shutdown_tx, handle)) = runner.take() {
            let _ = shutdown_tx.send(true);
            if let Err(e) = handle.await {
                warn!(error = %e, "Drain task ended abnormally");
            }
        }
        // Locked-but-stuck records must unlock on shutdown.
        self.store.unlock_all();
        info!("Report queue stopped");
    }

    /// Immediate-send path used by the client's report API.
    ///
    /// The rate limiter gates everything: a rejected submission is
    /// dropped and reported, never queued for retry. Otherwise delivery
    /// is attempted first and the report persisted only on failure,
    /// unless `auto_send_mode` is set, which persists first and deletes
    /// on successful delivery.
    pub async fn submit(&self, report: Report) -> Result<SubmitOutcome, QueueError> {
        if !self.limiter.allow(Instant::now()) {
            metrics::record_rate_limited();
            warn!("Submission dropped by rate limiter");
            return Err(QueueError::RateLimited);
        }

        if self.config.auto_send_mode {
            let record = self.store.add(&report)?;
            if !self.store.try_lock(record.id) {
                // Already in flight on the background path.
                return Ok(SubmitOutcome::Queued(record));
            }
            match self.drain.deliver(&report.body).await {
                Ok(()) => {
                    self.store.delete(record.id);
                    Ok(SubmitOutcome::Delivered)
                }
                Err(e) => {
                    debug!(id = %record.id, error = %e, "Immediate delivery failed, record queued");
                    self.store.unlock(record.id);
                    Ok(SubmitOutcome::Queued(record))
                }
            }
        } else {
            match self.drain.deliver(&report.body).await {
                Ok(()) => Ok(SubmitOutcome::Delivered),
                Err(e) => {
                    debug!(error = %e, "Immediate delivery failed, persisting report");
                    let record = self.store.add(&report)?;
                    Ok(SubmitOutcome::Queued(record))
                }
            }
        }
    }

    /// Persist a report without attempting delivery.
    pub fn add(&self, report: &Report) -> Result<Record, QueueError> {
        self.store.add(report)
    }

    /// Remove a record by id. False if unknown.
    pub fn delete(&self, id: Uuid) -> bool {
        self.store.delete(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.store.count()
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.store.size_bytes()
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        self.store.stats()
    }

    /// Delete every record, index and disk artifacts both.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Immediate full drain. At-most-once: records are removed before
    /// their single delivery attempt (see [`DrainOrchestrator::flush`]).
    pub async fn flush(&self) -> FlushStats {
        self.drain.flush().await
    }

    /// Run one drain pass right now instead of waiting for the timer.
    pub async fn drain_once(&self) -> usize {
        self.drain.tick().await
    }
}
