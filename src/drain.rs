// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Drain orchestration: the timer-driven retry loop and the immediate
//! full drain.
//!
//! A periodic tick pulls eligible records from the store and attempts
//! delivery, deleting on success and aging the whole front generation on
//! the first failure. Ticks are single-flight: a tick that fires while a
//! drain is in progress is a no-op.
//!
//! The full drain (`flush`) trades safety for completion: each record is
//! removed from the store *before* its one delivery attempt, so a
//! transport failure during `flush` loses that record for good
//! (at-most-once, best effort).

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::metrics;
use crate::store::RecordStore;
use crate::transport::{Transport, TransportError};

/// Outcome of a full drain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FlushStats {
    /// Records delivered and removed.
    pub delivered: usize,
    /// Records removed whose single delivery attempt failed.
    pub lost: usize,
}

/// Pulls eligible records from the store and reconciles delivery
/// outcomes. Owned scheduler state, no globals: the caller holds the
/// shutdown channel and the task handle.
pub struct DrainOrchestrator {
    store: Arc<RecordStore>,
    transport: Arc<dyn Transport>,
    draining: AtomicBool,
}

impl DrainOrchestrator {
    pub fn new(store: Arc<RecordStore>, transport: Arc<dyn Transport>) -> Self {
        Self {
            store,
            transport,
            draining: AtomicBool::new(false),
        }
    }

    /// One drain pass. Keeps delivering while attempts succeed; the
    /// first failure unlocks the record, ages the whole front generation
    /// and ends the pass. Returns the number of records delivered.
    pub async fn tick(&self) -> usize {
        if self.draining.swap(true, Ordering::AcqRel) {
            // A tick is already running; this one is a no-op.
            return 0;
        }
        let _guard = DrainGuard(&self.draining);

        let mut delivered = 0;
        loop {
            let Some(record) = self.store.next_eligible() else {
                break;
            };
            let payload = match self.store.payload_bytes(record.id) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(id = %record.id, error = %e, "Dropping record with unreadable payload");
                    self.store.delete(record.id);
                    continue;
                }
            };

            match self.deliver(&payload).await {
                Ok(()) => {
                    self.store.delete(record.id);
                    delivered += 1;
                    debug!(id = %record.id, "Record delivered and removed");
                }
                Err(e) => {
                    warn!(
                        id = %record.id,
                        generation = record.generation,
                        error = %e,
                        "Delivery failed, aging front generation"
                    );
                    self.store.unlock(record.id);
                    self.store.advance_generation();
                    break;
                }
            }
        }

        if delivered > 0 {
            debug!(delivered, "Drain tick complete");
        }
        delivered
    }

    /// Synchronous full drain: pop-then-send until the store is empty.
    /// Failures are counted, logged and *not* re-queued.
    pub async fn flush(&self) -> FlushStats {
        let mut stats = FlushStats::default();
        while let Some((record, payload)) = self.store.take_next() {
            match self.deliver(&payload).await {
                Ok(()) => stats.delivered += 1,
                Err(e) => {
                    stats.lost += 1;
                    warn!(id = %record.id, error = %e, "Report lost during full drain");
                }
            }
        }
        info!(delivered = stats.delivered, lost = stats.lost, "Full drain complete");
        stats
    }

    /// One delivery attempt with outcome metrics. Timeouts inside the
    /// transport surface here as ordinary failures.
    pub async fn deliver(&self, payload: &[u8]) -> Result<(), TransportError> {
        let _timer = metrics::LatencyTimer::start();
        match self.transport.send(payload).await {
            Ok(()) => {
                metrics::record_delivery("success");
                Ok(())
            }
            Err(e) => {
                metrics::record_delivery("failure");
                Err(e)
            }
        }
    }

    /// Timer loop driving periodic ticks until shutdown is signalled.
    /// The first tick fires one interval after start, not immediately.
    pub async fn run(self: Arc<Self>, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // consume the immediate first tick

        info!(interval_secs = interval.as_secs(), "Drain loop started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.tick().await;
                }
                _ = shutdown.changed() => {
                    break;
                }
            }
        }
        debug!("Drain loop stopped");
    }
}

/// RAII guard resetting the single-flight flag.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
