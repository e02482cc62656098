// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Generational record store.
//!
//! The store indexes persisted records into retry generations: bucket 0
//! holds records that have never been retried, bucket N-1 records on
//! their last chance. A failed drain tick ages the whole front of the
//! queue by one generation; records pushed past the horizon are evicted
//! for good.
//!
//! The generation table is the only structure mutated by both the
//! background drain task and foreground callers, so all index state
//! lives behind one mutex. File I/O for a record happens while its
//! index entry is owned by the current operation, never concurrently
//! for the same id.

use std::collections::{HashMap, VecDeque};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{QueueConfig, RetryOrder};
use crate::dedup::{self, DedupStrategy};
use crate::error::QueueError;
use crate::metrics;
use crate::record::Record;
use crate::report::Report;
use crate::storage::EntryWriter;

/// Point-in-time view of the store, in the shape of a stats snapshot.
#[derive(Debug, Clone)]
pub struct StoreStats {
    /// Live records.
    pub records: usize,
    /// Exact on-disk bytes across all records.
    pub store_bytes: u64,
    /// Record count per generation, index 0 first.
    pub generations: Vec<usize>,
}

struct StoreInner {
    records: HashMap<Uuid, Record>,
    /// One ordered bucket per generation; front = earliest inserted.
    generations: Vec<VecDeque<Uuid>>,
    /// Live fingerprint -> record id, maintained only while dedup is on.
    by_fingerprint: HashMap<String, Uuid>,
    total_bytes: u64,
}

/// In-memory index over persisted records, organized by retry
/// generation. Owns all add/lookup/advance/evict logic.
pub struct RecordStore {
    writer: EntryWriter,
    max_record_count: usize,
    max_store_bytes: u64,
    max_retries: usize,
    retry_order: RetryOrder,
    dedup_strategy: DedupStrategy,
    inner: Mutex<StoreInner>,
}

impl RecordStore {
    pub fn new(config: &QueueConfig) -> Self {
        Self {
            writer: EntryWriter::new(&config.store_dir),
            max_record_count: config.max_record_count,
            max_store_bytes: config.max_store_bytes,
            max_retries: config.max_retries,
            retry_order: config.retry_order,
            dedup_strategy: config.dedup_strategy,
            inner: Mutex::new(StoreInner {
                records: HashMap::new(),
                generations: (0..config.max_retries).map(|_| VecDeque::new()).collect(),
                by_fingerprint: HashMap::new(),
                total_bytes: 0,
            }),
        }
    }

    /// Persist and index a report.
    ///
    /// With dedup enabled, an equivalent live record absorbs the report:
    /// its duplicate count is bumped (and persisted) and the existing
    /// record is returned. Capacity limits reject the add outright;
    /// nothing is evicted to make room. A failed physical save also
    /// rejects, so the caller can drop the report knowingly instead of
    /// losing it silently.
    pub fn add(&self, report: &Report) -> Result<Record, QueueError> {
        let fingerprint = dedup::fingerprint(report, self.dedup_strategy);

        // First pass under the lock: collapse duplicates and fail fast on
        // the count limit. File I/O stays outside the critical section.
        if let Some(snapshot) = self.collapse_duplicate(&fingerprint)? {
            return Ok(snapshot);
        }

        let mut record = Record::new(fingerprint.clone());
        record.attachment_path = report.attachment.clone();
        self.writer.save(&mut record, &report.body)?;

        // Second pass: index the saved record, unless the store changed
        // underneath us while the save ran.
        enum Reject {
            Duplicate(Record),
            Count(usize),
            Size(u64),
        }
        let rejected = {
            let mut inner = self.inner.lock();
            if self.dedup_strategy.enabled() && inner.by_fingerprint.contains_key(&fingerprint) {
                // A concurrent add of the same fingerprint won the race.
                match self.bump_duplicate(&mut inner, &fingerprint) {
                    Some(snapshot) => Reject::Duplicate(snapshot),
                    None => Reject::Count(inner.records.len()),
                }
            } else if self.max_record_count > 0
                && inner.records.len() >= self.max_record_count
            {
                Reject::Count(inner.records.len())
            } else if self.max_store_bytes > 0
                && inner.total_bytes + record.size_bytes > self.max_store_bytes
            {
                // Size is only exact after the save; reject-and-remove
                // keeps the byte invariant without guessing at serialized
                // lengths.
                Reject::Size(inner.total_bytes)
            } else {
                inner.total_bytes += record.size_bytes;
                inner.generations[0].push_back(record.id);
                if self.dedup_strategy.enabled() {
                    inner.by_fingerprint.insert(fingerprint, record.id);
                }
                inner.records.insert(record.id, record.clone());
                let records = inner.records.len();
                let bytes = inner.total_bytes;
                drop(inner);

                metrics::record_added(record.size_bytes);
                metrics::set_store_gauges(records, bytes);
                debug!(
                    id = %record.id,
                    size_bytes = record.size_bytes,
                    "Record added to generation 0"
                );
                return Ok(record);
            }
        };

        self.writer.delete(&record);
        match rejected {
            Reject::Duplicate(snapshot) => {
                self.writer.write_counter(snapshot.id, snapshot.duplicate_count);
                metrics::record_duplicate();
                Ok(snapshot)
            }
            Reject::Count(count) => {
                metrics::record_rejected("record_limit");
                Err(QueueError::RecordLimit {
                    count,
                    max: self.max_record_count,
                })
            }
            Reject::Size(stored) => {
                metrics::record_rejected("size_limit");
                Err(QueueError::SizeLimit {
                    stored,
                    incoming: record.size_bytes,
                    max: self.max_store_bytes,
                })
            }
        }
    }

    /// Collapse into an existing record of the same fingerprint, or fail
    /// on the count limit. Returns `Ok(None)` when a fresh record should
    /// be persisted. Counter-file persistence happens after the lock is
    /// released.
    fn collapse_duplicate(&self, fingerprint: &str) -> Result<Option<Record>, QueueError> {
        let snapshot = {
            let mut inner = self.inner.lock();
            if self.dedup_strategy.enabled() && inner.by_fingerprint.contains_key(fingerprint) {
                self.bump_duplicate(&mut inner, fingerprint)
            } else if self.max_record_count > 0
                && inner.records.len() >= self.max_record_count
            {
                let count = inner.records.len();
                drop(inner);
                metrics::record_rejected("record_limit");
                return Err(QueueError::RecordLimit {
                    count,
                    max: self.max_record_count,
                });
            } else {
                None
            }
        };

        if let Some(ref snapshot) = snapshot {
            self.writer.write_counter(snapshot.id, snapshot.duplicate_count);
            metrics::record_duplicate();
            debug!(
                id = %snapshot.id,
                duplicates = snapshot.duplicate_count,
                "Report collapsed into existing record"
            );
        }
        Ok(snapshot)
    }

    fn bump_duplicate(&self, inner: &mut StoreInner, fingerprint: &str) -> Option<Record> {
        let id = *inner.by_fingerprint.get(fingerprint)?;
        let record = inner.records.get_mut(&id)?;
        record.duplicate_count += 1;
        Some(record.clone())
    }

    /// Age the whole table by one retry: every record in generation g
    /// moves to g+1, scanned from the highest index down so nothing is
    /// processed twice. Records already on the horizon are evicted.
    pub fn advance_generation(&self) {
        let horizon = self.max_retries - 1;
        let mut evicted: Vec<Record> = Vec::new();
        let mut aged: Vec<Record> = Vec::new();

        {
            let mut inner = self.inner.lock();
            let expired: Vec<Uuid> = inner.generations[horizon].drain(..).collect();
            for id in expired {
                if let Some(record) = inner.records.remove(&id) {
                    Self::forget(&mut inner, &record);
                    evicted.push(record);
                }
            }

            for g in (0..horizon).rev() {
                let moved: Vec<Uuid> = inner.generations[g].drain(..).collect();
                for id in &moved {
                    if let Some(record) = inner.records.get_mut(id) {
                        record.generation = g + 1;
                        aged.push(record.clone());
                    }
                }
                inner.generations[g + 1].extend(moved);
            }

            metrics::set_store_gauges(inner.records.len(), inner.total_bytes);
        }

        // File work happens after the index is consistent.
        for record in &evicted {
            self.writer.delete(record);
            metrics::record_evicted();
            info!(id = %record.id, generation = horizon, "Record evicted past retry horizon");
        }
        for record in &aged {
            // Best-effort metadata rewrite so the new generation survives
            // a restart.
            self.writer.update_metadata(record);
        }
    }

    /// Next record eligible for a delivery attempt, marked locked.
    ///
    /// Generations are scanned least-retried first; within the first
    /// generation holding an unlocked record, the earliest-inserted wins
    /// under Fifo and the most-recent under Lifo.
    pub fn next_eligible(&self) -> Option<Record> {
        let mut inner = self.inner.lock();
        for g in 0..self.max_retries {
            let candidate = match self.retry_order {
                RetryOrder::Fifo => inner.generations[g]
                    .iter()
                    .copied()
                    .find(|id| inner.records.get(id).is_some_and(|r| !r.locked)),
                RetryOrder::Lifo => inner.generations[g]
                    .iter()
                    .rev()
                    .copied()
                    .find(|id| inner.records.get(id).is_some_and(|r| !r.locked)),
            };
            if let Some(id) = candidate {
                if let Some(record) = inner.records.get_mut(&id) {
                    record.locked = true;
                    return Some(record.clone());
                }
            }
        }
        None
    }

    /// Mark a record in-flight for an immediate send. False if the
    /// record is unknown or already being delivered.
    pub fn try_lock(&self, id: Uuid) -> bool {
        let mut inner = self.inner.lock();
        match inner.records.get_mut(&id) {
            Some(record) if !record.locked => {
                record.locked = true;
                true
            }
            _ => false,
        }
    }

    /// Clear a record's in-flight flag after a failed attempt.
    pub fn unlock(&self, id: Uuid) {
        let mut inner = self.inner.lock();
        if let Some(record) = inner.records.get_mut(&id) {
            record.locked = false;
        }
    }

    /// Clear every in-flight flag (store shutdown).
    pub fn unlock_all(&self) {
        let mut inner = self.inner.lock();
        for record in inner.records.values_mut() {
            record.locked = false;
        }
    }

    /// Remove a record from the table and from disk.
    pub fn delete(&self, id: Uuid) -> bool {
        let record = {
            let mut inner = self.inner.lock();
            let Some(record) = inner.records.remove(&id) else {
                return false;
            };
            let generation = record.generation.min(self.max_retries - 1);
            inner.generations[generation].retain(|&queued| queued != id);
            Self::forget(&mut inner, &record);
            metrics::set_store_gauges(inner.records.len(), inner.total_bytes);
            record
        };
        self.writer.delete(&record);
        true
    }

    /// Pop the next record for a full drain: any generation, locked or
    /// not, removed from table and disk before the caller ever attempts
    /// delivery. Returns the record with its payload bytes.
    pub fn take_next(&self) -> Option<(Record, Vec<u8>)> {
        loop {
            let taken = {
                let mut inner = self.inner.lock();
                let mut taken = None;
                for g in 0..self.max_retries {
                    let popped = match self.retry_order {
                        RetryOrder::Fifo => inner.generations[g].pop_front(),
                        RetryOrder::Lifo => inner.generations[g].pop_back(),
                    };
                    if let Some(id) = popped {
                        taken = inner.records.remove(&id);
                        if let Some(ref record) = taken {
                            Self::forget(&mut inner, record);
                        }
                        break;
                    }
                }
                taken
            };

            let record = taken?;
            let payload = self.writer.read_payload(record.id);
            self.writer.delete(&record);
            match payload {
                Ok(bytes) => return Some((record, bytes)),
                Err(e) => {
                    // Unreadable payload: the record is already gone,
                    // move on to the next one.
                    warn!(id = %record.id, error = %e, "Dropping record with unreadable payload");
                    continue;
                }
            }
        }
    }

    /// Payload bytes for a record delivered by the periodic drain.
    pub fn payload_bytes(&self, id: Uuid) -> Result<Vec<u8>, QueueError> {
        self.writer.read_payload(id)
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.inner.lock().records.len()
    }

    #[must_use]
    pub fn size_bytes(&self) -> u64 {
        self.inner.lock().total_bytes
    }

    #[must_use]
    pub fn stats(&self) -> StoreStats {
        let inner = self.inner.lock();
        StoreStats {
            records: inner.records.len(),
            store_bytes: inner.total_bytes,
            generations: inner.generations.iter().map(VecDeque::len).collect(),
        }
    }

    /// Delete everything, index and disk artifacts both.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        let records: Vec<Record> = inner.records.drain().map(|(_, r)| r).collect();
        for queue in &mut inner.generations {
            queue.clear();
        }
        inner.by_fingerprint.clear();
        inner.total_bytes = 0;
        drop(inner);

        for record in &records {
            self.writer.delete(record);
        }
        metrics::set_store_gauges(0, 0);
        info!(removed = records.len(), "Store cleared");
    }

    /// Rebuild the index from disk. Invalid records were already
    /// discarded by the loader; what remains is re-bucketed by its
    /// persisted generation (clamped if `max_retries` shrank between
    /// runs) in modification-time order.
    ///
    /// The on-disk state is the source of truth: the in-memory index is
    /// reset first, so a stop/start cycle re-indexes the same records
    /// instead of stacking them onto the live table.
    pub fn load_from_disk(&self) -> Result<usize, QueueError> {
        self.writer.ensure_dir()?;
        let loaded = self.writer.load_all();

        let mut dropped: Vec<Record> = Vec::new();
        let (count, total_bytes) = {
            let mut inner = self.inner.lock();
            inner.records.clear();
            for queue in &mut inner.generations {
                queue.clear();
            }
            inner.by_fingerprint.clear();
            inner.total_bytes = 0;

            let mut count = 0;
            for mut record in loaded {
                if self.max_record_count > 0 && inner.records.len() >= self.max_record_count {
                    warn!(id = %record.id, "Persisted record over the count limit, dropping");
                    dropped.push(record);
                    continue;
                }
                if self.max_store_bytes > 0
                    && inner.total_bytes + record.size_bytes > self.max_store_bytes
                {
                    warn!(id = %record.id, "Persisted record over the size limit, dropping");
                    dropped.push(record);
                    continue;
                }

                if record.generation >= self.max_retries {
                    debug!(
                        id = %record.id,
                        generation = record.generation,
                        max_retries = self.max_retries,
                        "Clamping persisted generation to the new horizon"
                    );
                    record.generation = self.max_retries - 1;
                }

                inner.total_bytes += record.size_bytes;
                inner.generations[record.generation].push_back(record.id);
                if self.dedup_strategy.enabled() {
                    inner
                        .by_fingerprint
                        .entry(record.fingerprint.clone())
                        .or_insert(record.id);
                }
                inner.records.insert(record.id, record);
                count += 1;
            }
            (count, inner.total_bytes)
        };

        for record in &dropped {
            self.writer.delete(record);
        }
        metrics::set_store_gauges(count, total_bytes);
        info!(records = count, bytes = total_bytes, "Record store loaded from disk");
        Ok(count)
    }

    /// Store directory, for callers wiring attachments into it.
    #[must_use]
    pub fn dir(&self) -> &Path {
        self.writer.dir()
    }

    fn forget(inner: &mut StoreInner, record: &Record) {
        inner.total_bytes = inner.total_bytes.saturating_sub(record.size_bytes);
        if let Some(mapped) = inner.by_fingerprint.get(&record.fingerprint) {
            if *mapped == record.id {
                inner.by_fingerprint.remove(&record.fingerprint);
            }
        }
    }
}
