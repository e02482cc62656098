// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Atomic reader/writer for a record's on-disk artifacts.
//!
//! Each record occupies up to three files named by its id:
//! `<id>-record.json` (metadata), `<id>-attachment.json` (payload blob)
//! and `<id>-counter.json` (duplicate count). A record is valid only if
//! metadata and payload exist together; writes go through a temp file
//! plus rename so a crash mid-write leaves either the old state or a
//! sweepable `.tmp` file, never a torn artifact.
//!
//! No business logic lives here; the store decides what to persist and
//! when. I/O failures are reported upward as a failed save (or an
//! invalid record at load), never panics.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::QueueError;
use crate::record::Record;

pub const METADATA_SUFFIX: &str = "-record.json";
pub const PAYLOAD_SUFFIX: &str = "-attachment.json";
pub const COUNTER_SUFFIX: &str = "-counter.json";
const TEMP_SUFFIX: &str = ".tmp";

/// Contents of `<id>-counter.json`.
#[derive(Debug, Serialize, Deserialize)]
struct CounterFile {
    count: u32,
}

/// Writes, loads and deletes record artifacts under one directory.
pub struct EntryWriter {
    dir: PathBuf,
}

impl EntryWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the store directory if missing.
    pub fn ensure_dir(&self) -> Result<(), QueueError> {
        fs::create_dir_all(&self.dir).map_err(|e| QueueError::Persistence {
            id: Uuid::nil(),
            path: self.dir.clone(),
            source: e,
        })
    }

    #[must_use]
    pub fn metadata_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}{METADATA_SUFFIX}"))
    }

    #[must_use]
    pub fn payload_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}{PAYLOAD_SUFFIX}"))
    }

    #[must_use]
    pub fn counter_path(&self, id: Uuid) -> PathBuf {
        self.dir.join(format!("{id}{COUNTER_SUFFIX}"))
    }

    /// Persist payload and metadata for a record, filling in its paths
    /// and exact on-disk size.
    ///
    /// Payload lands first, metadata last: the record only becomes valid
    /// once the metadata rename completes. Any failure cleans up partial
    /// artifacts and surfaces as a failed save, so the caller must not
    /// index the record.
    pub fn save(&self, record: &mut Record, payload: &[u8]) -> Result<(), QueueError> {
        let id = record.id;
        record.payload_path = self.payload_path(id);
        record.metadata_path = self.metadata_path(id);

        let persist = |e: io::Error, path: &Path| QueueError::Persistence {
            id,
            path: path.to_path_buf(),
            source: e,
        };

        if let Err(e) = write_atomic(&record.payload_path, payload) {
            let path = record.payload_path.clone();
            self.remove_artifacts(record);
            return Err(persist(e, &path));
        }

        let metadata = match serde_json::to_vec_pretty(record) {
            Ok(bytes) => bytes,
            Err(e) => {
                self.remove_artifacts(record);
                return Err(persist(e.into(), &record.metadata_path));
            }
        };
        if let Err(e) = write_atomic(&record.metadata_path, &metadata) {
            let path = record.metadata_path.clone();
            self.remove_artifacts(record);
            return Err(persist(e, &path));
        }

        record.size_bytes = self.measure(record);
        debug!(id = %id, size_bytes = record.size_bytes, "Record persisted");
        Ok(())
    }

    /// Sum of the record's file lengths right now. An attachment that has
    /// gone missing simply stops counting.
    fn measure(&self, record: &Record) -> u64 {
        let len = |p: &Path| fs::metadata(p).map(|m| m.len()).unwrap_or(0);
        let mut total = len(&record.payload_path) + len(&record.metadata_path);
        total += len(&self.counter_path(record.id));
        if let Some(ref attachment) = record.attachment_path {
            total += len(attachment);
        }
        total
    }

    /// Rewrite a record's metadata in place (generation changes).
    /// Best-effort: on failure the stale file stands and the in-memory
    /// state remains authoritative until the next save or restart.
    pub fn update_metadata(&self, record: &Record) {
        let bytes = match serde_json::to_vec_pretty(record) {
            Ok(b) => b,
            Err(e) => {
                warn!(id = %record.id, error = %e, "Failed to serialize metadata update");
                return;
            }
        };
        if let Err(e) = write_atomic(&record.metadata_path, &bytes) {
            warn!(id = %record.id, error = %e, "Failed to rewrite metadata");
        }
    }

    /// Persist the duplicate count. Best-effort: a failed counter write
    /// is logged and the in-memory count stands.
    pub fn write_counter(&self, id: Uuid, count: u32) {
        let path = self.counter_path(id);
        let body = match serde_json::to_vec(&CounterFile { count }) {
            Ok(b) => b,
            Err(e) => {
                warn!(id = %id, error = %e, "Failed to serialize counter file");
                return;
            }
        };
        if let Err(e) = write_atomic(&path, &body) {
            warn!(id = %id, path = %path.display(), error = %e, "Failed to write counter file");
        }
    }

    fn read_counter(&self, id: Uuid) -> u32 {
        let path = self.counter_path(id);
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<CounterFile>(&bytes) {
                Ok(counter) => counter.count.max(1),
                Err(e) => {
                    warn!(id = %id, error = %e, "Corrupt counter file, assuming 1");
                    1
                }
            },
            Err(_) => 1,
        }
    }

    /// Read the persisted payload bytes for a record.
    pub fn read_payload(&self, id: Uuid) -> Result<Vec<u8>, QueueError> {
        let path = self.payload_path(id);
        fs::read(&path).map_err(|e| QueueError::Persistence {
            id,
            path,
            source: e,
        })
    }

    /// Remove every artifact belonging to a record. Removal failures are
    /// logged; a file that refuses to die is swept as an orphan on the
    /// next startup.
    pub fn delete(&self, record: &Record) {
        self.remove_artifacts(record);
        debug!(id = %record.id, "Record artifacts removed");
    }

    fn remove_artifacts(&self, record: &Record) {
        let id = record.id;
        remove_quiet(&self.metadata_path(id));
        remove_quiet(&self.payload_path(id));
        remove_quiet(&self.counter_path(id));
        // Attachments are only owned (and thus removed) when they live
        // inside the store directory.
        if let Some(ref attachment) = record.attachment_path {
            if attachment.starts_with(&self.dir) {
                remove_quiet(attachment);
            }
        }
    }

    /// Rebuild records from disk.
    ///
    /// Corrupt metadata and payload-less records are discarded, files
    /// included, so one bad record never blocks recovery of the rest.
    /// Orphaned payload/counter/temp files are swept. Records come back
    /// ordered by metadata modification time, oldest first, preserving
    /// FIFO behavior across restarts.
    pub fn load_all(&self) -> Vec<Record> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(dir = %self.dir.display(), error = %e, "Cannot read store directory");
                return Vec::new();
            }
        };

        let mut loaded: Vec<(Record, SystemTime)> = Vec::new();
        let mut other_files: Vec<PathBuf> = Vec::new();

        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_owned)
            else {
                continue;
            };

            let Some(stem) = name.strip_suffix(METADATA_SUFFIX) else {
                if name.ends_with(PAYLOAD_SUFFIX)
                    || name.ends_with(COUNTER_SUFFIX)
                    || name.ends_with(TEMP_SUFFIX)
                {
                    other_files.push(path);
                }
                continue;
            };

            let Ok(id) = Uuid::parse_str(stem) else {
                warn!(file = %name, "Metadata file with unparseable id, removing");
                remove_quiet(&path);
                continue;
            };

            match self.load_one(id, &path) {
                Some(record) => {
                    let mtime = fs::metadata(&path)
                        .and_then(|m| m.modified())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    loaded.push((record, mtime));
                }
                None => {
                    // Discard the whole record, not just the bad file.
                    remove_quiet(&path);
                    remove_quiet(&self.payload_path(id));
                    remove_quiet(&self.counter_path(id));
                }
            }
        }

        let live: std::collections::HashSet<Uuid> =
            loaded.iter().map(|(r, _)| r.id).collect();
        for path in other_files {
            if !referenced(&path, &live) {
                debug!(file = %path.display(), "Sweeping orphan file");
                remove_quiet(&path);
            }
        }

        loaded.sort_by_key(|(_, mtime)| *mtime);
        loaded.into_iter().map(|(record, _)| record).collect()
    }

    fn load_one(&self, id: Uuid, metadata_path: &Path) -> Option<Record> {
        let bytes = match fs::read(metadata_path) {
            Ok(b) => b,
            Err(e) => {
                warn!(id = %id, error = %e, "Unreadable metadata file, discarding record");
                return None;
            }
        };
        let mut record: Record = match serde_json::from_slice(&bytes) {
            Ok(r) => r,
            Err(e) => {
                warn!(id = %id, error = %e, "Corrupt metadata file, discarding record");
                return None;
            }
        };
        if record.id != id {
            warn!(id = %id, claimed = %record.id, "Metadata id mismatch, discarding record");
            return None;
        }

        // Metadata without payload means the save never completed.
        record.payload_path = self.payload_path(id);
        record.metadata_path = metadata_path.to_path_buf();
        if !record.payload_path.exists() {
            warn!(id = %id, "Payload missing for persisted record, discarding");
            return None;
        }

        record.duplicate_count = self.read_counter(id);
        record.locked = false;
        record.size_bytes = self.measure(&record);
        Some(record)
    }
}

/// True when the file name starts with the id of a live record.
fn referenced(path: &Path, live: &std::collections::HashSet<Uuid>) -> bool {
    let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
        return false;
    };
    name.split('-')
        .take(5)
        .collect::<Vec<_>>()
        .join("-")
        .parse::<Uuid>()
        .map(|id| live.contains(&id))
        .unwrap_or(false)
}

/// Write to `<path>.tmp` then rename into place.
fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(TEMP_SUFFIX);
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path).inspect_err(|_| {
        let _ = fs::remove_file(&tmp);
    })
}

fn remove_quiet(path: &Path) {
    if let Err(e) = fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            warn!(path = %path.display(), error = %e, "Failed to remove file");
        }
    }
}
