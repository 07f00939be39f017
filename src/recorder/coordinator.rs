//! Master sink for one record kind and the worker → master merge protocol
//!
//! One `RecordSink` exists per record kind per run. Its mutex is the only
//! coordination point between workers: photon and deposit sinks are
//! independent mutex domains.
//!
//! Absorb protocol (under the sink's lock):
//! 1. Empty worker buffer → return without locking
//! 2. Master would overflow and holds records → flush master, clear it
//! 3. Append worker records in order
//! 4. Clear the worker buffer
//!
//! Flush failures are logged and the flushed-from buffer is still cleared,
//! so a failed flush loses at most that one buffer's records. Lost records
//! are counted and reported in `SinkStats`.

use std::fs::File;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::common::{OutputError, OutputResult};

use super::buffer::RecordBuffer;
use super::format::BinaryRecord;

/// Result of one absorb call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsorbOutcome {
    /// Worker records moved into the master
    pub absorbed: usize,
    /// Master records flushed to disk before the merge
    pub flushed_before: usize,
}

/// Point-in-time view of a sink
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    /// Records currently held in memory
    pub buffered: usize,
    /// Master capacity
    pub capacity: usize,
    /// Records ever appended to the master
    pub total_written: u64,
    /// Records written to disk
    pub flushed: u64,
    /// Records dropped by failed flushes
    pub lost: u64,
    /// Successful non-empty flushes
    pub flush_count: u64,
}

#[derive(Debug)]
struct MasterState<T> {
    buffer: RecordBuffer<T>,
    flushed: u64,
    lost: u64,
    flush_count: u64,
}

impl<T: BinaryRecord> MasterState<T> {
    /// Flush then clear, whatever the flush outcome
    fn flush_and_clear(&mut self) -> usize {
        let held = self.buffer.len();
        let written = match self.buffer.flush() {
            Ok(n) => {
                if n > 0 {
                    self.flushed += n as u64;
                    self.flush_count += 1;
                    debug!(kind = %T::KIND, records = n, "Flushed master buffer");
                }
                n
            }
            Err(e) => {
                self.lost += held as u64;
                warn!(kind = %T::KIND, records = held, error = %e, "Master flush failed, records dropped");
                0
            }
        };
        self.buffer.clear();
        written
    }
}

/// Shared master buffer for one record kind
#[derive(Debug)]
pub struct RecordSink<T> {
    state: Mutex<MasterState<T>>,
    path: PathBuf,
}

impl<T: BinaryRecord> RecordSink<T> {
    /// Create a sink that appends to `path` (existing content is kept)
    pub fn new(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            state: Mutex::new(MasterState {
                buffer: RecordBuffer::with_output_path(capacity, path.clone()),
                flushed: 0,
                lost: 0,
                flush_count: 0,
            }),
            path,
        }
    }

    /// Create a sink and truncate (or create) its destination file
    pub fn create(capacity: usize, path: impl Into<PathBuf>) -> OutputResult<Self> {
        let sink = Self::new(capacity, path);
        File::create(&sink.path).map_err(|e| OutputError::open(&sink.path, e))?;
        Ok(sink)
    }

    /// Destination file
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn capacity(&self) -> usize {
        self.state.lock().buffer.capacity()
    }

    /// Move a worker's staged records into the master
    pub fn absorb(&self, worker: &mut RecordBuffer<T>) -> AbsorbOutcome {
        if worker.is_empty() {
            return AbsorbOutcome::default();
        }

        let mut state = self.state.lock();
        let mut flushed_before = 0;
        if state.buffer.len() + worker.len() > state.buffer.capacity() && !state.buffer.is_empty() {
            flushed_before = state.flush_and_clear();
        }

        let absorbed = worker.len();
        state.buffer.extend_from(worker.records());
        drop(state);

        worker.clear();
        AbsorbOutcome {
            absorbed,
            flushed_before,
        }
    }

    /// Append directly to the master (single-threaded runs)
    ///
    /// Flushes and clears when the append fills the buffer. Returns the
    /// number of records written to disk by this call.
    pub fn append(&self, record: T) -> usize {
        let mut state = self.state.lock();
        state.buffer.append(record);
        if state.buffer.is_full() {
            state.flush_and_clear()
        } else {
            0
        }
    }

    /// Flush whatever the master still holds (run end)
    pub fn drain(&self) -> usize {
        self.state.lock().flush_and_clear()
    }

    pub fn stats(&self) -> SinkStats {
        let state = self.state.lock();
        SinkStats {
            buffered: state.buffer.len(),
            capacity: state.buffer.capacity(),
            total_written: state.buffer.total_written(),
            flushed: state.flushed,
            lost: state.lost,
            flush_count: state.flush_count,
        }
    }
}
