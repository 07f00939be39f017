//! Capacity-bounded staging buffer for one record kind
//!
//! A `RecordBuffer` is owned either by one worker (staging area, never
//! flushed directly) or by the master sink (flushed to its output path).
//! The fill count never exceeds capacity as long as callers check
//! `is_full()` after each append and absorb/flush when it is.

use std::fs::OpenOptions;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::common::{OutputError, OutputResult};

use super::format::BinaryRecord;

/// Append-only, capacity-bounded record store
#[derive(Debug)]
pub struct RecordBuffer<T> {
    records: Vec<T>,
    capacity: usize,
    total_written: u64,
    output_path: Option<PathBuf>,
}

impl<T: BinaryRecord> RecordBuffer<T> {
    /// Create a buffer holding at most `capacity` records
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: Vec::with_capacity(capacity),
            capacity,
            total_written: 0,
            output_path: None,
        }
    }

    /// Create a worker buffer: `master_capacity / thread_count`, at least 1
    ///
    /// The division remainder is not redistributed, so the sum of worker
    /// capacities can be smaller than the master capacity.
    pub fn for_worker(master_capacity: usize, thread_count: usize) -> Self {
        Self::new(master_capacity / thread_count.max(1))
    }

    /// Create a master buffer that flushes to `path`
    pub fn with_output_path(capacity: usize, path: impl Into<PathBuf>) -> Self {
        let mut buffer = Self::new(capacity);
        buffer.output_path = Some(path.into());
        buffer
    }

    /// Append one record
    ///
    /// Appending to a full buffer grows the backing store; callers must
    /// absorb or flush as soon as `is_full()` reports true.
    #[inline]
    pub fn append(&mut self, record: T) {
        debug_assert!(
            self.records.len() < self.capacity,
            "append to full {} buffer (capacity {})",
            T::KIND,
            self.capacity
        );
        self.records.push(record);
        self.total_written += 1;
    }

    /// Append a run of records, counting them in the lifetime total
    pub fn extend_from(&mut self, records: &[T]) {
        self.records.extend_from_slice(records);
        self.total_written += records.len() as u64;
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.records.len() >= self.capacity
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Current fill count
    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Records ever appended (never reset by `clear`)
    pub fn total_written(&self) -> u64 {
        self.total_written
    }

    pub fn output_path(&self) -> Option<&Path> {
        self.output_path.as_deref()
    }

    /// Held records in insertion order
    pub fn records(&self) -> &[T] {
        &self.records
    }

    /// Drop held records; the lifetime total is untouched
    pub fn clear(&mut self) {
        self.records.clear();
    }

    /// Append held records to `path` as raw fixed-size blocks
    ///
    /// Empty buffers are a no-op and do not touch the file. The buffer is
    /// not cleared. Returns the number of records written.
    pub fn flush_to(&self, path: &Path) -> OutputResult<usize> {
        if self.records.is_empty() {
            return Ok(0);
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| OutputError::open(path, e))?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);

        let mut block = Vec::with_capacity(T::SIZE);
        for record in &self.records {
            block.clear();
            record.encode_into(&mut block);
            writer
                .write_all(&block)
                .map_err(|e| OutputError::write(path, e))?;
        }
        writer.flush().map_err(|e| OutputError::write(path, e))?;

        Ok(self.records.len())
    }

    /// Flush to the configured output path
    pub fn flush(&self) -> OutputResult<usize> {
        let path = self.output_path.as_deref().ok_or(OutputError::NoOutputPath)?;
        self.flush_to(path)
    }
}
