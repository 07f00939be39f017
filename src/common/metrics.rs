//! Run-scoped counters shared by every worker
//!
//! # Design Principles (KISS)
//! - Lock-free atomic counters for hot path (zero overhead on data path)
//! - Owned by an explicit run context, never by process globals
//! - Reset exactly once per run, by the master, before workers start

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counters shared across all worker threads of a run
///
/// - `photons_created`: every Cerenkov photon seen at creation
/// - `deposits_without_primary`: deposits recorded for an event with no
///   primary vertex (relative position written as zero)
/// - `photon_records` / `deposit_records`: records handed to the buffers
///
/// All operations use Relaxed ordering. Values are read once the workers
/// have been joined, so no stronger ordering is needed.
#[derive(Debug)]
pub struct RunCounters {
    /// Photons seen at creation (manifest `total_photons`)
    pub photons_created: AtomicU64,
    /// Deposits recorded without a primary vertex
    pub deposits_without_primary: AtomicU64,
    /// Photon-exit records appended to any buffer
    pub photon_records: AtomicU64,
    /// Deposit records appended to any buffer
    pub deposit_records: AtomicU64,
}

impl RunCounters {
    /// Create new zeroed counters
    pub fn new() -> Self {
        Self {
            photons_created: AtomicU64::new(0),
            deposits_without_primary: AtomicU64::new(0),
            photon_records: AtomicU64::new(0),
            deposit_records: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_photons_created(&self) {
        self.photons_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_deposits_without_primary(&self) {
        self.deposits_without_primary.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_photon_records(&self) {
        self.photon_records.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_deposit_records(&self) {
        self.deposit_records.fetch_add(1, Ordering::Relaxed);
    }

    /// Take a snapshot of current values
    pub fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            photons_created: self.photons_created.load(Ordering::Relaxed),
            deposits_without_primary: self.deposits_without_primary.load(Ordering::Relaxed),
            photon_records: self.photon_records.load(Ordering::Relaxed),
            deposit_records: self.deposit_records.load(Ordering::Relaxed),
        }
    }

    /// Reset all counters to zero
    ///
    /// Only the master calls this, at run start, before any worker exists.
    pub fn reset(&self) {
        self.photons_created.store(0, Ordering::Relaxed);
        self.deposits_without_primary.store(0, Ordering::Relaxed);
        self.photon_records.store(0, Ordering::Relaxed);
        self.deposit_records.store(0, Ordering::Relaxed);
    }
}

impl Default for RunCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of counter values at a point in time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CounterSnapshot {
    pub photons_created: u64,
    pub deposits_without_primary: u64,
    pub photon_records: u64,
    pub deposit_records: u64,
}

/// Throughput figures printed in the end-of-run statistics block
#[derive(Debug, Clone, Copy, Default)]
pub struct RunRates {
    /// Events per wall-clock second
    pub events_per_second: f64,
    /// Average photons created per event
    pub photons_per_event: f64,
    /// CPU seconds / wall seconds (None when the run took under a second)
    pub speedup: Option<f64>,
}

impl RunRates {
    /// Compute rates from whole-second timings, as reported in the manifest
    pub fn compute(events: u64, photons: u64, wall_secs: u64, cpu_secs: u64) -> Self {
        let events_per_second = if wall_secs > 0 {
            events as f64 / wall_secs as f64
        } else {
            0.0
        };
        let photons_per_event = if events > 0 {
            photons as f64 / events as f64
        } else {
            0.0
        };
        let speedup = (wall_secs > 0).then(|| cpu_secs as f64 / wall_secs as f64);

        Self {
            events_per_second,
            photons_per_event,
            speedup,
        }
    }
}

/// Format whole seconds as `HH h MM m SS s`
pub fn format_hms(total_secs: u64) -> String {
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let secs = total_secs % 60;
    format!("{:02} h {:02} m {:02} s", hours, minutes, secs)
}
