//! Recorder component - stages photon and deposit records and writes them to disk
//!
//! Architecture (per record kind):
//! ```text
//!   worker 0 ─► RecordBuffer ─┐ absorb (one mutex per kind)
//!   worker 1 ─► RecordBuffer ─┼──────────► RecordSink ──► <base>.phsp / <dose_base>.dose
//!   worker N ─► RecordBuffer ─┘              │ full / run end
//!                                            ▼
//!                                          flush
//! ```
//!
//! - Single-thread runs append straight into the master sink
//! - CSV photon mode streams per-thread text files, merged at run end
//! - Run end (master): final flush, header artifacts, run manifest
//!
//! # Design Principles (KISS)
//! - No error crosses a thread boundary: failures are logged and the run continues
//! - Shared counters live in an explicit `RunContext`, reset once per run by the master
//! - Disabled record kinds are silent no-ops

pub mod buffer;
pub mod coordinator;
pub mod csv;
pub mod format;
pub mod manifest;
mod state;

pub use buffer::RecordBuffer;
pub use coordinator::{AbsorbOutcome, RecordSink, SinkStats};
pub use csv::{merge_thread_files, CsvThreadWriter, CSV_HEADER};
pub use format::{
    header_text, parse_header_text, read_records, record_count, write_header_file, BinaryRecord,
    ChecksumCalculator, DepositRecord, FileFormatError, HeaderInfo, LegacyPhotonRecord,
    PhotonExitRecord, PhotonSample, RecordFileReader, RecordKind, DEPOSIT_RECORD_SIZE,
    FORMAT_VERSION, LEGACY_PHOTON_RECORD_SIZE, PHOTON_RECORD_SIZE,
};
pub use manifest::{RunManifest, RunSummary, RunTimer, RunTiming};
pub use state::RecorderState;

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::{CounterSnapshot, RunCounters};
use crate::config::{OutputFormat, OutputPaths, SimulationConfig};

/// Run-scoped shared state handed to every worker
///
/// Replaces process-wide counters. Cloning shares the same counters.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    counters: Arc<RunCounters>,
}

impl RunContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counters(&self) -> &RunCounters {
        &self.counters
    }

    pub fn snapshot(&self) -> CounterSnapshot {
        self.counters.snapshot()
    }
}

/// Master-side recorder for one run
///
/// Created by `begin_run`, consumed by `end_run`. Workers obtain their
/// `WorkerRecorder` through `worker()` while the run is active; each one
/// borrows the recorder, so the run cannot end while a worker is alive:
///
/// ```compile_fail
/// use cherenkov_rs::config::SimulationConfig;
/// use cherenkov_rs::recorder::{Recorder, RunContext};
///
/// let recorder = Recorder::begin_run(&SimulationConfig::default(), RunContext::new(), 2);
/// let worker = recorder.worker(0);
/// recorder.end_run(1);
/// drop(worker);
/// ```
#[derive(Debug)]
pub struct Recorder {
    config: SimulationConfig,
    paths: OutputPaths,
    thread_count: usize,
    ctx: RunContext,
    photons: Option<RecordSink<PhotonExitRecord>>,
    deposits: Option<RecordSink<DepositRecord>>,
    csv_photons: bool,
    timer: RunTimer,
    state: RecorderState,
}

impl Recorder {
    /// Start a run: truncate destination files, allocate master sinks,
    /// reset the shared counters and start the run clock
    ///
    /// `thread_count` is the effective number of workers (at least 1).
    /// Destination files that cannot be created are logged; the run
    /// proceeds and later flushes to them fail the same way.
    ///
    /// CSV mode writes photons only: deposit output is switched off.
    pub fn begin_run(config: &SimulationConfig, ctx: RunContext, thread_count: usize) -> Self {
        let thread_count = thread_count.max(1);
        let paths = OutputPaths::new(&config.output_file_path, config.dose_output_base());

        ctx.counters().reset();

        let csv_mode = config.output_format == OutputFormat::Csv;
        let photon_output = config.enable_cherenkov_output;
        let csv_photons = photon_output && csv_mode;
        let deposit_output = config.enable_dose_output && !csv_mode;
        if config.enable_dose_output && csv_mode {
            warn!("Dose output is binary only, disabled for CSV runs");
        }

        let photons = (photon_output && !csv_photons)
            .then(|| open_sink(config.buffer_size, &paths.photons));
        let deposits =
            deposit_output.then(|| open_sink(config.dose_buffer_capacity(), &paths.deposits));

        let mut state = RecorderState::Uninitialized;
        transition(&mut state, RecorderState::Active);

        info!(
            base = %paths.base.display(),
            format = %config.output_format,
            threads = thread_count,
            photons = photon_output,
            deposits = deposit_output,
            buffer_size = config.buffer_size,
            "Run started"
        );

        Self {
            config: config.clone(),
            paths,
            thread_count,
            ctx,
            photons,
            deposits,
            csv_photons,
            timer: RunTimer::start(),
            state,
        }
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn paths(&self) -> &OutputPaths {
        &self.paths
    }

    pub fn thread_count(&self) -> usize {
        self.thread_count
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn photon_stats(&self) -> Option<SinkStats> {
        self.photons.as_ref().map(|s| s.stats())
    }

    pub fn deposit_stats(&self) -> Option<SinkStats> {
        self.deposits.as_ref().map(|s| s.stats())
    }

    /// Create the recorder for worker `thread_index`
    ///
    /// With more than one thread, each worker stages records in buffers
    /// sized `capacity / thread_count` and absorbs them into the master
    /// when full. A single-thread run appends directly to the master.
    ///
    /// # Panics
    ///
    /// Panics if `thread_index >= thread_count()`.
    pub fn worker(&self, thread_index: usize) -> WorkerRecorder<'_> {
        assert!(
            thread_index < self.thread_count,
            "worker index {} out of range for {} threads",
            thread_index,
            self.thread_count
        );
        let staged = self.thread_count > 1;

        let photons = self.photons.as_ref().map(|sink| {
            KindStage::new(sink, staged.then(|| {
                RecordBuffer::for_worker(self.config.buffer_size, self.thread_count)
            }))
        });
        let deposits = self.deposits.as_ref().map(|sink| {
            KindStage::new(sink, staged.then(|| {
                RecordBuffer::for_worker(self.config.dose_buffer_capacity(), self.thread_count)
            }))
        });

        let csv = if self.csv_photons {
            let path = self.paths.csv_thread_file(thread_index);
            match CsvThreadWriter::create(&path) {
                Ok(writer) => Some(writer),
                Err(e) => {
                    warn!(thread = thread_index, error = %e, "Cannot open thread output file");
                    None
                }
            }
        } else {
            None
        };

        debug!(thread = thread_index, staged, "Worker recorder ready");

        WorkerRecorder {
            thread_index,
            ctx: self.ctx.clone(),
            photons,
            deposits,
            csv,
            photon_count: 0,
            deposit_count: 0,
            state: RecorderState::Active,
        }
    }

    /// Finish the run once every worker has been finished or dropped
    ///
    /// Flushes what the masters still hold, merges CSV thread files,
    /// writes header artifacts and the run manifest, and logs the
    /// statistics block. Records handed to workers that did not reach
    /// disk are reported in `records_lost`.
    pub fn end_run(mut self, events: u64) -> RunSummary {
        transition(&mut self.state, RecorderState::Draining);

        let counters = self.ctx.snapshot();
        let mut records_lost = 0;

        let photon_records = match &self.photons {
            Some(sink) => {
                sink.drain();
                let stats = sink.stats();
                records_lost += unsettled(
                    RecordKind::Photon,
                    counters.photon_records,
                    stats.flushed,
                    stats.lost,
                );
                write_header_or_warn::<PhotonExitRecord>(&self.paths.photon_header);
                stats.total_written
            }
            None => 0,
        };

        let total_deposits = self.deposits.as_ref().map(|sink| {
            sink.drain();
            let stats = sink.stats();
            records_lost += unsettled(
                RecordKind::Deposit,
                counters.deposit_records,
                stats.flushed,
                stats.lost,
            );
            write_header_or_warn::<DepositRecord>(&self.paths.deposit_header);
            stats.total_written
        });

        let photon_records = if self.csv_photons {
            let rows = match merge_thread_files(&self.paths, self.thread_count) {
                Ok(rows) => rows,
                Err(e) => {
                    warn!(error = %e, "CSV merge failed");
                    0
                }
            };
            records_lost += unsettled(RecordKind::Photon, counters.photon_records, rows, 0);
            rows
        } else {
            photon_records
        };

        let summary = RunSummary {
            events,
            threads_effective: self.thread_count,
            total_photons: counters.photons_created,
            photon_records,
            total_deposits,
            deposits_without_primary: counters.deposits_without_primary,
            records_lost,
            timing: self.timer.elapsed(),
        };

        RunManifest::from_run(&self.config, &self.paths, &summary)
            .write_or_warn(&self.paths.manifest);
        summary.log();

        transition(&mut self.state, RecorderState::Closed);
        summary
    }
}

/// Records accepted from workers that neither reached disk nor were
/// already counted as lost
fn unsettled(kind: RecordKind, accepted: u64, written: u64, lost: u64) -> u64 {
    let settled = written + lost;
    if accepted != settled {
        warn!(%kind, accepted, written, lost, "Record count mismatch at run end");
    }
    accepted.saturating_sub(settled)
}

fn open_sink<T: BinaryRecord>(capacity: usize, path: &std::path::Path) -> RecordSink<T> {
    match RecordSink::create(capacity, path) {
        Ok(sink) => sink,
        Err(e) => {
            warn!(kind = %T::KIND, error = %e, "Cannot create output file, records will be lost");
            RecordSink::new(capacity, path)
        }
    }
}

fn write_header_or_warn<T: BinaryRecord>(path: &std::path::Path) {
    match write_header_file::<T>(path) {
        Ok(()) => debug!(kind = %T::KIND, path = %path.display(), "Header written"),
        Err(e) => warn!(kind = %T::KIND, error = %e, "Failed to write header file"),
    }
}

fn transition(state: &mut RecorderState, target: RecorderState) {
    debug_assert!(
        state.can_transition_to(target),
        "invalid recorder transition {} -> {}",
        state,
        target
    );
    debug!(from = %state, to = %target, "Recorder state change");
    *state = target;
}

/// Route from one worker to the master sink of one record kind
#[derive(Debug)]
struct KindStage<'a, T> {
    sink: &'a RecordSink<T>,
    /// `None` when records go straight into the master
    staging: Option<RecordBuffer<T>>,
}

impl<'a, T: BinaryRecord> KindStage<'a, T> {
    fn new(sink: &'a RecordSink<T>, staging: Option<RecordBuffer<T>>) -> Self {
        Self { sink, staging }
    }

    #[inline]
    fn push(&mut self, record: T) {
        match &mut self.staging {
            Some(buffer) => {
                buffer.append(record);
                if buffer.is_full() {
                    self.sink.absorb(buffer);
                }
            }
            None => {
                self.sink.append(record);
            }
        }
    }

    /// Absorb the partial staging buffer (no-op when empty)
    fn drain(&mut self) -> AbsorbOutcome {
        match &mut self.staging {
            Some(buffer) => self.sink.absorb(buffer),
            None => AbsorbOutcome::default(),
        }
    }

    fn staged(&self) -> usize {
        self.staging.as_ref().map_or(0, |b| b.len())
    }
}

/// Counts reported by a finished worker
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerReport {
    pub thread_index: usize,
    pub photons: u64,
    pub deposits: u64,
}

/// Per-worker recording handle
///
/// Owned by exactly one worker thread and borrowed from the `Recorder`.
/// Dropping it absorbs whatever is still staged, so records are never
/// left behind in a worker buffer.
#[derive(Debug)]
pub struct WorkerRecorder<'a> {
    thread_index: usize,
    ctx: RunContext,
    photons: Option<KindStage<'a, PhotonExitRecord>>,
    deposits: Option<KindStage<'a, DepositRecord>>,
    csv: Option<CsvThreadWriter>,
    photon_count: u64,
    deposit_count: u64,
    state: RecorderState,
}

impl WorkerRecorder<'_> {
    pub fn thread_index(&self) -> usize {
        self.thread_index
    }

    pub fn state(&self) -> RecorderState {
        self.state
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    /// Whether photon records are kept (binary or CSV)
    pub fn photons_enabled(&self) -> bool {
        self.photons.is_some() || self.csv.is_some()
    }

    pub fn deposits_enabled(&self) -> bool {
        self.deposits.is_some()
    }

    /// Records staged in this worker and not yet absorbed
    pub fn staged(&self) -> (usize, usize) {
        (
            self.photons.as_ref().map_or(0, |s| s.staged()),
            self.deposits.as_ref().map_or(0, |s| s.staged()),
        )
    }

    /// Record one photon-exit; silently ignored when photon output is off
    pub fn record_photon(&mut self, photon: PhotonSample) {
        if let Some(stage) = &mut self.photons {
            stage.push(photon.to_record());
            self.photon_count += 1;
            self.ctx.counters().inc_photon_records();
        } else if let Some(csv) = &mut self.csv {
            match csv.write_photon(&photon) {
                Ok(()) => {
                    self.photon_count += 1;
                    self.ctx.counters().inc_photon_records();
                }
                Err(e) => warn!(thread = self.thread_index, error = %e, "CSV write failed"),
            }
        }
    }

    /// Record one energy deposit; silently ignored when deposit output is off
    pub fn record_deposit(&mut self, record: DepositRecord) {
        if let Some(stage) = &mut self.deposits {
            stage.push(record);
            self.deposit_count += 1;
            self.ctx.counters().inc_deposit_records();
        }
    }

    /// End of run for this worker: absorb partial buffers, close the CSV file
    pub fn finish(mut self) -> WorkerReport {
        self.drain();
        WorkerReport {
            thread_index: self.thread_index,
            photons: self.photon_count,
            deposits: self.deposit_count,
        }
    }

    fn drain(&mut self) {
        if self.state != RecorderState::Active {
            return;
        }
        transition(&mut self.state, RecorderState::Draining);

        let photons = self.photons.as_mut().map(|s| s.drain()).unwrap_or_default();
        let deposits = self.deposits.as_mut().map(|s| s.drain()).unwrap_or_default();

        if let Some(csv) = self.csv.take() {
            let path = csv.path().to_path_buf();
            if let Err(e) = csv.finish() {
                warn!(thread = self.thread_index, path = %path.display(), error = %e, "CSV close failed");
            }
        }

        debug!(
            thread = self.thread_index,
            photons = photons.absorbed,
            deposits = deposits.absorbed,
            "Worker drained"
        );
        transition(&mut self.state, RecorderState::Closed);
    }
}

impl Drop for WorkerRecorder<'_> {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_unsettled_counts_missing_records() {
        assert_eq!(unsettled(RecordKind::Photon, 10, 10, 0), 0);
        assert_eq!(unsettled(RecordKind::Photon, 10, 7, 2), 1);
        assert_eq!(unsettled(RecordKind::Deposit, 3, 3, 1), 0);
    }

    #[test]
    fn test_worker_counters_match_summary() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::with_output(dir.path().join("run").to_string_lossy().to_string());
        config.simulation.enable_dose_output = true;
        config.simulation.buffer_size = 4;
        let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 2);

        let mut worker = recorder.worker(1);
        for i in 0..5 {
            worker.record_photon(PhotonSample {
                init_pos: [0.0; 3],
                init_dir: [0.0, 0.0, 1.0],
                final_pos: [0.0, 0.0, 10.0],
                final_dir: [0.0, 0.0, 1.0],
                energy: 2.0e-6,
                event_id: 0,
                track_id: i,
            });
        }
        worker.record_deposit(DepositRecord::from_native([0.0; 3], None, 1.0, 0, 22));
        drop(worker);

        let counters = recorder.context().snapshot();
        assert_eq!(counters.photon_records, 5);
        assert_eq!(counters.deposit_records, 1);

        let summary = recorder.end_run(1);
        assert_eq!(summary.photon_records, 5);
        assert_eq!(summary.total_deposits, Some(1));
        assert_eq!(summary.records_lost, 0);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_worker_index_out_of_range() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::with_output(dir.path().join("run").to_string_lossy().to_string());
        let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 2);
        let _worker = recorder.worker(2);
    }
}
