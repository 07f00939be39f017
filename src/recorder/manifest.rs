//! Run manifest (`*.run_meta.json`), run timing and the end-of-run summary
//!
//! The manifest is written once per run by the master, after every worker
//! has finished. A failed write is logged and never aborts the run.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::common::{format_hms, OutputError, OutputResult, RunRates};
use crate::config::{OutputPaths, SimulationConfig};

/// Timestamp layout used in the manifest (local time)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Total CPU time (user + system) consumed by this process so far
#[cfg(unix)]
pub fn process_cpu_time() -> Duration {
    fn timeval_to_duration(tv: libc::timeval) -> Duration {
        let secs = if tv.tv_sec < 0 { 0 } else { tv.tv_sec as u64 };
        let usec = tv.tv_usec.clamp(0, 999_999) as u64;
        Duration::from_secs(secs) + Duration::from_micros(usec)
    }

    // SAFETY: a zeroed rusage is a valid out-parameter and the return code is checked.
    unsafe {
        let mut ru: libc::rusage = std::mem::zeroed();
        if libc::getrusage(libc::RUSAGE_SELF, &mut ru) != 0 {
            return Duration::ZERO;
        }
        timeval_to_duration(ru.ru_utime).saturating_add(timeval_to_duration(ru.ru_stime))
    }
}

/// CPU time is not measured on this platform
#[cfg(not(unix))]
pub fn process_cpu_time() -> Duration {
    Duration::ZERO
}

/// Wall and CPU clock started at run begin
#[derive(Debug, Clone, Copy)]
pub struct RunTimer {
    started: Instant,
    cpu_at_start: Duration,
}

impl RunTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
            cpu_at_start: process_cpu_time(),
        }
    }

    /// Time elapsed since `start`
    pub fn elapsed(&self) -> RunTiming {
        RunTiming {
            wall: self.started.elapsed(),
            cpu: process_cpu_time().saturating_sub(self.cpu_at_start),
        }
    }
}

/// Elapsed wall and CPU time of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTiming {
    pub wall: Duration,
    pub cpu: Duration,
}

impl RunTiming {
    /// Whole wall-clock seconds (truncated)
    pub fn wall_seconds(&self) -> u64 {
        self.wall.as_secs()
    }

    /// Whole CPU seconds (truncated)
    pub fn cpu_seconds(&self) -> u64 {
        self.cpu.as_secs()
    }
}

/// Aggregate figures of a finished run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub events: u64,
    pub threads_effective: usize,
    /// Photons seen at creation
    pub total_photons: u64,
    /// Photon-exit records written to the photon stream
    pub photon_records: u64,
    /// Deposit records written; `None` when deposit output is disabled
    pub total_deposits: Option<u64>,
    pub deposits_without_primary: u64,
    /// Records dropped by failed flushes, all kinds
    pub records_lost: u64,
    pub timing: RunTiming,
}

impl RunSummary {
    pub fn rates(&self) -> RunRates {
        RunRates::compute(
            self.events,
            self.total_photons,
            self.timing.wall_seconds(),
            self.timing.cpu_seconds(),
        )
    }

    /// Emit the operator-facing statistics block
    pub fn log(&self) {
        let rates = self.rates();
        info!("======================================");
        info!("          Run Statistics");
        info!("======================================");
        info!("Total events: {}", self.events);
        info!("Total Cherenkov photons: {}", self.total_photons);
        info!("Wall clock time: {}", format_hms(self.timing.wall_seconds()));
        info!("CPU time: {}", format_hms(self.timing.cpu_seconds()));
        info!("Events/sec (wall): {:.1}", rates.events_per_second);
        info!("Avg photons/event: {:.1}", rates.photons_per_event);
        if let Some(speedup) = rates.speedup {
            info!("Speedup (CPU/Wall): {:.1}x", speedup);
        }
        if let Some(deposits) = self.total_deposits {
            info!(
                "Energy deposits: {} ({} without primary vertex)",
                deposits, self.deposits_without_primary
            );
        }
        if self.records_lost > 0 {
            warn!(records = self.records_lost, "Records lost to failed flushes");
        }
        info!("======================================");
    }
}

/// Run-level summary document
///
/// Field order is the on-disk key order. The three deposit keys are
/// present only when deposit output was enabled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub timestamp: String,
    pub output_base_path: String,
    pub output_format: String,
    pub phsp_file_path: String,
    pub num_threads_config: usize,
    pub num_threads_effective: usize,
    pub events: u64,
    pub total_photons: u64,
    pub wall_time_seconds: u64,
    pub cpu_time_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deposits: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose_output_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dose_deposits_without_primary: Option<u64>,
}

impl RunManifest {
    /// Build the manifest for a finished run, stamped with the current local time
    pub fn from_run(config: &SimulationConfig, paths: &OutputPaths, summary: &RunSummary) -> Self {
        let timestamp = chrono::Local::now().format(TIMESTAMP_FORMAT).to_string();
        Self::with_timestamp(timestamp, config, paths, summary)
    }

    pub fn with_timestamp(
        timestamp: String,
        config: &SimulationConfig,
        paths: &OutputPaths,
        summary: &RunSummary,
    ) -> Self {
        let deposits_enabled = summary.total_deposits.is_some();
        Self {
            timestamp,
            output_base_path: paths.base.display().to_string(),
            output_format: config.output_format.as_str().to_string(),
            phsp_file_path: config.phsp_file_path.clone(),
            num_threads_config: config.num_threads,
            num_threads_effective: summary.threads_effective,
            events: summary.events,
            total_photons: summary.total_photons,
            wall_time_seconds: summary.timing.wall_seconds(),
            cpu_time_seconds: summary.timing.cpu_seconds(),
            total_deposits: summary.total_deposits,
            dose_output_path: deposits_enabled.then(|| paths.deposits.display().to_string()),
            dose_deposits_without_primary: deposits_enabled
                .then_some(summary.deposits_without_primary),
        }
    }

    /// Serialize as pretty-printed JSON with a trailing newline
    pub fn to_json(&self) -> OutputResult<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    /// Write to `path`, replacing any previous manifest
    pub fn write(&self, path: &Path) -> OutputResult<()> {
        let json = self.to_json()?;
        fs::write(path, json).map_err(|e| OutputError::write(path, e))
    }

    /// Write and log the outcome; failures are not propagated
    pub fn write_or_warn(&self, path: &Path) -> bool {
        match self.write(path) {
            Ok(()) => {
                info!(path = %path.display(), "Run manifest written");
                true
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Failed to write run manifest");
                false
            }
        }
    }

    /// Load a manifest written by a previous run
    pub fn read(path: &Path) -> OutputResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| OutputError::open(path, e))?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Whether `path` is the deposit file recorded in this manifest
    ///
    /// Paths are compared after canonicalization when both resolve,
    /// otherwise as written.
    pub fn lists_deposit_file(&self, path: &Path) -> bool {
        let Some(listed) = self.dose_output_path.as_deref() else {
            return false;
        };
        let listed = Path::new(listed);
        match (listed.canonicalize(), path.canonicalize()) {
            (Ok(a), Ok(b)) => a == b,
            _ => listed == path,
        }
    }
}
