//! Configuration module for the Cherenkov output pipeline
//!
//! Supports loading configuration from:
//! - JSON files (`config.json`, the simulation's native format)
//! - TOML files (same structure, chosen by `.toml` extension)
//!
//! The configuration is loaded once at process start and passed by
//! reference to every component that needs it.
//!
//! # Example
//! ```ignore
//! let config = Config::load("config.json")?;
//! let paths = config.output_paths();
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Failed to parse JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ConfigError {
    fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            field,
            reason: reason.into(),
        }
    }
}

/// Top-level configuration
///
/// Sections other than `simulation` (geometry, materials) belong to the
/// transport engine and are ignored here.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a JSON or TOML file (by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_toml = path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("toml"))
            .unwrap_or(false);

        let config = if is_toml {
            Self::from_toml(&content)?
        } else {
            Self::from_json(&content)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string (useful for testing)
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Configuration with every default and the given output base path
    pub fn with_output(output_file_path: impl Into<String>) -> Self {
        Self {
            simulation: SimulationConfig {
                output_file_path: output_file_path.into(),
                ..Default::default()
            },
        }
    }

    /// Reject values the pipeline cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let sim = &self.simulation;
        if sim.num_threads == 0 {
            return Err(ConfigError::invalid("num_threads", "must be at least 1"));
        }
        if sim.buffer_size == 0 {
            return Err(ConfigError::invalid("buffer_size", "must be at least 1"));
        }
        if sim.dose_buffer_size == Some(0) {
            return Err(ConfigError::invalid("dose_buffer_size", "must be at least 1"));
        }
        if sim.output_file_path.trim().is_empty() {
            return Err(ConfigError::invalid("output_file_path", "must not be empty"));
        }
        Ok(())
    }

    /// Resolve every output path derived from the configured base paths
    pub fn output_paths(&self) -> OutputPaths {
        OutputPaths::new(
            &self.simulation.output_file_path,
            self.simulation.dose_output_base(),
        )
    }
}

// =============================================================================
// Simulation Configuration
// =============================================================================

/// `simulation` section
#[derive(Debug, Clone, Deserialize)]
pub struct SimulationConfig {
    /// Input phase-space file (recorded in the manifest only)
    #[serde(default)]
    pub phsp_file_path: String,

    /// Output base path; suffixes are appended per artifact
    #[serde(default = "default_output_file_path")]
    pub output_file_path: String,

    /// Configured worker thread count
    #[serde(default = "default_num_threads")]
    pub num_threads: usize,

    /// Photon output mode
    #[serde(default)]
    pub output_format: OutputFormat,

    /// Master buffer capacity for photon records
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Record photon-exit data
    #[serde(default = "default_enable_cherenkov_output")]
    pub enable_cherenkov_output: bool,

    /// Record energy deposits
    #[serde(default)]
    pub enable_dose_output: bool,

    /// Base path for `.dose`; empty or absent falls back to `output_file_path`
    #[serde(default)]
    pub dose_output_path: Option<String>,

    /// Master buffer capacity for deposit records; absent falls back to `buffer_size`
    #[serde(default)]
    pub dose_buffer_size: Option<usize>,
}

fn default_output_file_path() -> String {
    "output/cherenkov_photons".to_string()
}

fn default_num_threads() -> usize {
    1
}

fn default_buffer_size() -> usize {
    100_000
}

fn default_enable_cherenkov_output() -> bool {
    true
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            phsp_file_path: String::new(),
            output_file_path: default_output_file_path(),
            num_threads: default_num_threads(),
            output_format: OutputFormat::default(),
            buffer_size: default_buffer_size(),
            enable_cherenkov_output: default_enable_cherenkov_output(),
            enable_dose_output: false,
            dose_output_path: None,
            dose_buffer_size: None,
        }
    }
}

impl SimulationConfig {
    /// Base path used for deposit artifacts
    pub fn dose_output_base(&self) -> &str {
        match self.dose_output_path.as_deref() {
            Some(p) if !p.is_empty() => p,
            _ => &self.output_file_path,
        }
    }

    /// Master capacity for deposit records
    pub fn dose_buffer_capacity(&self) -> usize {
        self.dose_buffer_size.unwrap_or(self.buffer_size)
    }
}

/// Photon output mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(try_from = "String")]
pub enum OutputFormat {
    /// Fixed-size binary records (`.phsp`)
    #[default]
    Binary,
    /// One CSV line per photon, merged from per-thread files
    Csv,
}

impl OutputFormat {
    /// Label written to the manifest
    pub fn as_str(&self) -> &'static str {
        match self {
            OutputFormat::Binary => "binary",
            OutputFormat::Csv => "csv",
        }
    }
}

impl TryFrom<String> for OutputFormat {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "binary" => Ok(OutputFormat::Binary),
            "csv" => Ok(OutputFormat::Csv),
            other => Err(format!(
                "unknown output_format '{}' (expected 'binary' or 'csv')",
                other
            )),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Output Paths
// =============================================================================

/// Every file the pipeline writes for one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputPaths {
    /// Output base path as configured
    pub base: PathBuf,
    /// Deposit base path (may equal `base`)
    pub dose_base: PathBuf,
    /// `<base>.phsp`
    pub photons: PathBuf,
    /// `<base>.header`
    pub photon_header: PathBuf,
    /// `<dose_base>.dose`
    pub deposits: PathBuf,
    /// `<dose_base>.dose.header`
    pub deposit_header: PathBuf,
    /// `<base>.run_meta.json`
    pub manifest: PathBuf,
}

impl OutputPaths {
    pub fn new(base: &str, dose_base: &str) -> Self {
        Self {
            base: PathBuf::from(base),
            dose_base: PathBuf::from(dose_base),
            photons: with_suffix(base, ".phsp"),
            photon_header: with_suffix(base, ".header"),
            deposits: with_suffix(dose_base, ".dose"),
            deposit_header: with_suffix(dose_base, ".dose.header"),
            manifest: with_suffix(base, ".run_meta.json"),
        }
    }

    /// Per-thread CSV file: `<base>.thread_<index>`
    pub fn csv_thread_file(&self, index: usize) -> PathBuf {
        with_suffix(&self.base.to_string_lossy(), &format!(".thread_{}", index))
    }
}

fn with_suffix(base: &str, suffix: &str) -> PathBuf {
    PathBuf::from(format!("{}{}", base, suffix))
}
