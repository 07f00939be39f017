//! CLI argument parsing for the simulation driver
//!
//! # Design Principles (KISS)
//! - Use clap's derive macro for declarative argument definition
//! - Common arguments shared via composition, not inheritance
//! - Command-line values override the configuration file

use clap::Parser;

/// Common arguments shared across binaries
#[derive(Parser, Debug, Clone)]
pub struct CommonArgs {
    /// Path to configuration file (JSON or TOML)
    #[arg(short = 'c', long = "config", default_value = "config.json")]
    pub config_file: String,
}

/// Arguments for the synthetic simulation driver
#[derive(Parser, Debug, Clone)]
#[command(name = "cherenkov_sim")]
#[command(about = "Drive the Cherenkov output pipeline with synthetic events")]
pub struct SimArgs {
    #[command(flatten)]
    pub common: CommonArgs,

    /// Number of events to simulate
    #[arg(short = 'n', long = "events", default_value = "1000")]
    pub events: u64,

    /// Override number of worker threads
    #[arg(short = 't', long = "threads")]
    pub threads: Option<usize>,

    /// Override output base path (".phsp", ".header", ... are appended)
    #[arg(short = 'o', long = "output")]
    pub output: Option<String>,

    /// Override buffer capacity (records)
    #[arg(long = "buffer-size")]
    pub buffer_size: Option<usize>,

    /// Enable deposit (".dose") output
    #[arg(long = "dose")]
    pub dose: bool,

    /// Random seed for the synthetic event generator
    #[arg(long = "seed", default_value = "12345", env = "CHERENKOV_SEED")]
    pub seed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_common_args_default() {
        let args = CommonArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.config_file, "config.json");
    }

    #[test]
    fn test_common_args_custom_config() {
        let args = CommonArgs::try_parse_from(["test", "-c", "run.toml"]).unwrap();
        assert_eq!(args.config_file, "run.toml");
    }

    #[test]
    fn test_sim_args_default() {
        let args = SimArgs::try_parse_from(["test"]).unwrap();
        assert_eq!(args.events, 1000);
        assert_eq!(args.threads, None);
        assert_eq!(args.output, None);
        assert!(!args.dose);
    }

    #[test]
    fn test_sim_args_full() {
        let args = SimArgs::try_parse_from([
            "test",
            "--config",
            "sim.json",
            "-n",
            "50",
            "-t",
            "8",
            "-o",
            "out/run1",
            "--buffer-size",
            "4096",
            "--dose",
            "--seed",
            "7",
        ])
        .unwrap();
        assert_eq!(args.common.config_file, "sim.json");
        assert_eq!(args.events, 50);
        assert_eq!(args.threads, Some(8));
        assert_eq!(args.output.as_deref(), Some("out/run1"));
        assert_eq!(args.buffer_size, Some(4096));
        assert!(args.dose);
        assert_eq!(args.seed, 7);
    }
}
