//! phsp_inspect - inspection tool for photon (.phsp) and deposit (.dose) files
//!
//! Usage:
//!   phsp_inspect info <file>                 - Show layout and record count
//!   phsp_inspect dump <file> [-n N] [--skip K] - Print decoded records
//!   phsp_inspect verify <file> [--manifest M] - Check integrity against header and manifest

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};

use cherenkov_rs::recorder::{
    parse_header_text, record_count, BinaryRecord, ChecksumCalculator, DepositRecord,
    FileFormatError, HeaderInfo, LegacyPhotonRecord, PhotonExitRecord, RecordFileReader,
    RunManifest, LEGACY_PHOTON_RECORD_SIZE,
};

#[derive(Parser)]
#[command(name = "phsp_inspect")]
#[command(about = "Inspect Cherenkov photon and deposit record files")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show file layout and record count
    Info {
        /// Path to the .phsp or .dose file
        file: PathBuf,

        /// Treat a photon file as the 52-byte legacy layout
        #[arg(long)]
        legacy: bool,
    },

    /// Print decoded records
    Dump {
        /// Path to the .phsp or .dose file
        file: PathBuf,

        /// Number of records to print
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,

        /// Records to skip first
        #[arg(long, default_value = "0")]
        skip: usize,

        #[arg(long)]
        legacy: bool,
    },

    /// Verify record alignment, header and run manifest
    Verify {
        /// Path to the .phsp or .dose file
        file: PathBuf,

        /// Run manifest (default: derived from the file name; required for
        /// deposit files written under a separate dose path)
        #[arg(short, long)]
        manifest: Option<PathBuf>,

        #[arg(long)]
        legacy: bool,
    },
}

/// Record layout of an input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Layout {
    Photon,
    LegacyPhoton,
    Deposit,
}

impl Layout {
    fn record_size(self) -> usize {
        match self {
            Layout::Photon => PhotonExitRecord::SIZE,
            Layout::LegacyPhoton => LegacyPhotonRecord::SIZE,
            Layout::Deposit => DepositRecord::SIZE,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Layout::Photon => "photon-exit v2",
            Layout::LegacyPhoton => "photon-exit v1 (legacy)",
            Layout::Deposit => "energy deposit",
        }
    }
}

/// Input file with its sibling artifacts
struct Target {
    path: PathBuf,
    layout: Layout,
    header_path: PathBuf,
    header: Option<HeaderInfo>,
    base: String,
}

impl Target {
    fn resolve(path: &Path, legacy: bool) -> anyhow::Result<Self> {
        let name = path.to_string_lossy().to_string();
        let (base, header_path, is_deposit) = if let Some(base) = name.strip_suffix(".dose") {
            (base.to_string(), PathBuf::from(format!("{}.dose.header", base)), true)
        } else {
            let base = name.strip_suffix(".phsp").unwrap_or(&name).to_string();
            let header = PathBuf::from(format!("{}.header", base));
            (base, header, false)
        };

        let header = std::fs::read_to_string(&header_path)
            .ok()
            .and_then(|text| parse_header_text(&text));

        let layout = if is_deposit {
            Layout::Deposit
        } else if legacy || header.map(|h| h.record_size) == Some(LEGACY_PHOTON_RECORD_SIZE) {
            Layout::LegacyPhoton
        } else {
            Layout::Photon
        };

        Ok(Self {
            path: path.to_path_buf(),
            layout,
            header_path,
            header,
            base,
        })
    }

    fn len(&self) -> anyhow::Result<u64> {
        Ok(std::fs::metadata(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?
            .len())
    }

    fn counts(&self) -> anyhow::Result<(u64, u64)> {
        let len = self.len()?;
        Ok(match self.layout {
            Layout::Photon => record_count::<PhotonExitRecord>(len),
            Layout::LegacyPhoton => record_count::<LegacyPhotonRecord>(len),
            Layout::Deposit => record_count::<DepositRecord>(len),
        })
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Info { file, legacy } => show_info(&Target::resolve(&file, legacy)?),
        Commands::Dump {
            file,
            count,
            skip,
            legacy,
        } => {
            let target = Target::resolve(&file, legacy)?;
            match target.layout {
                Layout::Photon => dump::<PhotonExitRecord>(&target.path, skip, count),
                Layout::LegacyPhoton => dump::<LegacyPhotonRecord>(&target.path, skip, count),
                Layout::Deposit => dump::<DepositRecord>(&target.path, skip, count),
            }
        }
        Commands::Verify {
            file,
            manifest,
            legacy,
        } => verify(&Target::resolve(&file, legacy)?, manifest),
    }
}

fn show_info(target: &Target) -> anyhow::Result<()> {
    let (records, trailing) = target.counts()?;

    println!("File: {}", target.path.display());
    println!("Size: {} bytes", target.len()?);
    println!();
    println!("=== Layout ===");
    println!("  Kind:           {}", target.layout.name());
    println!("  Record size:    {} bytes", target.layout.record_size());
    println!("  Records:        {}", records);
    if trailing > 0 {
        println!("  \x1b[33mTrailing bytes: {}\x1b[0m", trailing);
    }

    println!();
    println!("=== Header ===");
    match target.header {
        Some(h) => {
            println!("  Path:           {}", target.header_path.display());
            println!("  Format version: {}", h.format_version);
            println!("  Record size:    {} bytes", h.record_size);
        }
        None => println!("  (no header at {})", target.header_path.display()),
    }
    Ok(())
}

fn dump<T: BinaryRecord>(path: &Path, skip: usize, count: usize) -> anyhow::Result<()> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    let reader = RecordFileReader::<_, T>::new(BufReader::new(file));

    for (index, record) in reader.enumerate().skip(skip).take(count) {
        match record {
            Ok(r) => println!("{:>10}: {:?}", index, r),
            Err(FileFormatError::TruncatedRecord { trailing_bytes }) => {
                println!("{:>10}: <truncated, {} bytes>", index, trailing_bytes);
            }
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

fn verify(target: &Target, manifest: Option<PathBuf>) -> anyhow::Result<()> {
    println!("Verifying: {}", target.path.display());
    println!();

    let mut problems = Vec::new();
    let (records, trailing) = target.counts()?;
    println!("  Records:        {}", records);
    if trailing > 0 {
        problems.push(format!("file ends with a partial record ({} bytes)", trailing));
    }

    let file = File::open(&target.path)?;
    let checksum = ChecksumCalculator::from_reader(BufReader::new(file))?;
    println!("  Checksum:       {:016x}", checksum.finalize());

    match target.header {
        Some(h) if h.record_size != target.layout.record_size() => problems.push(format!(
            "header declares {} bytes per record, layout is {}",
            h.record_size,
            target.layout.record_size()
        )),
        Some(h) => println!("  Header:         v{}, {} bytes/record", h.format_version, h.record_size),
        None => problems.push(format!("missing header {}", target.header_path.display())),
    }

    // The manifest sits next to the photon output; deposit files written
    // under a separate dose path need --manifest
    let manifest_path =
        manifest.unwrap_or_else(|| PathBuf::from(format!("{}.run_meta.json", target.base)));
    match RunManifest::read(&manifest_path) {
        Ok(m) => {
            println!("  Manifest:       {}", manifest_path.display());
            match target.layout {
                Layout::Deposit if !m.lists_deposit_file(&target.path) => problems.push(format!(
                    "manifest {} does not list this deposit file",
                    manifest_path.display()
                )),
                Layout::Deposit => match m.total_deposits {
                    Some(total) if total != records => problems.push(format!(
                        "manifest lists {} deposits, file holds {}",
                        total, records
                    )),
                    Some(_) => {}
                    None => problems.push("manifest has no deposit totals".to_string()),
                },
                Layout::Photon | Layout::LegacyPhoton => {
                    // Only photons that reached an exit point are written
                    if records > m.total_photons {
                        problems.push(format!(
                            "file holds {} photons, manifest created only {}",
                            records, m.total_photons
                        ));
                    }
                }
            }
        }
        Err(e) if target.layout == Layout::Deposit => problems.push(format!(
            "deposit totals not checked ({}), pass --manifest <base>.run_meta.json",
            e
        )),
        Err(e) => println!("  \x1b[33mManifest not checked: {}\x1b[0m", e),
    }

    if problems.is_empty() {
        println!("\n\x1b[32m✓ File is valid\x1b[0m");
        return Ok(());
    }

    println!();
    for p in &problems {
        println!("  \x1b[31m✗ {}\x1b[0m", p);
    }
    bail!("{} problem(s) found in {}", problems.len(), target.path.display())
}
