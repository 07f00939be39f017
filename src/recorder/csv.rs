//! Text output mode for photon-exit records
//!
//! Each worker streams its photons to `<base>.thread_<i>` without any
//! locking. At run end the master concatenates every thread file into
//! `<base>`, keeping a single header line, and removes the thread files.

use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::common::{OutputError, OutputResult};
use crate::config::OutputPaths;

use crate::common::units::{mev_to_micro_ev, mm_to_cm};

use super::format::PhotonSample;

/// Column header shared by thread files and the merged file
pub const CSV_HEADER: &str = "InitialX,InitialY,InitialZ,\
InitialDirX,InitialDirY,InitialDirZ,\
FinalX,FinalY,FinalZ,\
FinalDirX,FinalDirY,FinalDirZ,\
FinalEnergyMicroeV";

/// Format a value in scientific notation with six fractional digits and a
/// signed, at least two-digit exponent (`1.234560e+00`)
pub fn format_scientific(value: f64) -> String {
    let formatted = format!("{:.6e}", value);
    match formatted.split_once('e') {
        Some((mantissa, exponent)) => match exponent.parse::<i32>() {
            Ok(exp) => {
                let sign = if exp < 0 { '-' } else { '+' };
                format!("{}e{}{:02}", mantissa, sign, exp.abs())
            }
            Err(_) => formatted,
        },
        None => formatted,
    }
}

/// One CSV row for a photon, printed from native doubles in cm and micro-eV
pub fn photon_row(photon: &PhotonSample) -> String {
    let values = photon
        .init_pos
        .map(mm_to_cm)
        .into_iter()
        .chain(photon.init_dir)
        .chain(photon.final_pos.map(mm_to_cm))
        .chain(photon.final_dir)
        .chain(std::iter::once(mev_to_micro_ev(photon.energy)));

    let mut row = String::with_capacity(13 * 14);
    for (i, v) in values.enumerate() {
        if i > 0 {
            row.push(',');
        }
        row.push_str(&format_scientific(v));
    }
    row
}

/// Per-thread CSV stream
#[derive(Debug)]
pub struct CsvThreadWriter {
    writer: BufWriter<File>,
    path: PathBuf,
    rows: u64,
}

impl CsvThreadWriter {
    /// Create (truncate) the thread file and write the header line
    pub fn create(path: impl Into<PathBuf>) -> OutputResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| OutputError::open(&path, e))?;
        let mut writer = BufWriter::with_capacity(64 * 1024, file);
        writeln!(writer, "{}", CSV_HEADER).map_err(|e| OutputError::write(&path, e))?;
        Ok(Self {
            writer,
            path,
            rows: 0,
        })
    }

    pub fn write_photon(&mut self, photon: &PhotonSample) -> OutputResult<()> {
        writeln!(self.writer, "{}", photon_row(photon))
            .map_err(|e| OutputError::write(&self.path, e))?;
        self.rows += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Flush and close the thread file
    pub fn finish(mut self) -> OutputResult<u64> {
        self.writer
            .flush()
            .map_err(|e| OutputError::write(&self.path, e))?;
        Ok(self.rows)
    }
}

/// Merge `<base>.thread_0 .. thread_{n-1}` into `<base>`
///
/// Missing or unreadable thread files are skipped with a warning. Returns
/// the number of data rows in the merged file.
pub fn merge_thread_files(paths: &OutputPaths, thread_count: usize) -> OutputResult<u64> {
    info!(threads = thread_count, "Merging thread output files");

    let target = &paths.base;
    let file = File::create(target).map_err(|e| OutputError::open(target, e))?;
    let mut out = BufWriter::with_capacity(64 * 1024, file);
    writeln!(out, "{}", CSV_HEADER).map_err(|e| OutputError::write(target, e))?;

    let mut rows = 0u64;
    for index in 0..thread_count {
        let thread_path = paths.csv_thread_file(index);
        let thread_file = match File::open(&thread_path) {
            Ok(f) => f,
            Err(e) => {
                warn!(path = %thread_path.display(), error = %e, "Cannot open thread file");
                continue;
            }
        };

        // First line is the thread file's own header
        for line in BufReader::new(thread_file).lines().skip(1) {
            let line = line.map_err(|e| OutputError::write(&thread_path, e))?;
            writeln!(out, "{}", line).map_err(|e| OutputError::write(target, e))?;
            rows += 1;
        }

        if let Err(e) = fs::remove_file(&thread_path) {
            warn!(path = %thread_path.display(), error = %e, "Cannot remove thread file");
        }
    }

    out.flush().map_err(|e| OutputError::write(target, e))?;
    info!(path = %target.display(), rows, "CSV merge complete");
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn photon(x_mm: f64) -> PhotonSample {
        PhotonSample {
            init_pos: [x_mm, 0.0, 0.0],
            init_dir: [0.0, 0.0, 1.0],
            final_pos: [x_mm, 0.0, 100.0],
            final_dir: [0.0, 0.0, 1.0],
            energy: 3.0e-6,
            event_id: 1,
            track_id: 2,
        }
    }

    #[test]
    fn test_format_scientific() {
        assert_eq!(format_scientific(1.0), "1.000000e+00");
        assert_eq!(format_scientific(-0.00125), "-1.250000e-03");
        assert_eq!(format_scientific(3.0e6), "3.000000e+06");
        assert_eq!(format_scientific(0.0), "0.000000e+00");
    }

    #[test]
    fn test_photon_row() {
        let row = photon_row(&photon(25.0));
        let cols: Vec<&str> = row.split(',').collect();
        assert_eq!(cols.len(), 13);
        assert_eq!(cols[0], "2.500000e+00");
        assert_eq!(cols[8], "1.000000e+01");
        assert_eq!(cols[12], "3.000000e+06");
    }

    #[test]
    fn test_photon_row_keeps_double_precision() {
        // 1.23456749 cm narrows to 1.2345675 as f32
        let mut p = photon(0.0);
        p.init_pos = [12.3456749, 0.0, 0.0];
        let row = photon_row(&p);
        assert!(row.starts_with("1.234567e+00,"));
        assert_eq!(
            format_scientific(f64::from(p.to_record().init_pos[0])),
            "1.234568e+00"
        );
    }

    #[test]
    fn test_header_has_thirteen_columns() {
        assert_eq!(CSV_HEADER.split(',').count(), 13);
        assert!(CSV_HEADER.ends_with("FinalEnergyMicroeV"));
    }

    #[test]
    fn test_merge_keeps_single_header_and_removes_thread_files() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run.csv");
        let base = base.to_string_lossy();
        let paths = OutputPaths::new(&base, &base);

        for t in 0..3 {
            let mut writer = CsvThreadWriter::create(paths.csv_thread_file(t)).unwrap();
            for i in 0..=t {
                writer.write_photon(&photon((t * 10 + i) as f64)).unwrap();
            }
            assert_eq!(writer.finish().unwrap(), (t + 1) as u64);
        }

        let rows = merge_thread_files(&paths, 3).unwrap();
        assert_eq!(rows, 6);

        let merged = fs::read_to_string(&paths.base).unwrap();
        let lines: Vec<&str> = merged.lines().collect();
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], CSV_HEADER);
        assert_eq!(lines.iter().filter(|l| **l == CSV_HEADER).count(), 1);

        for t in 0..3 {
            assert!(!paths.csv_thread_file(t).exists());
        }
    }

    #[test]
    fn test_merge_skips_missing_thread_file() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("run.csv");
        let base = base.to_string_lossy();
        let paths = OutputPaths::new(&base, &base);

        let mut writer = CsvThreadWriter::create(paths.csv_thread_file(1)).unwrap();
        writer.write_photon(&photon(1.0)).unwrap();
        writer.finish().unwrap();

        assert_eq!(merge_thread_files(&paths, 2).unwrap(), 1);
    }
}
