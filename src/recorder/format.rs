//! Binary record layouts for photon and deposit output files
//!
//! File structure (no file-level header, all little-endian):
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Record 0  (fixed size)                 │
//! ├─────────────────────────────────────────┤
//! │  Record 1                               │
//! ├─────────────────────────────────────────┤
//! │  ...                                    │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Photon-exit record (`.phsp`, format v2, 60 bytes):
//! ```text
//! offset  0  initX initY initZ            f32 ×3  [cm]
//! offset 12  initDirX initDirY initDirZ   f32 ×3
//! offset 24  finalX finalY finalZ         f32 ×3  [cm]
//! offset 36  finalDirX finalDirY finalDirZ f32 ×3
//! offset 48  finalEnergy                  f32     [micro-eV]
//! offset 52  eventId                      u32
//! offset 56  trackId                      i32     (-1 = unknown)
//! ```
//!
//! Deposit record (`.dose`, 36 bytes):
//! ```text
//! offset  0  x y z       f32 ×3  [cm]
//! offset 12  dx dy dz    f32 ×3  [cm, relative to primary vertex]
//! offset 24  energy      f32     [MeV]
//! offset 28  eventId     u32
//! offset 32  pdg         i32
//! ```
//!
//! The layout of each kind is described out of band by a sibling text
//! header (`.header` / `.dose.header`) generated from the same field table.

use std::fmt;
use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use bytes::{Buf, BufMut};
use xxhash_rust::xxh64::Xxh64;

use crate::common::units::{mev_to_micro_ev, mm_to_cm};
use crate::common::{OutputError, OutputResult, Vec3};

/// Current photon file format version
pub const FORMAT_VERSION: u32 = 2;

/// Format version of the 52-byte photon layout without ids
pub const LEGACY_FORMAT_VERSION: u32 = 1;

/// Photon-exit record size (format v2)
pub const PHOTON_RECORD_SIZE: usize = 60;

/// Photon record size without event/track ids (format v1)
pub const LEGACY_PHOTON_RECORD_SIZE: usize = 52;

/// Deposit record size
pub const DEPOSIT_RECORD_SIZE: usize = 36;

/// Record kind; each kind has its own buffers, files and mutex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordKind {
    Photon,
    Deposit,
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordKind::Photon => write!(f, "photon"),
            RecordKind::Deposit => write!(f, "deposit"),
        }
    }
}

/// One column of a binary record, used to render the header artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Human-readable column name
    pub name: &'static str,
    /// Name used in the numpy dtype
    pub dtype_name: &'static str,
    /// numpy dtype code
    pub dtype: &'static str,
    /// Unit, if any
    pub unit: Option<&'static str>,
}

const fn field(
    name: &'static str,
    dtype_name: &'static str,
    dtype: &'static str,
    unit: Option<&'static str>,
) -> FieldSpec {
    FieldSpec {
        name,
        dtype_name,
        dtype,
        unit,
    }
}

const CM: Option<&str> = Some("cm");

const PHOTON_FIELDS_V1: [FieldSpec; 13] = [
    field("InitialX", "initX", "<f4", CM),
    field("InitialY", "initY", "<f4", CM),
    field("InitialZ", "initZ", "<f4", CM),
    field("InitialDirX", "initDirX", "<f4", None),
    field("InitialDirY", "initDirY", "<f4", None),
    field("InitialDirZ", "initDirZ", "<f4", None),
    field("FinalX", "finalX", "<f4", CM),
    field("FinalY", "finalY", "<f4", CM),
    field("FinalZ", "finalZ", "<f4", CM),
    field("FinalDirX", "finalDirX", "<f4", None),
    field("FinalDirY", "finalDirY", "<f4", None),
    field("FinalDirZ", "finalDirZ", "<f4", None),
    field("FinalEnergy", "finalEnergy", "<f4", Some("microeV")),
];

const PHOTON_FIELDS_V2: [FieldSpec; 15] = [
    PHOTON_FIELDS_V1[0],
    PHOTON_FIELDS_V1[1],
    PHOTON_FIELDS_V1[2],
    PHOTON_FIELDS_V1[3],
    PHOTON_FIELDS_V1[4],
    PHOTON_FIELDS_V1[5],
    PHOTON_FIELDS_V1[6],
    PHOTON_FIELDS_V1[7],
    PHOTON_FIELDS_V1[8],
    PHOTON_FIELDS_V1[9],
    PHOTON_FIELDS_V1[10],
    PHOTON_FIELDS_V1[11],
    PHOTON_FIELDS_V1[12],
    field("EventID", "event_id", "<u4", None),
    field("TrackID", "track_id", "<i4", None),
];

const DEPOSIT_FIELDS: [FieldSpec; 9] = [
    field("X", "x", "<f4", CM),
    field("Y", "y", "<f4", CM),
    field("Z", "z", "<f4", CM),
    field("DX (from primary vertex)", "dx", "<f4", CM),
    field("DY (from primary vertex)", "dy", "<f4", CM),
    field("DZ (from primary vertex)", "dz", "<f4", CM),
    field("Energy", "energy", "<f4", Some("MeV")),
    field("EventID", "event_id", "<u4", None),
    field("PDG", "pdg", "<i4", None),
];

/// A fixed-size, little-endian record with no padding
///
/// Encoding is infallible and lossy (f64 → f32); values are not validated.
pub trait BinaryRecord: Copy + Send + fmt::Debug + 'static {
    /// Encoded size in bytes
    const SIZE: usize;
    /// Which mutex domain / output stream the record belongs to
    const KIND: RecordKind;
    /// Layout version reported in the header artifact
    const VERSION: u32;
    /// Header key that carries `SIZE`
    const SIZE_KEY: &'static str;
    /// Header title line
    const TITLE: &'static str;
    /// Column table, in wire order
    const FIELDS: &'static [FieldSpec];

    /// Append exactly `SIZE` bytes to `buf`
    fn encode_into<B: BufMut>(&self, buf: &mut B);

    /// Decode from the first `SIZE` bytes of `data`
    fn decode(data: &[u8]) -> Option<Self>;

    /// Encode into a fresh vector
    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        self.encode_into(&mut buf);
        buf
    }
}

fn put_vec3<B: BufMut>(buf: &mut B, v: &[f32; 3]) {
    buf.put_f32_le(v[0]);
    buf.put_f32_le(v[1]);
    buf.put_f32_le(v[2]);
}

fn get_vec3(buf: &mut &[u8]) -> [f32; 3] {
    [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()]
}

fn narrow(v: Vec3) -> [f32; 3] {
    [v[0] as f32, v[1] as f32, v[2] as f32]
}

fn narrow_cm(v: Vec3) -> [f32; 3] {
    [
        mm_to_cm(v[0]) as f32,
        mm_to_cm(v[1]) as f32,
        mm_to_cm(v[2]) as f32,
    ]
}

/// Engine event ids are signed; unknown (negative) ids are stored as 0
pub fn coerce_event_id(event_id: i64) -> u32 {
    u32::try_from(event_id).unwrap_or(0)
}

// =============================================================================
// Photon-exit record
// =============================================================================

/// One optical photon's creation point and boundary-crossing (or absorption) state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonExitRecord {
    /// Creation position [cm]
    pub init_pos: [f32; 3],
    /// Creation direction (unit vector)
    pub init_dir: [f32; 3],
    /// Exit position [cm]
    pub final_pos: [f32; 3],
    /// Exit direction (unit vector)
    pub final_dir: [f32; 3],
    /// Exit energy [micro-eV]
    pub final_energy: f32,
    /// Owning event
    pub event_id: u32,
    /// Track id, -1 when unknown
    pub track_id: i32,
}

impl PhotonExitRecord {
    /// Build a record from native engine units (mm, MeV)
    #[allow(clippy::too_many_arguments)]
    pub fn from_native(
        init_pos: Vec3,
        init_dir: Vec3,
        final_pos: Vec3,
        final_dir: Vec3,
        final_energy: f64,
        event_id: i64,
        track_id: i32,
    ) -> Self {
        Self {
            init_pos: narrow_cm(init_pos),
            init_dir: narrow(init_dir),
            final_pos: narrow_cm(final_pos),
            final_dir: narrow(final_dir),
            final_energy: mev_to_micro_ev(final_energy) as f32,
            event_id: coerce_event_id(event_id),
            track_id,
        }
    }
}

/// Photon-exit values in native engine units, before narrowing
///
/// Binary output narrows these into a `PhotonExitRecord`; CSV output prints
/// them at full precision.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PhotonSample {
    pub init_pos: Vec3,
    pub init_dir: Vec3,
    pub final_pos: Vec3,
    pub final_dir: Vec3,
    /// Exit energy [MeV]
    pub energy: f64,
    pub event_id: i64,
    pub track_id: i32,
}

impl PhotonSample {
    pub fn to_record(&self) -> PhotonExitRecord {
        PhotonExitRecord::from_native(
            self.init_pos,
            self.init_dir,
            self.final_pos,
            self.final_dir,
            self.energy,
            self.event_id,
            self.track_id,
        )
    }
}

impl BinaryRecord for PhotonExitRecord {
    const SIZE: usize = PHOTON_RECORD_SIZE;
    const KIND: RecordKind = RecordKind::Photon;
    const VERSION: u32 = FORMAT_VERSION;
    const SIZE_KEY: &'static str = "bytes_per_photon";
    const TITLE: &'static str = "Binary Phase Space File";
    const FIELDS: &'static [FieldSpec] = &PHOTON_FIELDS_V2;

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        put_vec3(buf, &self.init_pos);
        put_vec3(buf, &self.init_dir);
        put_vec3(buf, &self.final_pos);
        put_vec3(buf, &self.final_dir);
        buf.put_f32_le(self.final_energy);
        buf.put_u32_le(self.event_id);
        buf.put_i32_le(self.track_id);
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data.get(..Self::SIZE)?;
        Some(Self {
            init_pos: get_vec3(&mut buf),
            init_dir: get_vec3(&mut buf),
            final_pos: get_vec3(&mut buf),
            final_dir: get_vec3(&mut buf),
            final_energy: buf.get_f32_le(),
            event_id: buf.get_u32_le(),
            track_id: buf.get_i32_le(),
        })
    }
}

/// Photon record without event/track ids (format v1)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LegacyPhotonRecord {
    pub init_pos: [f32; 3],
    pub init_dir: [f32; 3],
    pub final_pos: [f32; 3],
    pub final_dir: [f32; 3],
    pub final_energy: f32,
}

impl From<&PhotonExitRecord> for LegacyPhotonRecord {
    fn from(r: &PhotonExitRecord) -> Self {
        Self {
            init_pos: r.init_pos,
            init_dir: r.init_dir,
            final_pos: r.final_pos,
            final_dir: r.final_dir,
            final_energy: r.final_energy,
        }
    }
}

impl BinaryRecord for LegacyPhotonRecord {
    const SIZE: usize = LEGACY_PHOTON_RECORD_SIZE;
    const KIND: RecordKind = RecordKind::Photon;
    const VERSION: u32 = LEGACY_FORMAT_VERSION;
    const SIZE_KEY: &'static str = "bytes_per_photon";
    const TITLE: &'static str = "Binary Phase Space File";
    const FIELDS: &'static [FieldSpec] = &PHOTON_FIELDS_V1;

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        put_vec3(buf, &self.init_pos);
        put_vec3(buf, &self.init_dir);
        put_vec3(buf, &self.final_pos);
        put_vec3(buf, &self.final_dir);
        buf.put_f32_le(self.final_energy);
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data.get(..Self::SIZE)?;
        Some(Self {
            init_pos: get_vec3(&mut buf),
            init_dir: get_vec3(&mut buf),
            final_pos: get_vec3(&mut buf),
            final_dir: get_vec3(&mut buf),
            final_energy: buf.get_f32_le(),
        })
    }
}

// =============================================================================
// Deposit record
// =============================================================================

/// One energy-deposit sample
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DepositRecord {
    /// Deposit position [cm]
    pub position: [f32; 3],
    /// Position relative to the event's primary vertex [cm]; zero without one
    pub relative: [f32; 3],
    /// Deposited energy [MeV]
    pub energy: f32,
    /// Owning event
    pub event_id: u32,
    /// PDG code of the depositing particle
    pub pdg: i32,
}

impl DepositRecord {
    /// Build a record from native engine units (mm, MeV)
    ///
    /// `primary_vertex` is the event's primary vertex in mm; `None` writes
    /// a zero relative position.
    pub fn from_native(
        position: Vec3,
        primary_vertex: Option<Vec3>,
        energy: f64,
        event_id: i64,
        pdg: i32,
    ) -> Self {
        let pos_cm = position.map(mm_to_cm);
        let relative = match primary_vertex {
            Some(vertex) => {
                let vertex_cm = vertex.map(mm_to_cm);
                [
                    (pos_cm[0] - vertex_cm[0]) as f32,
                    (pos_cm[1] - vertex_cm[1]) as f32,
                    (pos_cm[2] - vertex_cm[2]) as f32,
                ]
            }
            None => [0.0; 3],
        };

        Self {
            position: narrow(pos_cm),
            relative,
            energy: energy as f32,
            event_id: coerce_event_id(event_id),
            pdg,
        }
    }
}

impl BinaryRecord for DepositRecord {
    const SIZE: usize = DEPOSIT_RECORD_SIZE;
    const KIND: RecordKind = RecordKind::Deposit;
    const VERSION: u32 = FORMAT_VERSION;
    const SIZE_KEY: &'static str = "bytes_per_record";
    const TITLE: &'static str = "Binary Dose Deposit File";
    const FIELDS: &'static [FieldSpec] = &DEPOSIT_FIELDS;

    fn encode_into<B: BufMut>(&self, buf: &mut B) {
        put_vec3(buf, &self.position);
        put_vec3(buf, &self.relative);
        buf.put_f32_le(self.energy);
        buf.put_u32_le(self.event_id);
        buf.put_i32_le(self.pdg);
    }

    fn decode(data: &[u8]) -> Option<Self> {
        let mut buf = data.get(..Self::SIZE)?;
        Some(Self {
            position: get_vec3(&mut buf),
            relative: get_vec3(&mut buf),
            energy: buf.get_f32_le(),
            event_id: buf.get_u32_le(),
            pdg: buf.get_i32_le(),
        })
    }
}

// =============================================================================
// Header artifact
// =============================================================================

/// Render the human-readable layout description for record type `T`
///
/// Downstream tools parse the `format_version` and `bytes_per_*` lines.
pub fn header_text<T: BinaryRecord>() -> String {
    let mut out = String::with_capacity(1024);
    let underline = "=".repeat(T::TITLE.len());

    out.push_str(&format!("{}\n{}\n\n", T::TITLE, underline));
    out.push_str(&format!("format_version: {}\n", T::VERSION));
    out.push_str("byte_order: little-endian\n");
    out.push_str(&format!("{}: {}\n", T::SIZE_KEY, T::SIZE));
    out.push_str(&format!("fields_per_record: {}\n", T::FIELDS.len()));
    out.push_str("file_header: none (records start at offset 0)\n\n");

    out.push_str("Field order:\n");
    for (i, f) in T::FIELDS.iter().enumerate() {
        match f.unit {
            Some(unit) => out.push_str(&format!("{:>3}. {} [{}] ({})\n", i + 1, f.name, unit, f.dtype)),
            None => out.push_str(&format!("{:>3}. {} ({})\n", i + 1, f.name, f.dtype)),
        }
    }

    let dtype = T::FIELDS
        .iter()
        .map(|f| format!("(\"{}\", \"{}\")", f.dtype_name, f.dtype))
        .collect::<Vec<_>>()
        .join(", ");
    let extension = match T::KIND {
        RecordKind::Photon => "phsp",
        RecordKind::Deposit => "dose",
    };

    out.push_str("\nPython reading example:\n");
    out.push_str("  import numpy as np\n");
    out.push_str(&format!("  dtype = np.dtype([{}])\n", dtype));
    out.push_str(&format!(
        "  data = np.fromfile('file.{}', dtype=dtype)\n",
        extension
    ));
    out
}

/// Write the header artifact for `T` to `path` (truncating)
pub fn write_header_file<T: BinaryRecord>(path: &Path) -> OutputResult<()> {
    let file = File::create(path).map_err(|e| OutputError::open(path, e))?;
    let mut writer = BufWriter::new(file);
    writer
        .write_all(header_text::<T>().as_bytes())
        .and_then(|_| writer.flush())
        .map_err(|e| OutputError::write(path, e))
}

/// Layout facts parsed back from a header artifact
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderInfo {
    pub format_version: u32,
    /// Value of `bytes_per_photon` / `bytes_per_record`
    pub record_size: usize,
}

/// Parse `format_version` and the record size line from header text
///
/// A header without a `format_version` line is the legacy photon layout.
pub fn parse_header_text(text: &str) -> Option<HeaderInfo> {
    let mut format_version = None;
    let mut record_size = None;
    for line in text.lines() {
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        match key.trim() {
            "format_version" => format_version = value.trim().parse().ok(),
            "bytes_per_photon" | "bytes_per_record" => record_size = value.trim().parse().ok(),
            _ => {}
        }
    }
    let record_size = record_size?;
    Some(HeaderInfo {
        format_version: format_version.unwrap_or(LEGACY_FORMAT_VERSION),
        record_size,
    })
}

// =============================================================================
// Reading back
// =============================================================================

/// File format errors
#[derive(Debug, thiserror::Error)]
pub enum FileFormatError {
    #[error("File ends with a partial record ({trailing_bytes} trailing bytes)")]
    TruncatedRecord { trailing_bytes: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Iterator over fixed-size records from any reader
pub struct RecordFileReader<R, T> {
    reader: R,
    scratch: Vec<u8>,
    records_read: u64,
    done: bool,
    _record: std::marker::PhantomData<T>,
}

impl<R: Read, T: BinaryRecord> RecordFileReader<R, T> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            scratch: vec![0u8; T::SIZE],
            records_read: 0,
            done: false,
            _record: std::marker::PhantomData,
        }
    }

    /// Records yielded so far
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    /// Fill the scratch buffer; returns bytes read (< SIZE only at EOF)
    fn fill(&mut self) -> std::io::Result<usize> {
        let mut filled = 0;
        while filled < T::SIZE {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }
}

impl<R: Read, T: BinaryRecord> Iterator for RecordFileReader<R, T> {
    type Item = Result<T, FileFormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.fill() {
            Ok(0) => {
                self.done = true;
                None
            }
            Ok(n) if n < T::SIZE => {
                self.done = true;
                Some(Err(FileFormatError::TruncatedRecord { trailing_bytes: n }))
            }
            Ok(_) => {
                self.records_read += 1;
                // Scratch always holds SIZE bytes here
                T::decode(&self.scratch).map(Ok)
            }
            Err(e) => {
                self.done = true;
                Some(Err(FileFormatError::Io(e)))
            }
        }
    }
}

/// Read every record of a file into memory
pub fn read_records<T: BinaryRecord>(path: &Path) -> Result<Vec<T>, FileFormatError> {
    let file = File::open(path)?;
    RecordFileReader::<_, T>::new(std::io::BufReader::new(file)).collect()
}

/// Number of whole records and trailing bytes for a file of `len` bytes
pub fn record_count<T: BinaryRecord>(len: u64) -> (u64, u64) {
    let size = T::SIZE as u64;
    (len / size, len % size)
}

/// Streaming xxHash64 over a record file, for integrity reports
#[derive(Clone)]
pub struct ChecksumCalculator {
    hasher: Xxh64,
    bytes_processed: u64,
}

impl Default for ChecksumCalculator {
    fn default() -> Self {
        Self::new()
    }
}

impl ChecksumCalculator {
    pub fn new() -> Self {
        Self {
            hasher: Xxh64::new(0),
            bytes_processed: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    pub fn finalize(&self) -> u64 {
        self.hasher.digest()
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Hash a whole reader
    pub fn from_reader<R: Read>(mut reader: R) -> std::io::Result<Self> {
        let mut calc = Self::new();
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let n = match reader.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            };
            calc.update(&buf[..n]);
        }
        Ok(calc)
    }
}
