//! Common types shared across components
//!
//! This module defines unit conventions, shared counters, errors and
//! command-line arguments used by the recorder and the binaries.

pub mod cli;
pub use cli::{CommonArgs, SimArgs};

pub mod error;
pub use error::{OutputError, OutputResult};

pub mod metrics;
pub use metrics::{format_hms, CounterSnapshot, RunCounters, RunRates};

/// Three-vector in the transport engine's native units
pub type Vec3 = [f64; 3];

/// Unit conversion factors from the transport engine's native units
///
/// Native length is millimetres and native energy is MeV.
pub mod units {
    /// Native length units per centimetre
    pub const MM_PER_CM: f64 = 10.0;
    /// eV per native energy unit (MeV)
    pub const EV_PER_MEV: f64 = 1.0e6;
    /// Scale applied to eV to obtain the stored micro-eV value
    pub const MICRO_EV_PER_EV: f64 = 1.0e6;

    /// Convert a native length to centimetres
    #[inline]
    pub fn mm_to_cm(value: f64) -> f64 {
        value / MM_PER_CM
    }

    /// Convert a native energy to micro-eV
    #[inline]
    pub fn mev_to_micro_ev(value: f64) -> f64 {
        value * EV_PER_MEV * MICRO_EV_PER_EV
    }
}
