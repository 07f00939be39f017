//! Recording lifecycle per run
//!
//! ```text
//!   ┌───────────────┐ begin_run ┌────────┐
//!   │ Uninitialized │ ────────► │ Active │ ◄── record_photon / record_deposit
//!   └───────────────┘           └────────┘
//!                                   │ end of run (worker: absorb remainder)
//!                                   ▼
//!                              ┌──────────┐
//!                              │ Draining │
//!                              └──────────┘
//!                                   │ master: final flush, headers, manifest
//!                                   ▼
//!                              ┌──────────┐
//!                              │  Closed  │
//!                              └──────────┘
//! ```

use serde::{Deserialize, Serialize};

/// Lifecycle state of a recorder (master or worker)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum RecorderState {
    /// No buffers allocated
    #[default]
    Uninitialized,
    /// Accepting records
    Active,
    /// Moving remaining records towards disk
    Draining,
    /// Run finished, no further records accepted
    Closed,
}

impl RecorderState {
    /// Check if transition to target state is valid
    pub fn can_transition_to(&self, target: RecorderState) -> bool {
        use RecorderState::*;
        matches!(
            (self, target),
            (Uninitialized, Active) | (Active, Draining) | (Draining, Closed)
        )
    }
}

impl std::fmt::Display for RecorderState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecorderState::Uninitialized => write!(f, "Uninitialized"),
            RecorderState::Active => write!(f, "Active"),
            RecorderState::Draining => write!(f, "Draining"),
            RecorderState::Closed => write!(f, "Closed"),
        }
    }
}
