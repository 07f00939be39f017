//! Per-event recording interface used by the transport engine
//!
//! One `EventRecorder` exists per worker. Photons are tracked from creation
//! to exit within an event; at end of event every photon that reached an
//! exit point is emitted as one `PhotonExitRecord`, in track-id order.
//! Photons created but never exited still count towards the run's photon
//! total.

use std::collections::BTreeMap;

use crate::common::Vec3;
use crate::recorder::{DepositRecord, PhotonSample, WorkerRecorder, WorkerReport};

#[derive(Debug, Clone, Copy)]
struct PhotonExit {
    position: Vec3,
    direction: Vec3,
    energy: f64,
}

#[derive(Debug, Clone, Copy)]
struct PhotonTrack {
    init_pos: Vec3,
    init_dir: Vec3,
    exit: Option<PhotonExit>,
}

/// Event-scoped front end of a `WorkerRecorder`
#[derive(Debug)]
pub struct EventRecorder<'a> {
    worker: WorkerRecorder<'a>,
    event_id: i64,
    primary_vertex: Option<Vec3>,
    tracks: BTreeMap<i32, PhotonTrack>,
    events: u64,
}

impl<'a> EventRecorder<'a> {
    pub fn new(worker: WorkerRecorder<'a>) -> Self {
        Self {
            worker,
            event_id: 0,
            primary_vertex: None,
            tracks: BTreeMap::new(),
            events: 0,
        }
    }

    /// Start a new event; clears the track table
    ///
    /// `primary_vertex` is in native units (mm).
    pub fn begin_event(&mut self, event_id: i64, primary_vertex: Option<Vec3>) {
        self.tracks.clear();
        self.event_id = event_id;
        self.primary_vertex = primary_vertex;
    }

    pub fn event_id(&self) -> i64 {
        self.event_id
    }

    /// Events completed by this worker
    pub fn events(&self) -> u64 {
        self.events
    }

    /// Tracks currently held for the open event
    pub fn open_tracks(&self) -> usize {
        self.tracks.len()
    }

    /// A Cherenkov photon was created
    ///
    /// Always counted in the run total. A repeated track id restarts that
    /// track.
    pub fn record_photon_creation(&mut self, track_id: i32, position: Vec3, direction: Vec3) {
        self.worker.context().counters().inc_photons_created();
        if !self.worker.photons_enabled() {
            return;
        }
        self.tracks.insert(
            track_id,
            PhotonTrack {
                init_pos: position,
                init_dir: direction,
                exit: None,
            },
        );
    }

    /// A tracked photon reached its exit point
    ///
    /// Returns false (and records nothing) for a track id never created in
    /// this event.
    pub fn record_photon_exit(
        &mut self,
        track_id: i32,
        position: Vec3,
        direction: Vec3,
        energy: f64,
    ) -> bool {
        match self.tracks.get_mut(&track_id) {
            Some(track) => {
                track.exit = Some(PhotonExit {
                    position,
                    direction,
                    energy,
                });
                true
            }
            None => false,
        }
    }

    /// Record an energy deposit for the current event
    pub fn record_deposit(&mut self, position: Vec3, energy: f64, pdg: i32) {
        if !self.worker.deposits_enabled() {
            return;
        }
        if self.primary_vertex.is_none() {
            self.worker
                .context()
                .counters()
                .inc_deposits_without_primary();
        }
        let record =
            DepositRecord::from_native(position, self.primary_vertex, energy, self.event_id, pdg);
        self.worker.record_deposit(record);
    }

    /// Emit every exited photon of the event; returns how many were emitted
    pub fn end_event(&mut self) -> usize {
        let mut emitted = 0;
        for (&track_id, track) in &self.tracks {
            if let Some(exit) = track.exit {
                self.worker.record_photon(PhotonSample {
                    init_pos: track.init_pos,
                    init_dir: track.init_dir,
                    final_pos: exit.position,
                    final_dir: exit.direction,
                    energy: exit.energy,
                    event_id: self.event_id,
                    track_id,
                });
                emitted += 1;
            }
        }
        self.tracks.clear();
        self.events += 1;
        emitted
    }

    /// End of run for this worker
    pub fn finish(self) -> WorkerReport {
        self.worker.finish()
    }
}
