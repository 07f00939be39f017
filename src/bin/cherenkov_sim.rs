//! cherenkov_sim - drive the output pipeline with synthetic events
//!
//! Stands in for the transport engine: every worker thread generates
//! random events (primary vertex, Cherenkov photons, energy deposits) and
//! feeds them through an `EventRecorder`. Output files and the run
//! manifest are exactly what a real run produces.
//!
//! Usage:
//!   cherenkov_sim -c config.json -n 10000 -t 4 --dose

use std::f64::consts::PI;
use std::path::Path;

use anyhow::Context;
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Exp, Normal, Poisson};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use cherenkov_rs::common::{SimArgs, Vec3};
use cherenkov_rs::config::Config;
use cherenkov_rs::event::EventRecorder;
use cherenkov_rs::recorder::{Recorder, RunContext};

/// Mean Cherenkov photons per primary
const MEAN_PHOTONS: f64 = 50.0;
/// Fraction of photons reaching the exit plane
const EXIT_PROBABILITY: f64 = 0.8;
/// Exit plane position along z [mm]
const EXIT_PLANE_Z: f64 = 100.0;
/// Cherenkov cone half-angle in water [rad]
const CONE_ANGLE: f64 = 0.72;
/// Fraction of events generated without a primary vertex
const NO_VERTEX_PROBABILITY: f64 = 0.01;

/// Random event source for one worker
struct EventGenerator {
    rng: StdRng,
    photons: Poisson<f64>,
    energy_ev: Normal<f64>,
    deposit_mev: Exp<f64>,
}

impl EventGenerator {
    fn new(seed: u64) -> anyhow::Result<Self> {
        Ok(Self {
            rng: StdRng::seed_from_u64(seed),
            photons: Poisson::new(MEAN_PHOTONS).context("photon count distribution")?,
            energy_ev: Normal::new(2.8, 0.4).context("photon energy distribution")?,
            deposit_mev: Exp::new(2.0).context("deposit energy distribution")?,
        })
    }

    fn vertex(&mut self) -> Option<Vec3> {
        if self.rng.gen_bool(NO_VERTEX_PROBABILITY) {
            return None;
        }
        Some([
            self.rng.gen_range(-5.0..5.0),
            self.rng.gen_range(-5.0..5.0),
            0.0,
        ])
    }

    /// Direction on the Cherenkov cone around +z
    fn cone_direction(&mut self) -> Vec3 {
        let phi = self.rng.gen_range(0.0..2.0 * PI);
        let (sin_t, cos_t) = CONE_ANGLE.sin_cos();
        [sin_t * phi.cos(), sin_t * phi.sin(), cos_t]
    }

    fn run_event(&mut self, events: &mut EventRecorder<'_>, event_id: i64) {
        let vertex = self.vertex();
        events.begin_event(event_id, vertex);
        let origin = vertex.unwrap_or([0.0; 3]);

        let n_photons = self.photons.sample(&mut self.rng) as i32;
        for i in 0..n_photons {
            let track_id = i + 2;
            let depth = self.rng.gen_range(0.0..EXIT_PLANE_Z * 0.5);
            let start = [origin[0], origin[1], origin[2] + depth];
            let dir = self.cone_direction();
            events.record_photon_creation(track_id, start, dir);

            if self.rng.gen_bool(EXIT_PROBABILITY) {
                let path = (EXIT_PLANE_Z - start[2]) / dir[2];
                let exit = [
                    start[0] + dir[0] * path,
                    start[1] + dir[1] * path,
                    EXIT_PLANE_Z,
                ];
                let energy_mev = self.energy_ev.sample(&mut self.rng).max(1.5) * 1.0e-6;
                events.record_photon_exit(track_id, exit, dir, energy_mev);
            }
        }

        let n_deposits = self.rng.gen_range(1..8);
        for _ in 0..n_deposits {
            let position = [
                origin[0] + self.rng.gen_range(-2.0..2.0),
                origin[1] + self.rng.gen_range(-2.0..2.0),
                self.rng.gen_range(0.0..EXIT_PLANE_Z),
            ];
            let pdg = if self.rng.gen_bool(0.9) { 11 } else { 22 };
            events.record_deposit(position, self.deposit_mev.sample(&mut self.rng), pdg);
        }

        events.end_event();
    }
}

fn load_config(args: &SimArgs) -> anyhow::Result<Config> {
    let path = Path::new(&args.common.config_file);
    let mut config = if path.exists() {
        Config::load(path).with_context(|| format!("loading {}", path.display()))?
    } else {
        warn!(path = %path.display(), "Config file not found, using defaults");
        Config::default()
    };

    let sim = &mut config.simulation;
    if let Some(threads) = args.threads {
        sim.num_threads = threads;
    }
    if let Some(output) = &args.output {
        sim.output_file_path = output.clone();
    }
    if let Some(buffer_size) = args.buffer_size {
        sim.buffer_size = buffer_size;
    }
    if args.dose {
        sim.enable_dose_output = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("cherenkov_rs=info".parse()?))
        .init();

    let args = SimArgs::parse();
    let config = load_config(&args)?;
    let sim = &config.simulation;

    if let Some(parent) = Path::new(&sim.output_file_path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    info!(
        events = args.events,
        threads = sim.num_threads,
        seed = args.seed,
        "Starting synthetic run"
    );

    let threads = sim.num_threads;
    let recorder = Recorder::begin_run(sim, RunContext::new(), threads);

    let generators = (0..threads)
        .map(|t| EventGenerator::new(args.seed.wrapping_add(t as u64)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let events_done: u64 = std::thread::scope(|s| {
        let handles: Vec<_> = generators
            .into_iter()
            .enumerate()
            .map(|(t, mut generator)| {
                let recorder = &recorder;
                let total = args.events;
                s.spawn(move || {
                    let mut events = EventRecorder::new(recorder.worker(t));
                    let mut event_id = t as u64;
                    while event_id < total {
                        generator.run_event(&mut events, event_id as i64);
                        event_id += threads as u64;
                    }
                    let done = events.events();
                    let report = events.finish();
                    info!(
                        thread = t,
                        events = done,
                        photons = report.photons,
                        deposits = report.deposits,
                        "Worker finished"
                    );
                    done
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().unwrap_or(0))
            .sum()
    });

    let summary = recorder.end_run(events_done);
    if summary.records_lost > 0 {
        anyhow::bail!("{} records lost to failed writes", summary.records_lost);
    }
    Ok(())
}
