//! End-to-end tests for the recording pipeline
//!
//! Runs go through `Recorder` / `WorkerRecorder` / `EventRecorder` with real
//! worker threads and temporary output directories, then the written files
//! and the run manifest are checked.

use std::path::Path;

use cherenkov_rs::config::{Config, OutputFormat};
use cherenkov_rs::event::EventRecorder;
use cherenkov_rs::recorder::{
    read_records, DepositRecord, PhotonExitRecord, PhotonSample, RecordBuffer, RecordSink,
    Recorder, RecorderState, RunContext, RunManifest, CSV_HEADER,
};
use rand::prelude::*;
use rand::rngs::StdRng;

fn config_in(dir: &Path, buffer_size: usize, threads: usize, dose: bool) -> Config {
    let mut config = Config::with_output(dir.join("run").to_string_lossy().to_string());
    config.simulation.buffer_size = buffer_size;
    config.simulation.num_threads = threads;
    config.simulation.enable_dose_output = dose;
    config
}

fn photon(event_id: i64, track_id: i32) -> PhotonSample {
    PhotonSample {
        init_pos: [0.0; 3],
        init_dir: [0.0, 0.0, 1.0],
        final_pos: [0.0, 0.0, 100.0],
        final_dir: [0.0, 0.0, 1.0],
        energy: 3.0e-6,
        event_id,
        track_id,
    }
}

fn deposit(event_id: i64) -> DepositRecord {
    DepositRecord::from_native([1.0, 2.0, 3.0], Some([0.0; 3]), 0.5, event_id, 11)
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[test]
fn test_conservation_across_threads() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 64, 4, true);
    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 4);

    let per_thread: Vec<(u64, u64)> = std::thread::scope(|s| {
        let handles: Vec<_> = (0..4)
            .map(|t| {
                let recorder = &recorder;
                s.spawn(move || {
                    let mut rng = StdRng::seed_from_u64(1000 + t as u64);
                    let mut worker = recorder.worker(t);
                    let photons = rng.gen_range(500..1500);
                    let deposits = rng.gen_range(100..700);
                    for i in 0..photons {
                        worker.record_photon(photon(t as i64, i));
                    }
                    for _ in 0..deposits {
                        worker.record_deposit(deposit(t as i64));
                    }
                    let report = worker.finish();
                    assert_eq!(report.photons, photons as u64);
                    assert_eq!(report.deposits, deposits as u64);
                    (report.photons, report.deposits)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let photons: u64 = per_thread.iter().map(|p| p.0).sum();
    let deposits: u64 = per_thread.iter().map(|p| p.1).sum();

    let paths = recorder.paths().clone();
    let summary = recorder.end_run(4);

    assert_eq!(file_len(&paths.photons), photons * 60);
    assert_eq!(file_len(&paths.deposits), deposits * 36);
    assert_eq!(summary.photon_records, photons);
    assert_eq!(summary.total_deposits, Some(deposits));
    assert_eq!(summary.records_lost, 0);

    // Each worker's records keep their relative order in the merged stream
    let records = read_records::<PhotonExitRecord>(&paths.photons).unwrap();
    for t in 0..4u32 {
        let tracks: Vec<i32> = records
            .iter()
            .filter(|r| r.event_id == t)
            .map(|r| r.track_id)
            .collect();
        assert!(tracks.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(tracks.len() as u64, per_thread[t as usize].0);
    }
}

#[test]
fn test_capacity_four_two_threads_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 4, 2, true);
    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 2);
    let paths = recorder.paths().clone();

    let mut worker_a = recorder.worker(0);
    let mut worker_b = recorder.worker(1);

    worker_a.record_deposit(deposit(0));
    assert_eq!(worker_a.staged(), (0, 1));
    worker_a.record_deposit(deposit(1));
    assert_eq!(worker_a.staged(), (0, 0));

    let stats = recorder.deposit_stats().unwrap();
    assert_eq!(stats.buffered, 2);
    assert_eq!(stats.flushed, 0);

    worker_b.record_deposit(deposit(2));
    worker_b.record_deposit(deposit(3));

    // Master full, but absorb never flushes after the merge
    let stats = recorder.deposit_stats().unwrap();
    assert_eq!(stats.buffered, 4);
    assert_eq!(stats.capacity, 4);
    assert_eq!(stats.flushed, 0);
    assert_eq!(file_len(&paths.deposits), 0);

    // The next overflowing absorb flushes the master first
    worker_a.record_deposit(deposit(4));
    worker_a.record_deposit(deposit(5));
    let stats = recorder.deposit_stats().unwrap();
    assert_eq!(stats.buffered, 2);
    assert_eq!(stats.flushed, 4);

    let on_disk: Vec<u32> = read_records::<DepositRecord>(&paths.deposits)
        .unwrap()
        .iter()
        .map(|r| r.event_id)
        .collect();
    assert_eq!(on_disk, vec![0, 1, 2, 3]);

    worker_a.finish();
    worker_b.finish();
    let summary = recorder.end_run(0);
    assert_eq!(summary.total_deposits, Some(6));
    assert_eq!(file_len(&paths.deposits), 6 * 36);
}

#[test]
fn test_capacity_never_exceeded() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bound.dose");
    let sink = RecordSink::<DepositRecord>::create(10, &path).unwrap();
    let mut rng = StdRng::seed_from_u64(31);

    let mut worker = RecordBuffer::for_worker(10, 3);
    let mut appended = 0u64;
    for _ in 0..500 {
        match rng.gen_range(0..10) {
            0 => {
                sink.absorb(&mut worker);
            }
            1 => worker.clear(),
            _ => {
                worker.append(deposit(appended as i64));
                appended += 1;
                if worker.is_full() {
                    sink.absorb(&mut worker);
                }
            }
        }
        assert!(worker.len() <= worker.capacity());
        let stats = sink.stats();
        assert!(stats.buffered <= stats.capacity);
    }
    assert_eq!(worker.total_written(), appended);
}

#[test]
fn test_single_thread_appends_directly_to_master() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 3, 1, false);
    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 1);
    let paths = recorder.paths().clone();

    let mut worker = recorder.worker(0);
    for i in 0..7 {
        worker.record_photon(photon(0, i));
    }
    assert_eq!(worker.staged(), (0, 0));
    // Two full master buffers flushed, one record held
    assert_eq!(file_len(&paths.photons), 6 * 60);

    worker.finish();
    let summary = recorder.end_run(1);
    assert_eq!(summary.photon_records, 7);
    assert_eq!(file_len(&paths.photons), 7 * 60);
}

#[test]
fn test_run_artifacts_and_manifest_scenario() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 1000, 4, true);
    let ctx = RunContext::new();
    let recorder = Recorder::begin_run(&config.simulation, ctx.clone(), 4);
    assert_eq!(recorder.state(), RecorderState::Active);

    std::thread::scope(|s| {
        for t in 0..4usize {
            let recorder = &recorder;
            s.spawn(move || {
                let mut events = EventRecorder::new(recorder.worker(t));
                for event_id in (t..1000).step_by(4) {
                    // Events 0, 1 and 2 have no primary vertex
                    let vertex = (event_id >= 3).then_some([0.0, 0.0, 0.0]);
                    events.begin_event(event_id as i64, vertex);
                    for track in 0..50 {
                        events.record_photon_creation(track, [0.0; 3], [0.0, 0.0, 1.0]);
                        if track % 2 == 0 {
                            events.record_photon_exit(track, [0.0, 0.0, 100.0], [0.0, 0.0, 1.0], 3.0e-6);
                        }
                    }
                    events.record_deposit([5.0, 5.0, 5.0], 1.0, 11);
                    events.end_event();
                }
                events.finish();
            });
        }
    });

    let paths = recorder.paths().clone();
    let summary = recorder.end_run(1000);
    assert_eq!(summary.total_photons, 50_000);
    assert_eq!(summary.photon_records, 25_000);
    assert_eq!(summary.deposits_without_primary, 3);
    assert_eq!(ctx.snapshot().photons_created, 50_000);

    let json = std::fs::read_to_string(&paths.manifest).unwrap();
    assert!(json.contains("\"dose_deposits_without_primary\": 3"));
    assert!(json.contains("\"total_photons\": 50000"));
    assert!(json.contains("\"events\": 1000"));
    assert!(json.contains("\"num_threads_effective\": 4"));

    let manifest = RunManifest::read(&paths.manifest).unwrap();
    assert_eq!(manifest.total_deposits, Some(1000));
    assert_eq!(manifest.output_format, "binary");

    let header = std::fs::read_to_string(&paths.photon_header).unwrap();
    assert!(header.contains("format_version: 2"));
    assert!(header.contains("bytes_per_photon: 60"));
    let dose_header = std::fs::read_to_string(&paths.deposit_header).unwrap();
    assert!(dose_header.contains("bytes_per_record: 36"));

    let deposits = read_records::<DepositRecord>(&paths.deposits).unwrap();
    let zero_relative = deposits.iter().filter(|d| d.event_id < 3).count();
    assert_eq!(zero_relative, 3);
    assert!(deposits
        .iter()
        .filter(|d| d.event_id < 3)
        .all(|d| d.relative == [0.0; 3]));
}

#[test]
fn test_counters_reset_at_run_begin() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 16, 1, false);
    let ctx = RunContext::new();

    for _ in 0..2 {
        let recorder = Recorder::begin_run(&config.simulation, ctx.clone(), 1);
        let mut events = EventRecorder::new(recorder.worker(0));
        events.begin_event(0, None);
        for track in 0..5 {
            events.record_photon_creation(track, [0.0; 3], [0.0, 0.0, 1.0]);
        }
        events.end_event();
        events.finish();
        let summary = recorder.end_run(1);
        assert_eq!(summary.total_photons, 5);
    }
}

#[test]
fn test_begin_run_truncates_previous_output() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 16, 1, false);
    let paths = config.output_paths();
    std::fs::write(&paths.photons, vec![0u8; 600]).unwrap();

    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 1);
    assert_eq!(file_len(&paths.photons), 0);
    let mut worker = recorder.worker(0);
    worker.record_photon(photon(1, 1));
    worker.finish();
    recorder.end_run(1);
    assert_eq!(file_len(&paths.photons), 60);
}

#[test]
fn test_disabled_kinds_are_noops() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), 16, 2, false);
    config.simulation.enable_cherenkov_output = false;
    let paths = config.output_paths();

    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 2);
    let mut worker = recorder.worker(0);
    assert!(!worker.photons_enabled());
    assert!(!worker.deposits_enabled());
    worker.record_photon(photon(0, 1));
    worker.record_deposit(deposit(0));
    let report = worker.finish();
    assert_eq!((report.photons, report.deposits), (0, 0));

    let summary = recorder.end_run(1);
    assert_eq!(summary.photon_records, 0);
    assert_eq!(summary.total_deposits, None);
    assert!(!paths.photons.exists());
    assert!(!paths.deposits.exists());
    assert!(paths.manifest.exists());
}

#[test]
fn test_dropped_worker_still_absorbs() {
    let dir = tempfile::tempdir().unwrap();
    let config = config_in(dir.path(), 100, 2, false);
    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 2);
    let paths = recorder.paths().clone();

    // Staged records (worker capacity 50) are absorbed on drop, which the
    // borrow on `recorder` forces to happen before `end_run`
    let mut worker = recorder.worker(1);
    for i in 0..10 {
        worker.record_photon(photon(0, i));
    }
    assert_eq!(worker.staged(), (10, 0));
    drop(worker);

    let summary = recorder.end_run(1);
    assert_eq!(file_len(&paths.photons), 10 * 60);
    assert_eq!(summary.photon_records, 10);
    assert_eq!(summary.records_lost, 0);
}

#[test]
fn test_unwritable_output_does_not_abort_run() {
    let config = Config::with_output("/nonexistent-dir/run");
    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 1);
    let mut worker = recorder.worker(0);
    worker.record_photon(photon(0, 1));
    worker.finish();
    let summary = recorder.end_run(1);
    assert_eq!(summary.records_lost, 1);
}

#[test]
fn test_csv_mode_merges_thread_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), 16, 3, false);
    config.simulation.output_format = OutputFormat::Csv;
    let paths = config.output_paths();

    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 3);
    std::thread::scope(|s| {
        for t in 0..3usize {
            let recorder = &recorder;
            s.spawn(move || {
                let mut worker = recorder.worker(t);
                for i in 0..(t as i32 + 2) {
                    worker.record_photon(photon(t as i64, i));
                }
                worker.finish();
            });
        }
    });
    let summary = recorder.end_run(3);
    assert_eq!(summary.photon_records, 2 + 3 + 4);

    let merged = std::fs::read_to_string(&paths.base).unwrap();
    let lines: Vec<&str> = merged.lines().collect();
    assert_eq!(lines[0], CSV_HEADER);
    assert_eq!(lines.len(), 1 + 9);
    assert!(!paths.photons.exists());
    for t in 0..3 {
        assert!(!paths.csv_thread_file(t).exists());
    }

    let manifest = RunManifest::read(&paths.manifest).unwrap();
    assert_eq!(manifest.output_format, "csv");
}

#[test]
fn test_csv_mode_disables_deposit_output() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path(), 16, 1, true);
    config.simulation.output_format = OutputFormat::Csv;
    let paths = config.output_paths();

    let recorder = Recorder::begin_run(&config.simulation, RunContext::new(), 1);
    assert!(recorder.deposit_stats().is_none());

    let mut worker = recorder.worker(0);
    assert!(worker.photons_enabled());
    assert!(!worker.deposits_enabled());
    worker.record_photon(photon(0, 1));
    worker.record_deposit(deposit(0));
    let report = worker.finish();
    assert_eq!((report.photons, report.deposits), (1, 0));

    let summary = recorder.end_run(1);
    assert_eq!(summary.photon_records, 1);
    assert_eq!(summary.total_deposits, None);
    assert!(!paths.deposits.exists());
    assert!(!paths.deposit_header.exists());

    let manifest = RunManifest::read(&paths.manifest).unwrap();
    assert_eq!(manifest.output_format, "csv");
    assert_eq!(manifest.total_deposits, None);
    assert_eq!(manifest.dose_output_path, None);
}
