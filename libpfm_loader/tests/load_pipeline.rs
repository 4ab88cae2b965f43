use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};

use libpfm_loader::config::{AreaFilterConfig, Config};
use libpfm_loader::constants::{FILTER_INVALID, REFERENCE};
use libpfm_loader::error::{LoadError, StoreError, WriterError};
use libpfm_loader::grid::GridHeader;
use libpfm_loader::llz_file::{write_llz_file, LlzRecord};
use libpfm_loader::loader::run_parallel_load;
use libpfm_loader::partition::{locate_tile, partition};
use libpfm_loader::store::PfmStore;
use libpfm_loader::summary::LoadSummary;
use libpfm_loader::worker_status::{LoadPhase, WorkerStatus};

/// 0.01 degrees square with 100 x 100 bins
fn config(dir: &Path) -> Config {
    Config {
        destination: dir.join("survey.pfm"),
        min_latitude: 0.0,
        max_latitude: 0.01,
        min_longitude: 0.0,
        max_longitude: 0.01,
        bin_size_meters: 11.112,
        min_depth: 0.0,
        max_depth: 500.0,
        reader_threads: 2,
        tile_count: 4,
        buffer_size: 16,
        ..Default::default()
    }
}

fn write_xyz(path: &Path, soundings: &[(f64, f64, f64)]) {
    let mut file = std::fs::File::create(path).unwrap();
    writeln!(file, "# lat lon depth").unwrap();
    for (lat, lon, depth) in soundings {
        writeln!(file, "{lat:.7} {lon:.7} {depth:.3}").unwrap();
    }
}

fn run(config: &Config, inputs: &[PathBuf]) -> Result<LoadSummary, LoadError> {
    let (tx, _rx) = std::sync::mpsc::channel::<WorkerStatus>();
    run_parallel_load(config, inputs, &tx)
}

/// Every sounding of the store keyed so two loads can be compared as sets
fn stored_keys(store: &PfmStore) -> BTreeSet<(u32, u32, i64, i64, i64)> {
    store
        .bins()
        .flat_map(|(_, soundings)| soundings.iter())
        .map(|s| {
            (
                s.coord.row,
                s.coord.col,
                (s.latitude * 1e7).round() as i64,
                (s.longitude * 1e7).round() as i64,
                (s.depth as f64 * 1e3).round() as i64,
            )
        })
        .collect()
}

#[test]
fn test_hot_tile_loses_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let inputs: Vec<PathBuf> = (0..10)
        .map(|i| {
            let path = dir.path().join(format!("line_{i:03}.xyz"));
            let soundings: Vec<(f64, f64, f64)> =
                (0..100).map(|p| (0.00105, 0.00105, 10.0 + p as f64 * 0.01)).collect();
            write_xyz(&path, &soundings);
            path
        })
        .collect();

    let (tx, rx) = std::sync::mpsc::channel::<WorkerStatus>();
    let summary = run_parallel_load(&config, &inputs, &tx).unwrap();
    let statuses: Vec<WorkerStatus> = rx.try_iter().collect();

    assert_eq!(summary.files_loaded, 10);
    assert_eq!(summary.total_loaded(), 1000);
    assert_eq!(summary.destinations[0].loaded, 1000);
    assert_eq!(summary.recomputed_bins, 1);
    let per_tile: Vec<(usize, u64)> = summary.tiles.iter().map(|t| (t.tile, t.loaded)).collect();
    assert_eq!(per_tile, vec![(0, 1000), (1, 0), (2, 0), (3, 0)]);
    assert!(statuses
        .iter()
        .any(|s| s.phase == LoadPhase::Reading && s.worker_id == 1));
    assert!(statuses
        .iter()
        .any(|s| s.phase == LoadPhase::Merging && s.progress == 1.0));

    let store = PfmStore::open_read(&config.destination).unwrap();
    assert_eq!(store.sounding_count(), 1000);
    let grid = store.header().clone();
    let coord = grid.bin_coord(0.00105, 0.00105).unwrap();
    let tiles = partition(&grid, 4).unwrap();
    assert_eq!(locate_tile(&coord, &tiles), Some(0));
    assert_eq!(store.bin(&coord).len(), 1000);
    assert_eq!(store.bin_stats(&coord).unwrap().count, 1000);

    let mut numbers: Vec<i16> = store.files().unwrap().iter().map(|f| f.number).collect();
    numbers.sort();
    assert_eq!(numbers, (0..10).collect::<Vec<i16>>());
}

#[test]
fn test_parallel_load_matches_single_worker_load() {
    let dir = tempfile::tempdir().unwrap();
    let inputs: Vec<PathBuf> = (0..6)
        .map(|i| {
            let path = dir.path().join(format!("swath_{i}.xyz"));
            let soundings: Vec<(f64, f64, f64)> = (0..250)
                .map(|p| {
                    let t = (i * 250 + p) as f64;
                    (
                        (t * 0.0000377) % 0.0099,
                        (t * 0.0000613) % 0.0099,
                        20.0 + (t % 17.0),
                    )
                })
                .collect();
            write_xyz(&path, &soundings);
            path
        })
        .collect();

    let parallel_dir = dir.path().join("parallel");
    let serial_dir = dir.path().join("serial");
    std::fs::create_dir_all(&parallel_dir).unwrap();
    std::fs::create_dir_all(&serial_dir).unwrap();

    let mut parallel = config(&parallel_dir);
    parallel.reader_threads = 3;
    parallel.tile_count = 8;
    parallel.buffer_size = 4;
    let mut serial = config(&serial_dir);
    serial.reader_threads = 1;
    serial.tile_count = 1;

    let parallel_summary = run(&parallel, &inputs).unwrap();
    let serial_summary = run(&serial, &inputs).unwrap();
    assert_eq!(parallel_summary.total_loaded(), 1500);
    assert_eq!(serial_summary.total_loaded(), 1500);
    assert_eq!(parallel_summary.recomputed_bins, serial_summary.recomputed_bins);

    let parallel_store = PfmStore::open_read(&parallel.destination).unwrap();
    let serial_store = PfmStore::open_read(&serial.destination).unwrap();
    assert_eq!(stored_keys(&parallel_store), stored_keys(&serial_store));

    // Every bin with a sounding was recomputed, and no other
    let occupied: BTreeSet<_> = parallel_store.bins().map(|(coord, _)| *coord).collect();
    assert_eq!(occupied.len() as u64, parallel_summary.recomputed_bins);
    for coord in occupied.iter() {
        let stats = parallel_store.bin_stats(coord).unwrap();
        assert_eq!(stats.total as usize, parallel_store.bin(coord).len());
    }
}

#[test]
fn test_out_of_range_and_dropped_totals() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path());
    let xyz = dir.path().join("mixed.xyz");
    write_xyz(
        &xyz,
        &[
            (0.002, 0.002, 50.0),
            (0.002, 0.002, 900.0),
            (0.008, 0.008, -5.0),
            (0.5, 0.5, 50.0),
        ],
    );
    let llz = dir.path().join("nav.llz");
    write_llz_file(
        &llz,
        &[
            LlzRecord {
                latitude: 0.007,
                longitude: 0.003,
                depth: 42.0,
                ..Default::default()
            },
            LlzRecord {
                latitude: 0.007,
                longitude: 0.003,
                depth: 4000.0,
                ..Default::default()
            },
        ],
    )
    .unwrap();

    let summary = run(&config, &[xyz, llz]).unwrap();
    assert_eq!(summary.files_loaded, 2);
    assert_eq!(summary.records_read, 6);
    assert_eq!(summary.records_dropped, 1);
    assert_eq!(summary.total_loaded(), 5);
    assert_eq!(summary.total_out_of_range(), 3);
    assert_eq!(summary.min_depth, Some(42.0));
    assert_eq!(summary.max_depth, Some(50.0));

    let store = PfmStore::open_read(&config.destination).unwrap();
    let flagged = store
        .bins()
        .flat_map(|(_, s)| s.iter())
        .filter(|s| s.flags & FILTER_INVALID != 0)
        .count();
    assert_eq!(flagged, 3);
}

#[test]
fn test_second_run_appends_and_skips_loaded_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let first = dir.path().join("first.xyz");
    let second = dir.path().join("second.xyz");
    write_xyz(&first, &[(0.001, 0.001, 10.0), (0.009, 0.009, 30.0)]);
    write_xyz(&second, &[(0.001, 0.001, 12.0)]);

    run(&config, &[first.clone()]).unwrap();

    config.reference = true;
    let summary = run(&config, &[first.clone(), second.clone(), second.clone()]).unwrap();
    assert_eq!(summary.files_attempted, 3);
    assert_eq!(summary.files_loaded, 1);
    assert_eq!(summary.skipped.len(), 2);
    assert!(summary
        .skipped
        .iter()
        .any(|s| s.path == first && s.reason.contains("already loaded")));
    assert_eq!(summary.total_loaded(), 1);
    assert_eq!(summary.recomputed_bins, 1);

    let store = PfmStore::open_read(&config.destination).unwrap();
    assert_eq!(store.sounding_count(), 3);
    assert_eq!(store.files().unwrap().len(), 2);
    let grid = store.header().clone();
    let coord = grid.bin_coord(0.001, 0.001).unwrap();
    let soundings = store.bin(&coord);
    assert_eq!(soundings.len(), 2);
    assert_eq!(
        soundings.iter().filter(|s| s.flags & REFERENCE != 0).count(),
        1
    );
    // Reference data does not count towards the statistics
    let stats = store.bin_stats(&coord).unwrap();
    assert_eq!(stats.count, 1);
    assert_eq!(stats.max_depth, 10.0);
}

#[test]
fn test_append_with_other_grid_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let line = dir.path().join("line.xyz");
    write_xyz(&line, &[(0.001, 0.001, 10.0)]);
    run(&config, &[line.clone()]).unwrap();

    config.bin_size_meters = 5.0;
    assert!(matches!(
        run(&config, &[line]),
        Err(LoadError::StoreError(StoreError::GridMismatch))
    ));
}

#[test]
fn test_area_filter_on_recomputed_bins() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    let grid = GridHeader::from_config(&config).unwrap();
    let noisy = grid.bin_coord(0.0021, 0.0021).unwrap();
    let (lat, lon) = grid.bin_center(&noisy);
    let mut soundings: Vec<(f64, f64, f64)> = (0..19)
        .map(|i| (lat, lon, 30.0 + (i % 3) as f64 * 0.1))
        .collect();
    soundings.push((lat, lon, 90.0));
    let line = dir.path().join("noisy.xyz");
    write_xyz(&line, &soundings);

    config.area_filter = Some(AreaFilterConfig {
        std_dev_multiplier: 2.4,
        feature_radius_meters: 5.0,
        features: vec![[0.009, 0.009]],
    });
    let summary = run(&config, &[line]).unwrap();
    let filter = summary.filter.unwrap();
    assert_eq!(filter.bad, 1);
    assert_eq!(filter.good, 19);
    assert_eq!(filter.protected_bins, 0);
    assert!((filter.bad_percent() - 5.0).abs() < 1e-9);

    let store = PfmStore::open_read(&config.destination).unwrap();
    let stats = store.bin_stats(&noisy).unwrap();
    assert_eq!(stats.count, 19);
    assert!(stats.max_depth < 31.0);
}

#[test]
fn test_writer_store_failure_stops_the_load() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config(dir.path());
    // Partial stores under a plain file cannot spill, so every writer fails on its first write
    let blocker = dir.path().join("scratch");
    std::fs::write(&blocker, b"not a directory").unwrap();
    config.scratch_path = Some(blocker.clone());
    config.cache_size = 1;
    config.buffer_size = 2;
    config.reader_threads = 3;

    let inputs: Vec<PathBuf> = (0..6)
        .map(|i| {
            let path = dir.path().join(format!("busy_{i}.xyz"));
            let soundings: Vec<(f64, f64, f64)> = (0..400)
                .map(|p| {
                    let t = (i * 400 + p) as f64;
                    ((t * 0.0000377) % 0.0099, (t * 0.0000613) % 0.0099, 15.0)
                })
                .collect();
            write_xyz(&path, &soundings);
            path
        })
        .collect();

    let result = run(&config, &inputs);
    assert!(matches!(
        result,
        Err(LoadError::WriterError(WriterError::StoreError(
            _,
            StoreError::IOError(_)
        )))
    ));
    assert!(!config.destination.exists());
    for tile in 0..4 {
        assert!(!config.get_partial_store_path(tile).exists());
    }
    let leftovers = std::fs::read_dir(dir.path())
        .unwrap()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().contains("_tile"))
        .count();
    assert_eq!(leftovers, 0);
}
