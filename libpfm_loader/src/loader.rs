use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;

use super::channel::TileChannel;
use super::config::Config;
use super::constants::POLL_INTERVAL_MS;
use super::dirty_map::DirtyBinMap;
use super::error::{ConfigError, LoadError};
use super::filter::AreaFilter;
use super::grid::GridHeader;
use super::input::{precheck, split_shares, FileDescriptor};
use super::merge::merge_and_recompute;
use super::partition::{partition, SpatialTile};
use super::reader::{ReaderReport, ReaderShared, ReaderWorker};
use super::store::PfmStore;
use super::summary::LoadSummary;
use super::worker_status::{LoadPhase, WorkerStatus};
use super::writer::{TileReport, WriterWorker};

/// Drives one parallel load: readers, tile writers, then the merge.
///
/// The loader can be cancelled from another thread through [`ParallelLoader::cancel_handle`].
/// Cancellation is cooperative; readers notice it at the next file or record, writers
/// drain what is already queued, and the destination is left as it was on disk.
#[derive(Debug)]
pub struct ParallelLoader {
    config: Config,
    cancel: Arc<AtomicBool>,
}

impl ParallelLoader {
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            cancel: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Set the returned flag to true to cancel a running load
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        self.cancel.clone()
    }

    /// Load `inputs` into the configured destination store
    pub fn run(
        &self,
        inputs: &[PathBuf],
        tx: &Sender<WorkerStatus>,
    ) -> Result<LoadSummary, LoadError> {
        let started = OffsetDateTime::now_utc();
        let config = &self.config;
        let grid = GridHeader::from_config(config)?;
        spdlog::info!(
            "Destination grid is {} rows x {} columns of {} m bins",
            grid.rows,
            grid.cols,
            grid.bin_size_meters
        );

        let mut destination = PfmStore::open_or_create(&config.destination, &grid)?;
        let files = precheck(inputs, &destination)?;
        let shares = split_shares(&files, config.reader_threads);
        let tiles = partition(&grid, config.tile_count).map_err(ConfigError::from)?;

        let mut summary = LoadSummary::new(config.destination.clone(), started);
        summary.add_precheck(&files);

        let (reader_reports, tile_reports) =
            match self.run_workers(&grid, &tiles, &destination, &shares, tx) {
                Ok(reports) => reports,
                Err(e) => {
                    remove_partials(config, &tiles);
                    return Err(e);
                }
            };

        let mut dirty = DirtyBinMap::new(&grid);
        for report in reader_reports.iter() {
            summary.add_reader(report);
        }
        for report in tile_reports.iter() {
            dirty.union(&report.dirty);
            summary.add_tile(report);
        }

        spdlog::info!("Merging {} partial stores...", tile_reports.len());
        let filter = config.area_filter.as_ref().map(AreaFilter::new);
        let merge_report =
            match merge_and_recompute(&mut destination, &tile_reports, &dirty, filter.as_ref(), tx) {
                Ok(report) => report,
                Err(e) => {
                    remove_partials(config, &tiles);
                    return Err(e.into());
                }
            };
        summary.add_merge(&merge_report);
        destination.close()?;

        summary.finish();
        spdlog::info!(
            "Loaded {} soundings into {} in {}",
            summary.total_loaded(),
            config.destination.to_string_lossy(),
            summary.elapsed
        );
        Ok(summary)
    }

    /// Run every reader and writer to completion.
    ///
    /// Channels are closed only after all readers have finished, so no record can be
    /// enqueued after its writer saw the end of the stream.
    fn run_workers(
        &self,
        grid: &GridHeader,
        tiles: &[SpatialTile],
        destination: &PfmStore,
        shares: &[Vec<FileDescriptor>],
        tx: &Sender<WorkerStatus>,
    ) -> Result<(Vec<ReaderReport>, Vec<TileReport>), LoadError> {
        let config = &self.config;
        let abort = AtomicBool::new(self.cancel.load(Ordering::Acquire));
        let channels: Vec<TileChannel> = tiles
            .iter()
            .map(|tile| TileChannel::new(tile.index, config.buffer_size))
            .collect();
        let done_flags: Vec<AtomicBool> = shares.iter().map(|_| AtomicBool::new(false)).collect();

        let mut writers = Vec::with_capacity(tiles.len());
        for (tile, channel) in tiles.iter().zip(channels.iter()) {
            writers.push(WriterWorker::new(
                tile,
                channel,
                grid,
                &config.get_partial_store_path(tile.index),
                config.cache_size,
                &abort,
            )?);
        }

        let shared = ReaderShared {
            grid,
            tiles,
            store: destination,
            abort: &abort,
            reference: config.reference,
        };
        spdlog::info!(
            "Starting {} readers and {} writers",
            shares.len(),
            writers.len()
        );

        let (reader_results, writer_results) = std::thread::scope(|s| {
            let writer_handles: Vec<_> = writers
                .into_iter()
                .map(|writer| s.spawn(move || writer.run()))
                .collect();
            let reader_handles: Vec<_> = shares
                .iter()
                .zip(done_flags.iter())
                .enumerate()
                .map(|(worker_id, (share, done))| {
                    let senders = channels.iter().filter_map(TileChannel::sender).collect();
                    let worker = ReaderWorker::new(worker_id, shared, senders, tx.clone());
                    s.spawn(move || worker.run(share, done))
                })
                .collect();

            loop {
                std::thread::sleep(Duration::from_millis(POLL_INTERVAL_MS));
                if self.cancel.load(Ordering::Acquire) && !abort.swap(true, Ordering::AcqRel) {
                    spdlog::warn!("Load cancelled; stopping the readers");
                }
                for (channel, handle) in channels.iter().zip(writer_handles.iter()) {
                    if handle.is_finished() {
                        // A writer only ends early by panicking
                        abort.store(true, Ordering::Release);
                        channel.discard_pending();
                    } else {
                        // Progress is best effort here; a gone receiver also stops the readers
                        let _ = tx.send(WorkerStatus::new(
                            channel.len() as f32 / channel.capacity() as f32,
                            channel.tile(),
                            channel.tile(),
                            LoadPhase::Writing,
                        ));
                    }
                }
                let readers_done = done_flags
                    .iter()
                    .zip(reader_handles.iter())
                    .all(|(done, handle)| done.load(Ordering::Acquire) || handle.is_finished());
                if readers_done {
                    break;
                }
            }

            for channel in channels.iter() {
                channel.close();
            }
            let readers: Vec<_> = reader_handles.into_iter().map(|h| h.join()).collect();
            let writers: Vec<_> = writer_handles.into_iter().map(|h| h.join()).collect();
            (readers, writers)
        });

        let mut first_error: Option<LoadError> = None;
        let mut reader_reports = Vec::with_capacity(reader_results.len());
        for (worker_id, result) in reader_results.into_iter().enumerate() {
            match result {
                Ok(Ok(report)) => reader_reports.push(report),
                Ok(Err(e)) => {
                    spdlog::error!("{e}");
                    first_error.get_or_insert(e.into());
                }
                Err(_) => {
                    first_error.get_or_insert(LoadError::WorkerPanic(format!("reader {worker_id}")));
                }
            }
        }
        let mut tile_reports = Vec::with_capacity(writer_results.len());
        for (tile, result) in writer_results.into_iter().enumerate() {
            match result {
                Ok(Ok(report)) => tile_reports.push(report),
                Ok(Err(e)) => {
                    spdlog::error!("{e}");
                    first_error.get_or_insert(e.into());
                }
                Err(_) => {
                    first_error.get_or_insert(LoadError::WorkerPanic(format!("writer {tile}")));
                }
            }
        }

        if let Some(e) = first_error {
            return Err(e);
        }
        if self.cancel.load(Ordering::Acquire) {
            return Err(LoadError::Cancelled);
        }
        Ok((reader_reports, tile_reports))
    }
}

/// Load `inputs` as described by `config`, reporting progress over `tx`
pub fn run_parallel_load(
    config: &Config,
    inputs: &[PathBuf],
    tx: &Sender<WorkerStatus>,
) -> Result<LoadSummary, LoadError> {
    ParallelLoader::new(config.clone())?.run(inputs, tx)
}

/// Remove any partial store left behind by a failed load
fn remove_partials(config: &Config, tiles: &[SpatialTile]) {
    for tile in tiles.iter() {
        let path = config.get_partial_store_path(tile.index);
        if let Err(e) = PfmStore::remove(&path) {
            spdlog::warn!(
                "Could not remove partial store {}: {e}",
                path.to_string_lossy()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn config(dir: &std::path::Path) -> Config {
        Config {
            destination: dir.join("survey.pfm"),
            min_latitude: 0.0,
            max_latitude: 0.01,
            min_longitude: 0.0,
            max_longitude: 0.01,
            bin_size_meters: 111.12,
            reader_threads: 2,
            tile_count: 4,
            buffer_size: 8,
            ..Default::default()
        }
    }

    fn write_xyz(path: &std::path::Path, lines: &[&str]) {
        let mut file = std::fs::File::create(path).unwrap();
        for line in lines {
            writeln!(file, "{line}").unwrap();
        }
    }

    #[test]
    fn test_rejects_bad_config() {
        let dir = tempfile::tempdir().unwrap();
        let mut bad = config(dir.path());
        bad.tile_count = 3;
        assert!(matches!(
            ParallelLoader::new(bad),
            Err(ConfigError::PartitionError(_))
        ));
    }

    #[test]
    fn test_small_load() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let a = dir.path().join("a.xyz");
        let b = dir.path().join("b.xyz");
        write_xyz(&a, &["0.001 0.001 5.0", "0.009 0.009 6.0", "1.0 1.0 3.0"]);
        write_xyz(&b, &["0.001 0.009 2000.0", "0.009 0.001 7.0"]);

        let (tx, rx) = std::sync::mpsc::channel();
        let summary = run_parallel_load(&config, &[a, b], &tx).unwrap();
        assert!(rx.try_iter().any(|s| s.phase == LoadPhase::Merging));
        assert_eq!(summary.files_loaded, 2);
        assert_eq!(summary.total_loaded(), 4);
        assert_eq!(summary.total_out_of_range(), 1);
        assert_eq!(summary.records_dropped, 1);
        assert_eq!(summary.recomputed_bins, 4);
        assert_eq!(summary.min_depth, Some(5.0));
        assert_eq!(summary.max_depth, Some(7.0));

        for tile in 0..4 {
            assert!(!config.get_partial_store_path(tile).exists());
        }
        let store = PfmStore::open_read(&config.destination).unwrap();
        assert_eq!(store.sounding_count(), 4);
        assert_eq!(store.files().unwrap().len(), 2);
    }

    #[test]
    fn test_cancel_leaves_destination_alone() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let a = dir.path().join("a.xyz");
        write_xyz(&a, &["0.001 0.001 5.0"]);

        let loader = ParallelLoader::new(config.clone()).unwrap();
        loader.cancel_handle().store(true, Ordering::Release);
        let (tx, _rx) = std::sync::mpsc::channel();
        assert!(matches!(loader.run(&[a], &tx), Err(LoadError::Cancelled)));
        assert!(!config.destination.exists());
        for tile in 0..4 {
            assert!(!config.get_partial_store_path(tile).exists());
        }
    }
}
