use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use super::channel::TileChannel;
use super::dirty_map::DirtyBinMap;
use super::error::{StoreError, WriterError};
use super::grid::GridHeader;
use super::partition::SpatialTile;
use super::sounding::{StoredSounding, TransferRecord};
use super::store::PfmStore;

/// What a writer hands back to the orchestrator when its channel closes
#[derive(Debug, Clone)]
pub struct TileReport {
    pub tile: usize,
    pub out_count: u64,
    pub out_of_range_count: u64,
    pub data_read_errors: u64,
    pub dirty: DirtyBinMap,
    pub partial_path: PathBuf,
}

/// A consumer: owns one tile, drains its channel, and fills the tile's partial store.
///
/// Nothing else touches the partial store, so it needs no locking.
#[derive(Debug)]
pub struct WriterWorker<'a> {
    tile: &'a SpatialTile,
    channel: &'a TileChannel,
    abort: &'a AtomicBool,
    store: PfmStore,
    min_depth: f64,
    max_depth: f64,
    dirty: DirtyBinMap,
    out_count: u64,
    out_of_range_count: u64,
    data_read_errors: u64,
}

impl<'a> WriterWorker<'a> {
    /// Create a writer along with a fresh partial store at `partial_path`, which holds at
    /// most `cache_size` soundings in memory
    pub fn new(
        tile: &'a SpatialTile,
        channel: &'a TileChannel,
        grid: &GridHeader,
        partial_path: &Path,
        cache_size: usize,
        abort: &'a AtomicBool,
    ) -> Result<Self, WriterError> {
        PfmStore::remove(partial_path).map_err(|e| WriterError::StoreError(tile.index, e))?;
        let store = PfmStore::create(partial_path, grid)
            .map_err(|e| WriterError::StoreError(tile.index, e))?
            .with_cache_limit(cache_size);
        Ok(Self {
            tile,
            channel,
            abort,
            store,
            min_depth: grid.min_depth,
            max_depth: grid.max_depth,
            dirty: DirtyBinMap::new(grid),
            out_count: 0,
            out_of_range_count: 0,
            data_read_errors: 0,
        })
    }

    /// Drain the channel until it is closed and empty.
    ///
    /// A fatal store error raises the abort flag, but the writer keeps draining (and
    /// discarding) so no reader is left blocked on a full channel.
    pub fn run(mut self) -> Result<TileReport, WriterError> {
        let index = self.tile.index;
        let mut failure: Option<StoreError> = None;
        let mut discarded: u64 = 0;

        while let Some(record) = self.channel.recv() {
            if failure.is_some() || self.abort.load(Ordering::Acquire) {
                discarded += 1;
                continue;
            }
            if let Err(e) = self.write_record(record) {
                spdlog::error!("Writer for tile {index} hit a fatal store error: {e}");
                self.abort.store(true, Ordering::Release);
                failure = Some(e);
            }
        }

        if let Some(e) = failure {
            return Err(WriterError::StoreError(index, e));
        }
        if discarded > 0 {
            spdlog::warn!("Writer for tile {index} discarded {discarded} records after an abort");
        }

        spdlog::info!(
            "Writer for tile {index} done: {} soundings, {} out of range, {} dirty bins",
            self.out_count,
            self.out_of_range_count,
            self.dirty.count()
        );
        let partial_path = self.store.path().to_path_buf();
        self.store
            .close()
            .map_err(|e| WriterError::StoreError(index, e))?;

        Ok(TileReport {
            tile: index,
            out_count: self.out_count,
            out_of_range_count: self.out_of_range_count,
            data_read_errors: self.data_read_errors,
            dirty: self.dirty,
            partial_path,
        })
    }

    /// Clamp, clean, and store one record.
    ///
    /// Only a non-recoverable store error is returned; data read errors are logged and
    /// counted.
    pub fn write_record(&mut self, mut record: TransferRecord) -> Result<(), StoreError> {
        let clamped = record.clamp_depth(self.min_depth, self.max_depth);
        record.clear_selection();

        let coord = record.coord;
        match self.store.cached_write(StoredSounding::from(&record)) {
            Ok(()) => (),
            Err(e) if e.is_recoverable() => {
                let bounds = self.store.header().bounds;
                spdlog::warn!(
                    "Tile {} {e}; grid bounds lat {} to {}, lon {} to {}. Skipping sounding.",
                    self.tile.index,
                    bounds.min_lat,
                    bounds.max_lat,
                    bounds.min_lon,
                    bounds.max_lon
                );
                self.data_read_errors += 1;
                return Ok(());
            }
            Err(e) => return Err(e),
        }

        self.dirty.mark(&coord);
        self.out_count += 1;
        if clamped {
            self.out_of_range_count += 1;
        }
        Ok(())
    }
}
