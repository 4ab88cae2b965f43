use std::sync::mpsc::Sender;

use super::constants::{CHECKED, VERIFIED};
use super::dirty_map::DirtyBinMap;
use super::error::MergeError;
use super::filter::{AreaFilter, FilterStats};
use super::store::{PfmStore, SoundingStream};
use super::worker_status::{LoadPhase, WorkerStatus};
use super::writer::TileReport;

/// Results of folding the partial stores into the destination and recomputing bins
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MergeReport {
    pub merged: u64,
    pub data_read_errors: u64,
    pub recomputed_bins: u64,
    /// Valid soundings over the recomputed bins
    pub valid_count: u64,
    pub min_depth: Option<f64>,
    pub max_depth: Option<f64>,
    pub filter: Option<FilterStats>,
}

impl MergeReport {
    fn fold_depths(&mut self, min_depth: f64, max_depth: f64) {
        self.min_depth = Some(self.min_depth.map_or(min_depth, |m| m.min(min_depth)));
        self.max_depth = Some(self.max_depth.map_or(max_depth, |m| m.max(max_depth)));
    }
}

/// Stream every sounding of one tile's partial store into the destination, then delete
/// the partial store.
///
/// Failing to reopen or read the partial store is fatal: its soundings would be silently
/// lost.
pub fn merge_tile(
    destination: &mut PfmStore,
    tile: &TileReport,
    report: &mut MergeReport,
) -> Result<(), MergeError> {
    let partial = SoundingStream::open(&tile.partial_path)
        .map_err(|e| MergeError::PartialStore(tile.tile, e))?;

    let mut streamed: u64 = 0;
    for sounding in partial {
        let sounding = sounding.map_err(|e| MergeError::PartialStore(tile.tile, e))?;
        streamed += 1;
        match destination.cached_write(sounding) {
            Ok(()) => report.merged += 1,
            Err(e) if e.is_recoverable() => {
                spdlog::warn!("Merging tile {}: {e}. Skipping sounding.", tile.tile);
                report.data_read_errors += 1;
            }
            Err(e) => return Err(MergeError::StoreError(e)),
        }
    }
    spdlog::info!("Merged {streamed} soundings from tile {}", tile.tile);
    PfmStore::remove(&tile.partial_path)?;
    Ok(())
}

/// Recompute exactly the bins marked dirty.
///
/// With an area filter, each bin is filtered first unless a feature lies within the
/// exclusion radius of its centre. Transient checked/verified bits are cleared on every
/// recomputed bin.
pub fn recompute_dirty_bins(
    destination: &mut PfmStore,
    dirty: &DirtyBinMap,
    filter: Option<&AreaFilter>,
    report: &mut MergeReport,
) {
    let grid = destination.header().clone();
    let mut filter_stats = filter.map(|_| FilterStats::default());

    for coord in dirty.iter_dirty() {
        if let (Some(filter), Some(totals)) = (filter, filter_stats.as_mut()) {
            if filter.is_near_feature(&grid, &coord) {
                totals.protected_bins += 1;
            } else if let Some(soundings) = destination.bin_mut(&coord) {
                totals.add(&filter.apply(soundings));
            }
        }

        let stats = destination.recompute_bin(&coord);
        destination.clear_bin_validity(&coord, CHECKED | VERIFIED);
        report.recomputed_bins += 1;
        if stats.count > 0 {
            report.valid_count += stats.count as u64;
            report.fold_depths(stats.min_depth, stats.max_depth);
        }
    }
    report.filter = filter_stats;
}

/// The merge and recompute step run after every reader and writer has finished
pub fn merge_and_recompute(
    destination: &mut PfmStore,
    tiles: &[TileReport],
    dirty: &DirtyBinMap,
    filter: Option<&AreaFilter>,
    tx: &Sender<WorkerStatus>,
) -> Result<MergeReport, MergeError> {
    let mut report = MergeReport::default();
    let n_steps = tiles.len() as f32 + 1.0;
    for (step, tile) in tiles.iter().enumerate() {
        tx.send(WorkerStatus::new(
            step as f32 / n_steps,
            tile.tile,
            0,
            LoadPhase::Merging,
        ))?;
        merge_tile(destination, tile, &mut report)?;
    }

    spdlog::info!("Recomputing {} dirty bins...", dirty.count());
    tx.send(WorkerStatus::new(
        tiles.len() as f32 / n_steps,
        tiles.len(),
        0,
        LoadPhase::Merging,
    ))?;
    recompute_dirty_bins(destination, dirty, filter, &mut report);
    tx.send(WorkerStatus::new(1.0, tiles.len(), 0, LoadPhase::Merging))?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AreaFilterConfig, Config};
    use crate::constants::{FILTER_INVALID, MAX_ATTRIBUTES};
    use crate::grid::GridHeader;
    use crate::sounding::{BinCoord, StoredSounding};
    use std::path::Path;

    fn grid() -> GridHeader {
        let config = Config {
            min_latitude: 0.0,
            max_latitude: 0.01,
            min_longitude: 0.0,
            max_longitude: 0.01,
            bin_size_meters: 111.12,
            ..Default::default()
        };
        GridHeader::from_config(&config).unwrap()
    }

    fn sounding(coord: BinCoord, depth: f32, flags: u32) -> StoredSounding {
        StoredSounding {
            coord,
            latitude: 0.0,
            longitude: 0.0,
            depth,
            horizontal_error: 0.0,
            vertical_error: 0.0,
            flags,
            file_number: 0,
            line_number: 0,
            ping_number: 0,
            beam_number: 0,
            timestamp: (0, 0),
            attributes: [0.0; MAX_ATTRIBUTES],
        }
    }

    fn partial(path: &Path, tile: usize, soundings: Vec<StoredSounding>) -> TileReport {
        let grid = grid();
        let mut store = PfmStore::create(path, &grid).unwrap().with_cache_limit(2);
        let mut dirty = DirtyBinMap::new(&grid);
        for s in soundings {
            dirty.mark(&s.coord);
            store.cached_write(s).unwrap();
        }
        let out_count = store.sounding_count();
        store.close().unwrap();
        TileReport {
            tile,
            out_count,
            out_of_range_count: 0,
            data_read_errors: 0,
            dirty,
            partial_path: path.to_path_buf(),
        }
    }

    #[test]
    fn test_merge_recomputes_only_dirty_bins() {
        let dir = tempfile::tempdir().unwrap();
        let grid = grid();
        let mut destination = PfmStore::create(&dir.path().join("dest.pfm"), &grid).unwrap();
        // Pre-existing data in a bin nobody touches this run
        destination
            .cached_write(sounding(BinCoord::new(9, 9), 50.0, CHECKED))
            .unwrap();

        let a = BinCoord::new(1, 1);
        let b = BinCoord::new(7, 8);
        let tiles = vec![
            partial(
                &dir.path().join("t0.pfm"),
                0,
                vec![
                    sounding(a, 10.0, CHECKED | VERIFIED),
                    sounding(a, 12.0, 0),
                    sounding(a, 11.0, 0),
                ],
            ),
            partial(&dir.path().join("t1.pfm"), 1, vec![sounding(b, 20.0, 0)]),
        ];
        let mut dirty = DirtyBinMap::new(&grid);
        for t in tiles.iter() {
            dirty.union(&t.dirty);
        }

        let (tx, rx) = std::sync::mpsc::channel();
        let report = merge_and_recompute(&mut destination, &tiles, &dirty, None, &tx).unwrap();
        assert_eq!(report.merged, 4);
        assert_eq!(report.recomputed_bins, 2);
        assert_eq!(report.valid_count, 4);
        assert_eq!(report.min_depth, Some(10.0));
        assert_eq!(report.max_depth, Some(20.0));
        assert!(report.filter.is_none());
        assert_eq!(rx.try_iter().last().map(|s| s.progress), Some(1.0));

        assert_eq!(destination.bin(&a).len(), 3);
        assert!(destination.bin(&a).iter().all(|s| s.flags == 0));
        assert!(destination.bin_stats(&BinCoord::new(9, 9)).is_none());
        assert_eq!(destination.bin(&BinCoord::new(9, 9))[0].flags, CHECKED);
        for t in tiles.iter() {
            assert!(!t.partial_path.exists());
        }
    }

    #[test]
    fn test_missing_partial_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let grid = grid();
        let mut destination = PfmStore::create(&dir.path().join("dest.pfm"), &grid).unwrap();
        let tile = TileReport {
            tile: 2,
            out_count: 0,
            out_of_range_count: 0,
            data_read_errors: 0,
            dirty: DirtyBinMap::new(&grid),
            partial_path: dir.path().join("gone.pfm"),
        };
        let mut report = MergeReport::default();
        assert!(matches!(
            merge_tile(&mut destination, &tile, &mut report),
            Err(MergeError::PartialStore(2, _))
        ));
    }

    #[test]
    fn test_filter_respects_features() {
        let dir = tempfile::tempdir().unwrap();
        let grid = grid();
        let mut destination = PfmStore::create(&dir.path().join("dest.pfm"), &grid).unwrap();
        let noisy = BinCoord::new(2, 2);
        let protected = BinCoord::new(8, 8);
        let mut dirty = DirtyBinMap::new(&grid);
        for coord in [noisy, protected] {
            for depth in [10.0, 10.1, 9.9, 10.0, 10.1, 9.9, 10.0, 10.0, 10.0, 40.0] {
                destination.cached_write(sounding(coord, depth, 0)).unwrap();
            }
            dirty.mark(&coord);
        }
        let (lat, lon) = grid.bin_center(&protected);
        let filter = AreaFilter::new(&AreaFilterConfig {
            std_dev_multiplier: 2.0,
            feature_radius_meters: 10.0,
            features: vec![[lat, lon]],
        });

        let mut report = MergeReport::default();
        recompute_dirty_bins(&mut destination, &dirty, Some(&filter), &mut report);
        let stats = report.filter.unwrap();
        assert_eq!(stats.bad, 1);
        assert_eq!(stats.good, 9);
        assert_eq!(stats.protected_bins, 1);
        assert_eq!(destination.bin_stats(&noisy).unwrap().max_depth, 10.1f32 as f64);
        assert_eq!(destination.bin_stats(&protected).unwrap().max_depth, 40.0);
        assert_eq!(
            destination
                .bin(&noisy)
                .iter()
                .filter(|s| s.flags & FILTER_INVALID != 0)
                .count(),
            1
        );
    }
}
