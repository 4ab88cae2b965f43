use std::ops::Range;

use super::error::PartitionError;
use super::grid::{GridHeader, Rect};
use super::sounding::BinCoord;

/// A spatial piece of the destination grid, owned by exactly one writer for a whole load.
///
/// Tiles own closed-open ranges of bin rows and columns, so two tiles never share a bin
/// and a bin on a shared edge always belongs to the tile whose range starts there.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialTile {
    pub index: usize,
    pub rows: Range<u32>,
    pub cols: Range<u32>,
    /// The latitude/longitude rectangle covered by this tile's bins
    pub bounds: Rect,
}

impl SpatialTile {
    pub fn contains(&self, coord: &BinCoord) -> bool {
        self.rows.contains(&coord.row) && self.cols.contains(&coord.col)
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty() || self.cols.is_empty()
    }

    pub fn bin_count(&self) -> usize {
        self.rows.len() * self.cols.len()
    }
}

/// Lay a tile count out as (tile rows, tile columns).
///
/// Only powers of two split evenly by repeated halving; odd powers get the extra split
/// along the columns.
pub fn tile_grid_shape(tile_count: usize) -> Result<(usize, usize), PartitionError> {
    if !tile_count.is_power_of_two() {
        return Err(PartitionError::NotPowerOfTwo(tile_count));
    }
    let k = tile_count.trailing_zeros();
    let tile_rows = 1usize << (k / 2);
    let tile_cols = 1usize << (k - k / 2);
    Ok((tile_rows, tile_cols))
}

/// Split `length` bins into `parts` contiguous closed-open ranges
fn split_axis(length: u32, parts: usize) -> Vec<Range<u32>> {
    let length = length as u64;
    let parts = parts as u64;
    (0..parts)
        .map(|i| ((length * i / parts) as u32)..((length * (i + 1) / parts) as u32))
        .collect()
}

/// Partition the destination grid into `tile_count` tiles.
///
/// The tiles cover every bin exactly once. Tile indices run row-major from the
/// south-west corner.
pub fn partition(grid: &GridHeader, tile_count: usize) -> Result<Vec<SpatialTile>, PartitionError> {
    let (tile_rows, tile_cols) = tile_grid_shape(tile_count)?;
    let row_ranges = split_axis(grid.rows, tile_rows);
    let col_ranges = split_axis(grid.cols, tile_cols);

    let mut tiles = Vec::with_capacity(tile_count);
    for rows in row_ranges.iter() {
        for cols in col_ranges.iter() {
            let bounds = Rect::new(
                grid.bounds.min_lat + rows.start as f64 * grid.bin_size_lat,
                grid.bounds.min_lon + cols.start as f64 * grid.bin_size_lon,
                grid.bounds.min_lat + rows.end as f64 * grid.bin_size_lat,
                grid.bounds.min_lon + cols.end as f64 * grid.bin_size_lon,
            );
            tiles.push(SpatialTile {
                index: tiles.len(),
                rows: rows.clone(),
                cols: cols.clone(),
                bounds,
            });
        }
    }
    Ok(tiles)
}

/// Find the tile that owns a bin. None means the bin is outside every tile and the
/// sounding must be dropped.
pub fn locate_tile(coord: &BinCoord, tiles: &[SpatialTile]) -> Option<usize> {
    tiles
        .iter()
        .find(|tile| tile.contains(coord))
        .map(|tile| tile.index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn grid(rows_deg: f64, cols_deg: f64) -> GridHeader {
        let config = Config {
            min_latitude: 0.0,
            max_latitude: rows_deg,
            min_longitude: 0.0,
            max_longitude: cols_deg,
            bin_size_meters: 111.12,
            ..Default::default()
        };
        GridHeader::from_config(&config).unwrap()
    }

    #[test]
    fn test_shape() {
        assert_eq!(tile_grid_shape(1).unwrap(), (1, 1));
        assert_eq!(tile_grid_shape(2).unwrap(), (1, 2));
        assert_eq!(tile_grid_shape(4).unwrap(), (2, 2));
        assert_eq!(tile_grid_shape(8).unwrap(), (2, 4));
        assert!(tile_grid_shape(0).is_err());
        assert!(tile_grid_shape(3).is_err());
        assert!(tile_grid_shape(12).is_err());
    }

    #[test]
    fn test_partition_is_exhaustive_and_disjoint() {
        let grid = grid(0.011, 0.017);
        for count in [1, 2, 4, 8, 16] {
            let tiles = partition(&grid, count).unwrap();
            assert_eq!(tiles.len(), count);
            let total: usize = tiles.iter().map(SpatialTile::bin_count).sum();
            assert_eq!(total, grid.bin_count());
            for row in 0..grid.rows {
                for col in 0..grid.cols {
                    let coord = BinCoord::new(row, col);
                    let owners = tiles.iter().filter(|t| t.contains(&coord)).count();
                    assert_eq!(owners, 1, "bin {coord} with {count} tiles");
                    assert!(locate_tile(&coord, &tiles).is_some());
                }
            }
        }
    }

    #[test]
    fn test_points_route_to_one_tile() {
        let grid = grid(0.01, 0.01);
        let tiles = partition(&grid, 4).unwrap();
        let steps = 37;
        for i in 0..steps {
            for j in 0..steps {
                let lat = grid.bounds.min_lat
                    + (grid.bounds.max_lat - grid.bounds.min_lat) * i as f64 / steps as f64;
                let lon = grid.bounds.min_lon
                    + (grid.bounds.max_lon - grid.bounds.min_lon) * j as f64 / steps as f64;
                let coord = grid.bin_coord(lat, lon).unwrap();
                let owners: Vec<usize> = tiles
                    .iter()
                    .filter(|t| t.contains(&coord))
                    .map(|t| t.index)
                    .collect();
                assert_eq!(owners.len(), 1);
            }
        }
    }

    #[test]
    fn test_shared_boundary_is_deterministic() {
        let grid = grid(0.01, 0.01);
        let tiles = partition(&grid, 4).unwrap();
        // The south-west corner of tile 3 touches all four tiles
        let lat = tiles[3].bounds.min_lat;
        let lon = tiles[3].bounds.min_lon;
        let first = grid
            .bin_coord(lat, lon)
            .and_then(|c| locate_tile(&c, &tiles));
        assert!(first.is_some());
        for _ in 0..100 {
            let again = grid
                .bin_coord(lat, lon)
                .and_then(|c| locate_tile(&c, &tiles));
            assert_eq!(first, again);
        }
    }

    #[test]
    fn test_more_tiles_than_bins() {
        let grid = grid(0.001, 0.001);
        let tiles = partition(&grid, 4).unwrap();
        assert_eq!(tiles.iter().filter(|t| !t.is_empty()).count(), 1);
        assert_eq!(locate_tile(&BinCoord::new(0, 0), &tiles), Some(3));
    }
}
