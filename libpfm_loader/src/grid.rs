use serde::{Deserialize, Serialize};

use super::config::Config;
use super::constants::{MAX_BIN_COUNT, METERS_PER_DEGREE};
use super::error::ConfigError;
use super::sounding::BinCoord;

/// A latitude/longitude rectangle. Membership is closed on the min edges and open on the
/// max edges, so rectangles sharing an edge never both claim a point.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Rect {
    pub min_lat: f64,
    pub min_lon: f64,
    pub max_lat: f64,
    pub max_lon: f64,
}

impl Rect {
    pub fn new(min_lat: f64, min_lon: f64, max_lat: f64, max_lon: f64) -> Self {
        Self {
            min_lat,
            min_lon,
            max_lat,
            max_lon,
        }
    }

    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.min_lat && lat < self.max_lat && lon >= self.min_lon && lon < self.max_lon
    }
}

/// The geometry of a destination grid: its bounds, optional polygon, and bin layout.
///
/// Every bin coordinate in the loader comes from [`GridHeader::bin_coord`], computed once
/// per sounding by the reader and carried unchanged to the writer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridHeader {
    pub bounds: Rect,
    pub polygon: Vec<[f64; 2]>,
    pub bin_size_meters: f64,
    pub bin_size_lat: f64,
    pub bin_size_lon: f64,
    pub rows: u32,
    pub cols: u32,
    pub min_depth: f64,
    pub max_depth: f64,
}

impl GridHeader {
    /// Build the grid from a configuration.
    ///
    /// The bin size in metres is converted to degrees at the centre latitude. The grid
    /// bounds are grown so that they hold a whole number of bins.
    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        config.validate()?;
        let (min_lat, _, min_lon, _) = config.area_extent();
        let BinLayout {
            bin_size_lat,
            bin_size_lon,
            rows,
            cols,
        } = bin_layout(config)?;

        Ok(Self {
            bounds: Rect::new(
                min_lat,
                min_lon,
                min_lat + rows as f64 * bin_size_lat,
                min_lon + cols as f64 * bin_size_lon,
            ),
            polygon: if config.has_polygon() {
                config.polygon.clone()
            } else {
                vec![]
            },
            bin_size_meters: config.bin_size_meters,
            bin_size_lat,
            bin_size_lon,
            rows,
            cols,
            min_depth: config.min_depth,
            max_depth: config.max_depth,
        })
    }

    pub fn bin_count(&self) -> usize {
        self.rows as usize * self.cols as usize
    }

    /// Get the bin a position falls in, or None if it is outside the grid
    pub fn bin_coord(&self, lat: f64, lon: f64) -> Option<BinCoord> {
        if !self.bounds.contains(lat, lon) {
            return None;
        }
        let row = ((lat - self.bounds.min_lat) / self.bin_size_lat).floor() as u32;
        let col = ((lon - self.bounds.min_lon) / self.bin_size_lon).floor() as u32;
        // Rounding at the far edge can land one past the last bin
        Some(BinCoord::new(row.min(self.rows - 1), col.min(self.cols - 1)))
    }

    pub fn is_in_grid(&self, coord: &BinCoord) -> bool {
        coord.row < self.rows && coord.col < self.cols
    }

    /// Centre of a bin as (latitude, longitude)
    pub fn bin_center(&self, coord: &BinCoord) -> (f64, f64) {
        (
            self.bounds.min_lat + (coord.row as f64 + 0.5) * self.bin_size_lat,
            self.bounds.min_lon + (coord.col as f64 + 0.5) * self.bin_size_lon,
        )
    }

    /// Row-major index of a bin
    pub fn bin_index(&self, coord: &BinCoord) -> usize {
        coord.row as usize * self.cols as usize + coord.col as usize
    }

    pub fn coord_from_index(&self, index: usize) -> BinCoord {
        BinCoord::new(
            (index / self.cols as usize) as u32,
            (index % self.cols as usize) as u32,
        )
    }

    /// Is the position inside the survey area (the polygon if there is one)
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        if !self.bounds.contains(lat, lon) {
            return false;
        }
        if self.polygon.is_empty() {
            return true;
        }
        point_in_polygon(&self.polygon, lat, lon)
    }

    /// Check that another grid lays out bins identically
    pub fn is_compatible(&self, other: &GridHeader) -> bool {
        self.rows == other.rows
            && self.cols == other.cols
            && (self.bounds.min_lat - other.bounds.min_lat).abs() < f64::EPSILON
            && (self.bounds.min_lon - other.bounds.min_lon).abs() < f64::EPSILON
            && (self.bin_size_lat - other.bin_size_lat).abs() < f64::EPSILON
            && (self.bin_size_lon - other.bin_size_lon).abs() < f64::EPSILON
    }
}

/// Bin sizes in degrees and the grid shape implied by a configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BinLayout {
    pub bin_size_lat: f64,
    pub bin_size_lon: f64,
    pub rows: u32,
    pub cols: u32,
}

/// Lay out the bins of a configuration's area.
///
/// The bin size in metres is converted to degrees at the centre latitude. Fails with
/// [`ConfigError::GridTooLarge`] when the grid would hold more than [`MAX_BIN_COUNT`] bins.
pub fn bin_layout(config: &Config) -> Result<BinLayout, ConfigError> {
    let (min_lat, max_lat, min_lon, max_lon) = config.area_extent();
    let too_large = ConfigError::GridTooLarge {
        bin_size: config.bin_size_meters,
        limit: MAX_BIN_COUNT,
    };
    let center_lat = (min_lat + max_lat) / 2.0;
    let bin_size_lat = config.bin_size_meters / METERS_PER_DEGREE;
    let bin_size_lon = bin_size_lat / center_lat.to_radians().cos();
    if bin_size_lon.is_nan() || bin_size_lon <= 0.0 {
        return Err(ConfigError::BadArea);
    }
    let (Some(rows), Some(cols)) = (
        bins_spanning(max_lat - min_lat, bin_size_lat),
        bins_spanning(max_lon - min_lon, bin_size_lon),
    ) else {
        return Err(too_large);
    };
    match (rows as u64).checked_mul(cols as u64) {
        Some(count) if count <= MAX_BIN_COUNT => Ok(BinLayout {
            bin_size_lat,
            bin_size_lon,
            rows,
            cols,
        }),
        _ => Err(too_large),
    }
}

/// Whole bins needed to cover an extent, or None past u32. Ratios a hair above an
/// integer from rounding do not earn an extra bin.
fn bins_spanning(extent: f64, bin_size: f64) -> Option<u32> {
    let bins = ((extent / bin_size) - 1e-9).ceil().max(1.0);
    if bins.is_finite() && bins <= u32::MAX as f64 {
        Some(bins as u32)
    } else {
        None
    }
}

/// Even-odd ray casting. Vertices are [latitude, longitude]
fn point_in_polygon(polygon: &[[f64; 2]], lat: f64, lon: f64) -> bool {
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let [lat_i, lon_i] = polygon[i];
        let [lat_j, lon_j] = polygon[j];
        if (lat_i > lat) != (lat_j > lat)
            && lon < (lon_j - lon_i) * (lat - lat_i) / (lat_j - lat_i) + lon_i
        {
            inside = !inside;
        }
        j = i;
    }
    inside
}

/// Equirectangular distance in metres, plenty for bin-scale distances
pub fn distance_meters(lat_a: f64, lon_a: f64, lat_b: f64, lon_b: f64) -> f64 {
    let mean_lat = ((lat_a + lat_b) / 2.0).to_radians();
    let dy = (lat_b - lat_a) * METERS_PER_DEGREE;
    let dx = (lon_b - lon_a) * METERS_PER_DEGREE * mean_lat.cos();
    (dx * dx + dy * dy).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header() -> GridHeader {
        let config = Config {
            min_latitude: 0.0,
            max_latitude: 0.01,
            min_longitude: 0.0,
            max_longitude: 0.02,
            bin_size_meters: 111.12,
            ..Default::default()
        };
        GridHeader::from_config(&config).unwrap()
    }

    #[test]
    fn test_layout() {
        let grid = header();
        assert_eq!(grid.rows, 10);
        assert_eq!(grid.cols, 20);
        assert_eq!(grid.bin_count(), 200);
    }

    #[test]
    fn test_oversized_grid_is_an_error() {
        let config = Config {
            min_latitude: 0.0,
            max_latitude: 1.0,
            min_longitude: 0.0,
            max_longitude: 1.0,
            bin_size_meters: 1e-6,
            ..Default::default()
        };
        assert!(matches!(
            GridHeader::from_config(&config),
            Err(ConfigError::GridTooLarge { .. })
        ));
        assert_eq!(bins_spanning(1.0, 1e-12), None);
        assert_eq!(bins_spanning(0.5, 0.1), Some(5));
    }

    #[test]
    fn test_bin_coord() {
        let grid = header();
        assert_eq!(grid.bin_coord(0.0, 0.0), Some(BinCoord::new(0, 0)));
        assert_eq!(grid.bin_coord(0.00551, 0.01951), Some(BinCoord::new(5, 19)));
        assert_eq!(grid.bin_coord(-0.0001, 0.0), None);
        assert_eq!(grid.bin_coord(grid.bounds.max_lat, 0.0), None);
    }

    #[test]
    fn test_index_round_trip() {
        let grid = header();
        let coord = BinCoord::new(7, 13);
        assert_eq!(grid.coord_from_index(grid.bin_index(&coord)), coord);
    }

    #[test]
    fn test_polygon_membership() {
        let mut grid = header();
        grid.polygon = vec![[0.0, 0.0], [0.01, 0.0], [0.0, 0.02]];
        assert!(grid.contains(0.001, 0.001));
        assert!(!grid.contains(0.009, 0.019));
    }

    #[test]
    fn test_distance() {
        let d = distance_meters(0.0, 0.0, 1.0 / 60.0, 0.0);
        assert!((d - 1852.0).abs() < 1e-6);
    }
}
