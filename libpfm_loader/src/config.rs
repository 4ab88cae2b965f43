use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use super::constants::{BUFFER_SIZE, CACHE_SIZE, DEFAULT_READER_THREADS, DEFAULT_TILE_COUNT};
use super::error::ConfigError;
use super::grid::bin_layout;
use super::partition::tile_grid_shape;

/// Settings for the optional area filter run over dirty bins after the merge
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AreaFilterConfig {
    /// Soundings further than this many standard deviations from the bin mean are invalidated
    pub std_dev_multiplier: f64,
    /// Bins whose centre lies within this distance of a feature are never filtered
    pub feature_radius_meters: f64,
    /// Feature (target) positions as [latitude, longitude]
    pub features: Vec<[f64; 2]>,
}

impl Default for AreaFilterConfig {
    fn default() -> Self {
        Self {
            std_dev_multiplier: 2.4,
            feature_radius_meters: 20.0,
            features: vec![],
        }
    }
}

/// Structure representing a load configuration. Contains the destination grid definition,
/// the input files, and the worker layout.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub destination: PathBuf,
    pub input_files: Vec<PathBuf>,
    pub min_latitude: f64,
    pub max_latitude: f64,
    pub min_longitude: f64,
    pub max_longitude: f64,
    /// Optional survey polygon as [latitude, longitude] vertices. Soundings outside it are
    /// dropped. If empty the rectangle above is the polygon.
    pub polygon: Vec<[f64; 2]>,
    pub bin_size_meters: f64,
    pub min_depth: f64,
    pub max_depth: f64,
    pub reader_threads: usize,
    pub tile_count: usize,
    pub buffer_size: usize,
    /// Soundings each tile writer keeps in memory before spilling its partial store to disk
    pub cache_size: usize,
    /// Load everything as reference data (excluded from bin statistics)
    pub reference: bool,
    pub area_filter: Option<AreaFilterConfig>,
    /// Where tile partial stores are written. Defaults to the destination's directory
    pub scratch_path: Option<PathBuf>,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid
    fn default() -> Self {
        Self {
            destination: PathBuf::from("None"),
            input_files: vec![],
            min_latitude: 0.0,
            max_latitude: 0.0,
            min_longitude: 0.0,
            max_longitude: 0.0,
            polygon: vec![],
            bin_size_meters: 2.0,
            min_depth: -10.0,
            max_depth: 1000.0,
            reader_threads: DEFAULT_READER_THREADS,
            tile_count: DEFAULT_TILE_COUNT,
            buffer_size: BUFFER_SIZE,
            cache_size: CACHE_SIZE,
            reference: false,
            area_filter: None,
            scratch_path: None,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Check everything the load depends on before any thread starts
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reader_threads < 1 {
            return Err(ConfigError::BadThreadCount("reader", self.reader_threads));
        }
        if self.tile_count < 1 {
            return Err(ConfigError::BadThreadCount("writer", self.tile_count));
        }
        tile_grid_shape(self.tile_count)?;
        if self.buffer_size < 1 {
            return Err(ConfigError::BadBufferSize);
        }
        if self.cache_size < 1 {
            return Err(ConfigError::BadCacheSize);
        }
        if self.min_depth > self.max_depth {
            return Err(ConfigError::BadDepthRange(self.min_depth, self.max_depth));
        }
        if self.bin_size_meters <= 0.0 || !self.bin_size_meters.is_finite() {
            return Err(ConfigError::BadBinSize(self.bin_size_meters));
        }
        let corners = [
            self.min_latitude,
            self.max_latitude,
            self.min_longitude,
            self.max_longitude,
        ];
        if !corners.iter().chain(self.polygon.iter().flatten()).all(|v| v.is_finite()) {
            return Err(ConfigError::BadArea);
        }
        let (min_lat, max_lat, min_lon, max_lon) = self.area_extent();
        if min_lat < -90.0 || max_lat > 90.0 {
            return Err(ConfigError::BadLatitude(min_lat, max_lat));
        }
        if min_lon < -180.0 || max_lon > 360.0 {
            return Err(ConfigError::BadLongitude(min_lon, max_lon));
        }
        if max_lat <= min_lat || max_lon <= min_lon {
            return Err(ConfigError::BadArea);
        }
        bin_layout(self)?;
        Ok(())
    }

    /// The bounding extent of the survey area as (min_lat, max_lat, min_lon, max_lon).
    ///
    /// The polygon wins over the rectangle when it has at least three vertices.
    pub fn area_extent(&self) -> (f64, f64, f64, f64) {
        if self.has_polygon() {
            self.polygon.iter().fold(
                (f64::MAX, f64::MIN, f64::MAX, f64::MIN),
                |(min_lat, max_lat, min_lon, max_lon), [lat, lon]| {
                    (
                        min_lat.min(*lat),
                        max_lat.max(*lat),
                        min_lon.min(*lon),
                        max_lon.max(*lon),
                    )
                },
            )
        } else {
            (
                self.min_latitude,
                self.max_latitude,
                self.min_longitude,
                self.max_longitude,
            )
        }
    }

    pub fn has_polygon(&self) -> bool {
        self.polygon.len() >= 3
    }

    /// Get the path to the partial store of a tile
    pub fn get_partial_store_path(&self, tile: usize) -> PathBuf {
        let stem = self
            .destination
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| String::from("pfm"));
        let dir = match &self.scratch_path {
            Some(p) => p.clone(),
            None => self
                .destination
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_default(),
        };
        dir.join(format!("{stem}_tile{tile}.pfm"))
    }
}
