use std::path::PathBuf;
use thiserror::Error;

use super::sounding::BinCoord;
use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Config requires at least one {0} thread; found {1}")]
    BadThreadCount(&'static str, usize),
    #[error("Config buffer size must be at least 1")]
    BadBufferSize,
    #[error("Config depth range is inverted -- min: {0} max: {1}")]
    BadDepthRange(f64, f64),
    #[error("Config bin size must be positive; found {0}")]
    BadBinSize(f64),
    #[error("Config area is degenerate; it must have a finite, positive extent in latitude and longitude")]
    BadArea,
    #[error("Config latitudes must lie within -90 to 90 -- min: {0} max: {1}")]
    BadLatitude(f64, f64),
    #[error("Config longitudes must lie within -180 to 360 -- min: {0} max: {1}")]
    BadLongitude(f64, f64),
    #[error("Config grid of {bin_size} m bins needs more than {limit} bins; use larger bins or a smaller area")]
    GridTooLarge { bin_size: f64, limit: u64 },
    #[error("Config cache size must be at least 1")]
    BadCacheSize,
    #[error("Config failed due to partition error: {0}")]
    PartitionError(#[from] PartitionError),
}

#[derive(Debug, Clone, Error)]
pub enum PartitionError {
    #[error("Tile count {0} cannot be laid out as a regular grid; it must be a power of two")]
    NotPowerOfTwo(usize),
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Could not open input file {0:?} because it does not exist")]
    BadFilePath(PathBuf),
    #[error("Input file has a bad header: {0}")]
    BadHeader(String),
    #[error("Malformed record {record}: {reason}")]
    Malformed { record: u64, reason: String },
    #[error("Decoder failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

impl DecodeError {
    /// Record level errors leave the decoder positioned at the next record
    pub fn is_skippable(&self) -> bool {
        matches!(self, Self::Malformed { .. })
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Data read error: bin {coord} is outside the grid of {rows} rows x {cols} columns")]
    DataRead { coord: BinCoord, rows: u32, cols: u32 },
    #[error("Store {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Store {0:?} was opened read-only")]
    ReadOnly(PathBuf),
    #[error("Store data file {0:?} is corrupt: {1}")]
    Corrupt(PathBuf, String),
    #[error("Store grid does not match the requested grid; an existing store can only be appended with its own grid")]
    GridMismatch,
    #[error("Store has no file numbers left (maximum {0})")]
    TooManyFiles(i16),
    #[error("Store counter lock was poisoned by a panicked worker")]
    Poisoned,
    #[error("Store failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Store failed to parse its YAML index: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

impl StoreError {
    /// The one store failure a load can log and continue past
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DataRead { .. })
    }
}

#[derive(Debug, Error)]
pub enum ReaderError {
    #[error("Reader worker {0} failed due to store error: {1}")]
    StoreError(usize, StoreError),
    #[error("Reader worker failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}

#[derive(Debug, Error)]
pub enum WriterError {
    #[error("Writer for tile {0} failed due to store error: {1}")]
    StoreError(usize, StoreError),
}

#[derive(Debug, Error)]
pub enum MergeError {
    #[error("Could not reopen partial store for tile {0}: {1}. Its soundings are lost; rerun the load")]
    PartialStore(usize, StoreError),
    #[error("Merge failed writing the destination store: {0}. Recompute the destination before using it")]
    StoreError(#[from] StoreError),
    #[error("Merge failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Load failed due to Config error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Load failed due to destination store error: {0}")]
    StoreError(#[from] StoreError),
    #[error("Load failed due to Reader error: {0}")]
    ReaderError(#[from] ReaderError),
    #[error("Load failed due to Writer error: {0}")]
    WriterError(#[from] WriterError),
    #[error("Load failed due to Merge error: {0}")]
    MergeError(#[from] MergeError),
    #[error("Load failed because worker thread {0} panicked")]
    WorkerPanic(String),
    #[error("Load was cancelled before the readers finished; the destination was not modified")]
    Cancelled,
    #[error("Load failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
}
