use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use fxhash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::constants::{
    INVALID_MASK, MAX_ATTRIBUTES, MAX_FILE_NUMBER, REFERENCE, STORE_DATA_DIR_SUFFIX,
    STORE_DATA_FILE, STORE_DATA_MAGIC, STORE_FORMAT_VERSION, STORE_SPILL_FILE,
};
use super::decoder::FormatTag;
use super::error::StoreError;
use super::grid::GridHeader;
use super::sounding::{BinCoord, StoredSounding};

/// One entry of the store's input file list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileEntry {
    pub number: i16,
    pub path: PathBuf,
    pub format: FormatTag,
}

/// One entry of the store's survey line list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineEntry {
    pub number: i32,
    pub file_number: i16,
    pub name: String,
}

/// Aggregate statistics of one bin. Only valid, non-reference soundings count.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BinStats {
    pub count: u32,
    pub total: u32,
    pub min_depth: f64,
    pub max_depth: f64,
    pub avg_depth: f64,
    pub std_dev: f64,
}

impl BinStats {
    pub fn from_soundings(soundings: &[StoredSounding]) -> Self {
        let mut stats = BinStats {
            total: soundings.len() as u32,
            min_depth: f64::MAX,
            max_depth: f64::MIN,
            ..Default::default()
        };
        let mut sum = 0.0;
        let mut sum_sq = 0.0;
        for s in soundings
            .iter()
            .filter(|s| s.flags & (INVALID_MASK | REFERENCE) == 0)
        {
            let depth = s.depth as f64;
            stats.count += 1;
            stats.min_depth = stats.min_depth.min(depth);
            stats.max_depth = stats.max_depth.max(depth);
            sum += depth;
            sum_sq += depth * depth;
        }
        if stats.count == 0 {
            stats.min_depth = 0.0;
            stats.max_depth = 0.0;
            return stats;
        }
        let n = stats.count as f64;
        stats.avg_depth = sum / n;
        stats.std_dev = if stats.count > 1 {
            ((sum_sq - sum * sum / n) / (n - 1.0)).max(0.0).sqrt()
        } else {
            0.0
        };
        stats
    }
}

/// The YAML index half of a store
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreIndex {
    version: String,
    header: GridHeader,
    files: Vec<FileEntry>,
    lines: Vec<LineEntry>,
    sounding_count: u64,
    min_depth: Option<f64>,
    max_depth: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Writes are buffered in memory and flushed on close, or sooner with a cache limit
    Cached,
    ReadOnly,
}

/// A binned sounding store.
///
/// On disk a store is a YAML index at `path` (grid header, file and line lists) and a
/// sidecar data directory `path.data/` holding the soundings and bin statistics as
/// little-endian binary. The file and line counters sit behind a mutex so readers on
/// several threads can reserve numbers through a shared reference.
///
/// A store given a cache limit (see [`PfmStore::with_cache_limit`]) appends its cached
/// soundings to a spill file in the data directory whenever the limit is reached, so
/// [`PfmStore::bins`] only sees what is still in memory. Such stores are write-only
/// until closed.
#[derive(Debug)]
pub struct PfmStore {
    path: PathBuf,
    mode: StoreMode,
    header: GridHeader,
    index: Mutex<StoreIndex>,
    bins: FxHashMap<BinCoord, Vec<StoredSounding>>,
    stats: FxHashMap<BinCoord, BinStats>,
    cache_limit: Option<usize>,
    cached: usize,
    spilled: u64,
}

impl PfmStore {
    /// Create a new, empty store for cached writing. An existing store at path is replaced
    /// when this store is closed.
    pub fn create(path: &Path, header: &GridHeader) -> Result<Self, StoreError> {
        Ok(Self {
            path: path.to_path_buf(),
            mode: StoreMode::Cached,
            header: header.clone(),
            index: Mutex::new(StoreIndex {
                version: format!("{}:{}", env!("CARGO_PKG_NAME"), STORE_FORMAT_VERSION),
                header: header.clone(),
                files: vec![],
                lines: vec![],
                sounding_count: 0,
                min_depth: None,
                max_depth: None,
            }),
            bins: FxHashMap::default(),
            stats: FxHashMap::default(),
            cache_limit: None,
            cached: 0,
            spilled: 0,
        })
    }

    /// Spill cached soundings to disk once `limit` of them are held in memory
    pub fn with_cache_limit(mut self, limit: usize) -> Self {
        self.cache_limit = Some(limit.max(1));
        self
    }

    /// Open the destination for cached writing, appending if it already exists.
    ///
    /// An existing store must have the same bin layout as `header`.
    pub fn open_or_create(path: &Path, header: &GridHeader) -> Result<Self, StoreError> {
        if !path.exists() {
            return Self::create(path, header);
        }
        let mut store = Self::open_read(path)?;
        if !store.header.is_compatible(header) {
            return Err(StoreError::GridMismatch);
        }
        store.mode = StoreMode::Cached;
        Ok(store)
    }

    /// Open an existing store for plain reading
    pub fn open_read(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let index: StoreIndex = serde_yaml::from_str(&yaml_str)?;

        let data_path = data_directory(path).join(STORE_DATA_FILE);
        let (bins, stats): BinMaps = if data_path.exists() {
            read_data_file(&data_path)?
        } else {
            (FxHashMap::default(), FxHashMap::default())
        };

        let count: u64 = bins.values().map(|b| b.len() as u64).sum();
        if count != index.sounding_count {
            return Err(StoreError::Corrupt(
                data_path,
                format!(
                    "index lists {} soundings but data holds {count}",
                    index.sounding_count
                ),
            ));
        }

        Ok(Self {
            path: path.to_path_buf(),
            mode: StoreMode::ReadOnly,
            header: index.header.clone(),
            index: Mutex::new(index),
            bins,
            stats,
            cache_limit: None,
            cached: count as usize,
            spilled: 0,
        })
    }

    /// Delete a store: its index file and sidecar data directory
    pub fn remove(path: &Path) -> Result<(), StoreError> {
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        let data_dir = data_directory(path);
        if data_dir.exists() {
            std::fs::remove_dir_all(data_dir)?;
        }
        Ok(())
    }

    /// Flush a cached store to disk. Read-only stores are simply dropped.
    pub fn close(mut self) -> Result<(), StoreError> {
        if self.mode == StoreMode::ReadOnly {
            return Ok(());
        }

        let (min_depth, max_depth) = self.depth_range();
        let index = self.index.get_mut().map_err(|_| StoreError::Poisoned)?;
        index.min_depth = min_depth;
        index.max_depth = max_depth;

        let data_dir = data_directory(&self.path);
        std::fs::create_dir_all(&data_dir)?;
        let spill_path = data_dir.join(STORE_SPILL_FILE);
        let spill = (self.spilled > 0).then_some((spill_path.as_path(), self.spilled));
        write_data_file(&data_dir.join(STORE_DATA_FILE), spill, &self.bins, &self.stats)?;
        if spill.is_some() {
            std::fs::remove_file(&spill_path)?;
        }

        let yaml_str = serde_yaml::to_string(index)?;
        let mut index_file = File::create(&self.path)?;
        index_file.write_all(yaml_str.as_bytes())?;
        Ok(())
    }

    /// Reserve the next file number and record the file in the list.
    ///
    /// Safe to call from several threads; the lock covers only this update.
    pub fn register_file(&self, path: &Path, format: FormatTag) -> Result<i16, StoreError> {
        let mut index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        if index.files.len() > MAX_FILE_NUMBER as usize {
            return Err(StoreError::TooManyFiles(MAX_FILE_NUMBER));
        }
        let number = index.files.len() as i16;
        index.files.push(FileEntry {
            number,
            path: path.to_path_buf(),
            format,
        });
        Ok(number)
    }

    /// Reserve the next line number and record the line in the list
    pub fn register_line(&self, file_number: i16, name: &str) -> Result<i32, StoreError> {
        let mut index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        let number = index.lines.len() as i32;
        index.lines.push(LineEntry {
            number,
            file_number,
            name: name.to_string(),
        });
        Ok(number)
    }

    /// Check the file list for a path (used to reject files loaded on a previous run)
    pub fn contains_file(&self, path: &Path) -> Result<bool, StoreError> {
        let index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(index.files.iter().any(|f| f.path == path))
    }

    pub fn files(&self) -> Result<Vec<FileEntry>, StoreError> {
        let index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(index.files.clone())
    }

    pub fn lines(&self) -> Result<Vec<LineEntry>, StoreError> {
        let index = self.index.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(index.lines.clone())
    }

    /// Append a sounding to its bin.
    ///
    /// A bin outside the grid is a [`StoreError::DataRead`], which callers may log and skip.
    pub fn cached_write(&mut self, sounding: StoredSounding) -> Result<(), StoreError> {
        if self.mode == StoreMode::ReadOnly {
            return Err(StoreError::ReadOnly(self.path.clone()));
        }
        if !self.header.is_in_grid(&sounding.coord) {
            return Err(StoreError::DataRead {
                coord: sounding.coord,
                rows: self.header.rows,
                cols: self.header.cols,
            });
        }
        self.bins.entry(sounding.coord).or_default().push(sounding);
        self.cached += 1;
        self.index
            .get_mut()
            .map_err(|_| StoreError::Poisoned)?
            .sounding_count += 1;
        if self.cache_limit.is_some_and(|limit| self.cached >= limit) {
            self.flush_cache()?;
        }
        Ok(())
    }

    /// Append every cached sounding to the spill file and empty the cache.
    ///
    /// Bin statistics stay in memory; they are only kept by stores that recompute, and
    /// those hold all their soundings.
    fn flush_cache(&mut self) -> Result<(), StoreError> {
        let data_dir = data_directory(&self.path);
        std::fs::create_dir_all(&data_dir)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(data_dir.join(STORE_SPILL_FILE))?;
        let mut writer = BufWriter::new(file);
        for s in self.bins.values().flatten() {
            write_sounding(&mut writer, s)?;
        }
        writer.flush()?;
        spdlog::debug!(
            "Spilled {} soundings of {} to disk",
            self.cached,
            self.path.to_string_lossy()
        );
        self.spilled += self.cached as u64;
        self.cached = 0;
        self.bins.clear();
        Ok(())
    }

    /// Iterate over every bin holding soundings in memory
    pub fn bins(&self) -> impl Iterator<Item = (&BinCoord, &Vec<StoredSounding>)> {
        self.bins.iter()
    }

    pub fn bin(&self, coord: &BinCoord) -> &[StoredSounding] {
        self.bins.get(coord).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn bin_mut(&mut self, coord: &BinCoord) -> Option<&mut Vec<StoredSounding>> {
        self.bins.get_mut(coord)
    }

    /// Recompute and keep the statistics of one bin
    pub fn recompute_bin(&mut self, coord: &BinCoord) -> BinStats {
        let stats = BinStats::from_soundings(self.bin(coord));
        self.stats.insert(*coord, stats);
        stats
    }

    pub fn bin_stats(&self, coord: &BinCoord) -> Option<&BinStats> {
        self.stats.get(coord)
    }

    /// Clear validity bits on every sounding of a bin
    pub fn clear_bin_validity(&mut self, coord: &BinCoord, bits: u32) {
        if let Some(soundings) = self.bins.get_mut(coord) {
            for s in soundings.iter_mut() {
                s.flags &= !bits;
            }
        }
    }

    /// Depth range over every bin with valid soundings
    pub fn depth_range(&self) -> (Option<f64>, Option<f64>) {
        self.stats
            .values()
            .filter(|s| s.count > 0)
            .fold((None, None), |(min, max), s| {
                (
                    Some(min.map_or(s.min_depth, |m: f64| m.min(s.min_depth))),
                    Some(max.map_or(s.max_depth, |m: f64| m.max(s.max_depth))),
                )
            })
    }

    pub fn sounding_count(&self) -> u64 {
        self.spilled + self.bins.values().map(|b| b.len() as u64).sum::<u64>()
    }

    pub fn header(&self) -> &GridHeader {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> StoreMode {
        self.mode
    }
}

/// Reads the soundings of a closed store one at a time without loading the store.
///
/// Used by the merge so a partial store never has to fit in memory.
#[derive(Debug)]
pub struct SoundingStream {
    reader: Option<BufReader<File>>,
    data_path: PathBuf,
    remaining: u64,
}

impl SoundingStream {
    /// Open the store at `path`. Its data file must hold as many soundings as its index lists
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        if !path.exists() {
            return Err(StoreError::BadFilePath(path.to_path_buf()));
        }
        let yaml_str = std::fs::read_to_string(path)?;
        let index: StoreIndex = serde_yaml::from_str(&yaml_str)?;

        let data_path = data_directory(path).join(STORE_DATA_FILE);
        let (reader, count) = if data_path.exists() {
            let (reader, count) = open_data_file(&data_path)?;
            (Some(reader), count)
        } else {
            (None, 0)
        };
        if count != index.sounding_count {
            return Err(StoreError::Corrupt(
                data_path,
                format!(
                    "index lists {} soundings but data holds {count}",
                    index.sounding_count
                ),
            ));
        }
        Ok(Self {
            reader,
            data_path,
            remaining: count,
        })
    }

    /// Soundings not yet read
    pub fn remaining(&self) -> u64 {
        self.remaining
    }
}

impl Iterator for SoundingStream {
    type Item = Result<StoredSounding, StoreError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let reader = self.reader.as_mut()?;
        self.remaining -= 1;
        match read_sounding(reader) {
            Ok(sounding) => Some(Ok(sounding)),
            Err(e) => {
                self.remaining = 0;
                Some(Err(StoreError::Corrupt(
                    self.data_path.clone(),
                    format!("sounding data ends early: {e}"),
                )))
            }
        }
    }
}

/// The sidecar directory of a store, `<path>.data`
pub fn data_directory(path: &Path) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(".");
    name.push(STORE_DATA_DIR_SUFFIX);
    PathBuf::from(name)
}

/// Write the data file. Spilled soundings, given as (spill path, count), are copied in
/// ahead of the ones still in memory.
fn write_data_file(
    path: &Path,
    spill: Option<(&Path, u64)>,
    bins: &FxHashMap<BinCoord, Vec<StoredSounding>>,
    stats: &FxHashMap<BinCoord, BinStats>,
) -> Result<(), std::io::Error> {
    let mut writer = BufWriter::new(File::create(path)?);
    writer.write_u32::<LittleEndian>(STORE_DATA_MAGIC)?;

    let in_memory: u64 = bins.values().map(|b| b.len() as u64).sum();
    let spilled = spill.map_or(0, |(_, count)| count);
    writer.write_u64::<LittleEndian>(spilled + in_memory)?;
    if let Some((spill_path, _)) = spill {
        std::io::copy(&mut BufReader::new(File::open(spill_path)?), &mut writer)?;
    }
    for s in bins.values().flatten() {
        write_sounding(&mut writer, s)?;
    }

    writer.write_u64::<LittleEndian>(stats.len() as u64)?;
    for (coord, st) in stats.iter() {
        writer.write_u32::<LittleEndian>(coord.row)?;
        writer.write_u32::<LittleEndian>(coord.col)?;
        writer.write_u32::<LittleEndian>(st.count)?;
        writer.write_u32::<LittleEndian>(st.total)?;
        writer.write_f64::<LittleEndian>(st.min_depth)?;
        writer.write_f64::<LittleEndian>(st.max_depth)?;
        writer.write_f64::<LittleEndian>(st.avg_depth)?;
        writer.write_f64::<LittleEndian>(st.std_dev)?;
    }
    writer.flush()
}

fn write_sounding<W: Write>(writer: &mut W, s: &StoredSounding) -> Result<(), std::io::Error> {
    writer.write_u32::<LittleEndian>(s.coord.row)?;
    writer.write_u32::<LittleEndian>(s.coord.col)?;
    writer.write_f64::<LittleEndian>(s.latitude)?;
    writer.write_f64::<LittleEndian>(s.longitude)?;
    writer.write_f32::<LittleEndian>(s.depth)?;
    writer.write_f32::<LittleEndian>(s.horizontal_error)?;
    writer.write_f32::<LittleEndian>(s.vertical_error)?;
    writer.write_u32::<LittleEndian>(s.flags)?;
    writer.write_i16::<LittleEndian>(s.file_number)?;
    writer.write_i32::<LittleEndian>(s.line_number)?;
    writer.write_i32::<LittleEndian>(s.ping_number)?;
    writer.write_i32::<LittleEndian>(s.beam_number)?;
    writer.write_i64::<LittleEndian>(s.timestamp.0)?;
    writer.write_u32::<LittleEndian>(s.timestamp.1)?;
    for a in s.attributes.iter() {
        writer.write_f32::<LittleEndian>(*a)?;
    }
    Ok(())
}

type BinMaps = (
    FxHashMap<BinCoord, Vec<StoredSounding>>,
    FxHashMap<BinCoord, BinStats>,
);

/// Open a data file, check its magic, and return it positioned at the first sounding
/// along with the sounding count
fn open_data_file(path: &Path) -> Result<(BufReader<File>, u64), StoreError> {
    let mut reader = BufReader::new(File::open(path)?);
    let magic = reader.read_u32::<LittleEndian>()?;
    if magic != STORE_DATA_MAGIC {
        return Err(StoreError::Corrupt(
            path.to_path_buf(),
            format!("bad magic {magic:#x}"),
        ));
    }
    let count = reader.read_u64::<LittleEndian>()?;
    Ok((reader, count))
}

fn read_data_file(path: &Path) -> Result<BinMaps, StoreError> {
    let (mut reader, count) = open_data_file(path)?;
    let mut bins: FxHashMap<BinCoord, Vec<StoredSounding>> = FxHashMap::default();
    for _ in 0..count {
        let sounding = read_sounding(&mut reader)?;
        bins.entry(sounding.coord).or_default().push(sounding);
    }

    let mut stats = FxHashMap::default();
    let n_stats = reader.read_u64::<LittleEndian>()?;
    for _ in 0..n_stats {
        let coord = BinCoord::new(
            reader.read_u32::<LittleEndian>()?,
            reader.read_u32::<LittleEndian>()?,
        );
        let st = BinStats {
            count: reader.read_u32::<LittleEndian>()?,
            total: reader.read_u32::<LittleEndian>()?,
            min_depth: reader.read_f64::<LittleEndian>()?,
            max_depth: reader.read_f64::<LittleEndian>()?,
            avg_depth: reader.read_f64::<LittleEndian>()?,
            std_dev: reader.read_f64::<LittleEndian>()?,
        };
        stats.insert(coord, st);
    }
    Ok((bins, stats))
}

fn read_sounding<R: Read>(reader: &mut R) -> Result<StoredSounding, std::io::Error> {
    let coord = BinCoord::new(
        reader.read_u32::<LittleEndian>()?,
        reader.read_u32::<LittleEndian>()?,
    );
    let latitude = reader.read_f64::<LittleEndian>()?;
    let longitude = reader.read_f64::<LittleEndian>()?;
    let depth = reader.read_f32::<LittleEndian>()?;
    let horizontal_error = reader.read_f32::<LittleEndian>()?;
    let vertical_error = reader.read_f32::<LittleEndian>()?;
    let flags = reader.read_u32::<LittleEndian>()?;
    let file_number = reader.read_i16::<LittleEndian>()?;
    let line_number = reader.read_i32::<LittleEndian>()?;
    let ping_number = reader.read_i32::<LittleEndian>()?;
    let beam_number = reader.read_i32::<LittleEndian>()?;
    let timestamp = (
        reader.read_i64::<LittleEndian>()?,
        reader.read_u32::<LittleEndian>()?,
    );
    let mut attributes = [0.0f32; MAX_ATTRIBUTES];
    for a in attributes.iter_mut() {
        *a = reader.read_f32::<LittleEndian>()?;
    }
    Ok(StoredSounding {
        coord,
        latitude,
        longitude,
        depth,
        horizontal_error,
        vertical_error,
        flags,
        file_number,
        line_number,
        ping_number,
        beam_number,
        timestamp,
        attributes,
    })
}
