use std::fmt::Display;

use super::constants::{
    FILTER_INVALID, INVALID_MASK, LOCAL_NULL_PLACEHOLDER, MAX_ATTRIBUTES, MODIFIED, SELECTED,
};

/// A (row, column) cell of the destination grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct BinCoord {
    pub row: u32,
    pub col: u32,
}

impl BinCoord {
    pub fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }
}

impl Display for BinCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// One depth measurement as a decoder hands it over.
///
/// Depth is positive down. Only lives for one decode iteration; the reader copies what it
/// needs into a TransferRecord.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawSounding {
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f64,
    pub horizontal_error: f32,
    pub vertical_error: f32,
    pub flags: u32,
    pub beam_number: i32,
    /// Platform heading in degrees, only known for swath formats
    pub heading: Option<f64>,
    pub attributes: [f32; MAX_ATTRIBUTES],
    pub timestamp: (i64, u32),
    /// No-bottom-return placeholder (LIDAR)
    pub null_placeholder: bool,
}

impl RawSounding {
    pub fn new(latitude: f64, longitude: f64, depth: f64) -> Self {
        Self {
            latitude,
            longitude,
            depth,
            ..Default::default()
        }
    }
}

/// A sounding in flight between a reader and the writer owning its tile.
///
/// Copied by value into a channel slot, never shared.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TransferRecord {
    pub sounding: RawSounding,
    pub file_number: i16,
    pub line_number: i32,
    pub ping_number: i32,
    pub coord: BinCoord,
    pub local_flags: u8,
}

impl TransferRecord {
    pub fn is_null_placeholder(&self) -> bool {
        self.local_flags & LOCAL_NULL_PLACEHOLDER != 0
    }

    /// Apply the out-of-range depth clamp.
    ///
    /// Depths outside `[min_depth, max_depth]` are replaced with the null depth
    /// `max_depth + 1.0`. The record is marked `FILTER_INVALID | MODIFIED` unless it is a
    /// null placeholder, which must stay visible as a null rather than filtered data.
    /// Returns true if the depth was out of range.
    pub fn clamp_depth(&mut self, min_depth: f64, max_depth: f64) -> bool {
        let depth = self.sounding.depth;
        if depth >= min_depth && depth <= max_depth {
            return false;
        }
        self.sounding.depth = null_depth(max_depth);
        if !self.is_null_placeholder() {
            self.sounding.flags |= FILTER_INVALID | MODIFIED;
        }
        true
    }

    /// Freshly loaded data is never selected
    pub fn clear_selection(&mut self) {
        self.sounding.flags &= !SELECTED;
    }
}

/// The depth written in place of an out-of-range sounding
pub fn null_depth(max_depth: f64) -> f64 {
    max_depth + 1.0
}

/// A sounding as it is kept inside a store
#[derive(Debug, Clone, PartialEq)]
pub struct StoredSounding {
    pub coord: BinCoord,
    pub latitude: f64,
    pub longitude: f64,
    pub depth: f32,
    pub horizontal_error: f32,
    pub vertical_error: f32,
    pub flags: u32,
    pub file_number: i16,
    pub line_number: i32,
    pub ping_number: i32,
    pub beam_number: i32,
    pub timestamp: (i64, u32),
    pub attributes: [f32; MAX_ATTRIBUTES],
}

impl StoredSounding {
    pub fn is_valid(&self) -> bool {
        self.flags & INVALID_MASK == 0
    }
}

impl From<&TransferRecord> for StoredSounding {
    fn from(record: &TransferRecord) -> Self {
        let s = &record.sounding;
        Self {
            coord: record.coord,
            latitude: s.latitude,
            longitude: s.longitude,
            depth: s.depth as f32,
            horizontal_error: s.horizontal_error,
            vertical_error: s.vertical_error,
            flags: s.flags,
            file_number: record.file_number,
            line_number: record.line_number,
            ping_number: record.ping_number,
            beam_number: s.beam_number,
            timestamp: s.timestamp,
            attributes: s.attributes,
        }
    }
}
