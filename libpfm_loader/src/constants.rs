// Validity flag bits carried by every sounding, both in flight and in a store.
pub const MANUALLY_INVALID: u32 = 0x0001;
pub const FILTER_INVALID: u32 = 0x0002;
pub const SELECTED: u32 = 0x0004;
pub const MODIFIED: u32 = 0x0008;
pub const CHECKED: u32 = 0x0010;
pub const VERIFIED: u32 = 0x0020;
pub const REFERENCE: u32 = 0x0040;

/// Any of these bits means the sounding does not contribute to bin statistics
pub const INVALID_MASK: u32 = MANUALLY_INVALID | FILTER_INVALID;

// Local (in-flight only) flag bits of a TransferRecord
/// A no-bottom-return placeholder that must stay distinguishable from filtered data
pub const LOCAL_NULL_PLACEHOLDER: u8 = 0x01;

/// Maximum number of optional attributes a sounding carries
pub const MAX_ATTRIBUTES: usize = 10;

/// Default number of records a tile channel holds before producers block
pub const BUFFER_SIZE: usize = 10_000;
/// Default number of soundings a partial store holds in memory before spilling to disk
pub const CACHE_SIZE: usize = 1_000_000;
pub const DEFAULT_READER_THREADS: usize = 4;
pub const DEFAULT_TILE_COUNT: usize = 4;

// Heading change window (degrees) that starts a new survey line
pub const LINE_BREAK_MIN_HEADING_CHANGE: f64 = 120.0;
pub const LINE_BREAK_MAX_HEADING_CHANGE: f64 = 345.0;

/// Largest grid (rows x cols) a load accepts; the dirty map holds one bit per bin
pub const MAX_BIN_COUNT: u64 = 1 << 30;

/// One nautical mile per minute of latitude
pub const METERS_PER_DEGREE: f64 = 111_120.0;

/// The orchestrator sleeps this long between progress polls
pub const POLL_INTERVAL_MS: u64 = 50;

/// Readers report progress at most this often (in records) within one file
pub const PROGRESS_RECORD_STRIDE: u64 = 10_000;

/// Fewest valid soundings in a bin before the area filter will judge it
pub const MIN_FILTER_COUNT: usize = 3;

/// Version of the on-disk store layout
pub const STORE_FORMAT_VERSION: &str = "1.0";
/// Magic leading the binary sounding data file of a store
pub const STORE_DATA_MAGIC: u32 = 0x5046_4d44; // "PFMD"
pub const STORE_DATA_FILE: &str = "soundings.dat";
/// Soundings flushed out of a partial store's cache, folded into the data file on close
pub const STORE_SPILL_FILE: &str = "soundings.spill";
pub const STORE_DATA_DIR_SUFFIX: &str = "data";
/// Largest file number a store can hand out
pub const MAX_FILE_NUMBER: i16 = i16::MAX;

/// Magic + version leading an LLZ file
pub const LLZ_MAGIC: &[u8; 4] = b"LLZ1";
pub const LLZ_VERSION: u32 = 1;
pub const LLZ_STATUS_INVALID: u16 = 0x0001;
pub const LLZ_STATUS_NULL: u16 = 0x0002;
