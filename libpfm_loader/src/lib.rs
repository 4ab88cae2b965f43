//! # pfm_loader
//!
//! pfm_loader loads bathymetric soundings (depth measurements) from survey files into a
//! binned sounding store, written in Rust. The survey area is a grid of square bins;
//! every sounding lands in the bin holding its position, and each bin keeps statistics
//! (valid count, min, max, mean and standard deviation of depth) over its valid
//! soundings.
//!
//! Loading is parallel. Input files are split between reader threads, the grid is split
//! into rectangular tiles, and each tile gets a writer thread fed through a bounded
//! channel. Writers fill per-tile partial stores which are merged into the destination
//! once every reader is done. Only the bins touched by the load are recomputed.
//!
//! ```text
//!   reader 0 --+--> [tile 0 channel] --> writer 0 --> partial store 0 --+
//!   reader 1 --+--> [tile 1 channel] --> writer 1 --> partial store 1 --+--> merge --> destination
//!   ...        +--> ...                                                 |    (dirty bins recomputed)
//! ```
//!
//! ## Installation
//!
//! Currently the only method of install is from source. If you have not used Rust before,
//! see the [Rust docs](https://www.rust-lang.org/tools/install) for toolchain install
//! instructions.
//!
//! To build and install the CLI use `cargo install --path ./pfm_loader_cli` from the top
//! level repository. It can be uninstalled with `cargo uninstall pfm_loader_cli`.
//!
//! ## Input formats
//!
//! - ASCII XYZ (`.xyz`, `.yxz`, `.txt`, `.llz.txt`): one sounding per line as
//! `latitude longitude depth [heading [beam]]`, separated by whitespace or commas. Lines
//! starting with `#` are comments.
//! - LLZ (`.llz`): a little-endian binary format with a small header and fixed size
//! records carrying position, depth, time and a status word.
//!
//! Files that do not exist, have an unknown extension, are listed twice, or were loaded
//! into the destination on a previous run are skipped with a warning.
//!
//! ## Configuration
//!
//! Loads are configured through a YAML file. A template can be made with
//! `pfm_loader_cli new -p config.yml`. The format is as follows:
//!
//! ```yml
//! destination: /data/survey.pfm
//! input_files:
//! - /data/lines/line_001.xyz
//! - /data/lines/line_002.llz
//! min_latitude: 30.0
//! max_latitude: 30.05
//! min_longitude: -88.1
//! max_longitude: -88.0
//! polygon: []
//! bin_size_meters: 2.0
//! min_depth: -10.0
//! max_depth: 1000.0
//! reader_threads: 4
//! tile_count: 4
//! buffer_size: 10000
//! cache_size: 1000000
//! reference: false
//! area_filter: null
//! scratch_path: null
//! ```
//!
//! - `polygon`: optional survey area as `[latitude, longitude]` vertices; soundings
//! outside it are dropped. When empty the rectangle is used.
//! - `min_depth`/`max_depth`: soundings outside this range are kept but flagged invalid,
//! with their depth replaced by the null depth (`max_depth + 1`).
//! - `tile_count`: number of writer threads. Must be a power of two.
//! - `buffer_size`: capacity of each tile channel, in soundings.
//! - `cache_size`: soundings a tile writer holds in memory before spilling its partial
//! store to disk.
//! - `reference`: load everything as reference data, which is excluded from bin
//! statistics.
//! - `area_filter`: optional statistical outlier filter run over the recomputed bins,
//! with `std_dev_multiplier`, `feature_radius_meters` and `features` (positions that
//! protect nearby bins from filtering).
//! - `scratch_path`: where the per-tile partial stores go. Defaults to the destination's
//! directory.
//!
//! If the destination already exists the load appends to it, as long as the grid matches.
//!
//! ## Output
//!
//! pfm_loader outputs the store and a log file (`pfm_loader.log`). A store is a YAML
//! index plus a binary data directory:
//!
//! ```text
//! survey.pfm           - version, grid header, input file list, line list, depth range
//! survey.pfm.data/
//! |---- soundings.dat  - every sounding (position, depth, errors, flags, file/line/ping)
//! |                      followed by the statistics of every recomputed bin
//! |---- soundings.spill - partial stores only, soundings flushed from the cache while
//! |                      loading; folded into soundings.dat on close
//! ```
pub mod channel;
pub mod config;
pub mod constants;
pub mod decoder;
pub mod dirty_map;
pub mod error;
pub mod filter;
pub mod grid;
pub mod input;
pub mod llz_file;
pub mod loader;
pub mod merge;
pub mod partition;
pub mod reader;
pub mod sounding;
pub mod store;
pub mod summary;
pub mod worker_status;
pub mod writer;
pub mod xyz_file;
