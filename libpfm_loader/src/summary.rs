use std::fmt::Display;
use std::path::PathBuf;
use time::{Duration, OffsetDateTime};

use super::filter::FilterStats;
use super::input::FileDescriptor;
use super::merge::MergeReport;
use super::reader::ReaderReport;
use super::writer::TileReport;

/// An input that contributed nothing (or less than all of itself) to the destination
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

/// Per destination output totals. A load has a single destination today, but the
/// summary keeps them keyed so the report reads the same either way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DestinationTotals {
    pub path: PathBuf,
    pub loaded: u64,
    pub out_of_range: u64,
    pub data_read_errors: u64,
}

/// What one tile writer stored
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TileTotals {
    pub tile: usize,
    pub loaded: u64,
    pub out_of_range: u64,
    pub data_read_errors: u64,
}

/// The end of load report
#[derive(Debug, Clone)]
pub struct LoadSummary {
    pub files_attempted: usize,
    pub files_loaded: usize,
    pub skipped: Vec<SkippedFile>,
    /// Files that were registered but stopped before their end
    pub incomplete: Vec<SkippedFile>,
    pub records_read: u64,
    pub record_errors: u64,
    /// Soundings outside the survey area
    pub records_dropped: u64,
    pub destinations: Vec<DestinationTotals>,
    /// One entry per tile writer, in tile order
    pub tiles: Vec<TileTotals>,
    pub recomputed_bins: u64,
    pub filter: Option<FilterStats>,
    pub min_depth: Option<f64>,
    pub max_depth: Option<f64>,
    pub started: OffsetDateTime,
    pub elapsed: Duration,
}

impl LoadSummary {
    pub fn new(destination: PathBuf, started: OffsetDateTime) -> Self {
        Self {
            files_attempted: 0,
            files_loaded: 0,
            skipped: vec![],
            incomplete: vec![],
            records_read: 0,
            record_errors: 0,
            records_dropped: 0,
            destinations: vec![DestinationTotals {
                path: destination,
                ..Default::default()
            }],
            tiles: vec![],
            recomputed_bins: 0,
            filter: None,
            min_depth: None,
            max_depth: None,
            started,
            elapsed: Duration::ZERO,
        }
    }

    /// Count the inputs and note every file rejected before the readers started
    pub fn add_precheck(&mut self, files: &[FileDescriptor]) {
        self.files_attempted += files.len();
        self.skipped.extend(files.iter().filter(|f| !f.is_ready()).map(|f| SkippedFile {
            path: f.path.clone(),
            reason: f.status.to_string(),
        }));
    }

    pub fn add_reader(&mut self, report: &ReaderReport) {
        for file in report.files.iter() {
            self.records_read += file.read;
            self.record_errors += file.record_errors;
            self.records_dropped += file.dropped;
            match (file.file_number, &file.failure) {
                (None, failure) => self.skipped.push(SkippedFile {
                    path: file.path.clone(),
                    reason: failure.clone().unwrap_or_default(),
                }),
                (Some(_), Some(failure)) => {
                    self.files_loaded += 1;
                    self.incomplete.push(SkippedFile {
                        path: file.path.clone(),
                        reason: failure.clone(),
                    });
                }
                (Some(_), None) => self.files_loaded += 1,
            }
        }
    }

    pub fn add_tile(&mut self, report: &TileReport) {
        self.tiles.push(TileTotals {
            tile: report.tile,
            loaded: report.out_count,
            out_of_range: report.out_of_range_count,
            data_read_errors: report.data_read_errors,
        });
        if let Some(totals) = self.destinations.first_mut() {
            totals.loaded += report.out_count;
            totals.out_of_range += report.out_of_range_count;
            totals.data_read_errors += report.data_read_errors;
        }
    }

    pub fn add_merge(&mut self, report: &MergeReport) {
        if let Some(totals) = self.destinations.first_mut() {
            totals.data_read_errors += report.data_read_errors;
        }
        self.recomputed_bins = report.recomputed_bins;
        self.filter = report.filter;
        self.min_depth = report.min_depth;
        self.max_depth = report.max_depth;
    }

    pub fn finish(&mut self) {
        self.elapsed = OffsetDateTime::now_utc() - self.started;
    }

    pub fn total_loaded(&self) -> u64 {
        self.destinations.iter().map(|d| d.loaded).sum()
    }

    pub fn total_out_of_range(&self) -> u64 {
        self.destinations.iter().map(|d| d.out_of_range).sum()
    }
}

impl Display for LoadSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Load started {} took {}", self.started, self.elapsed)?;
        writeln!(
            f,
            "Files: {} attempted, {} loaded, {} skipped",
            self.files_attempted,
            self.files_loaded,
            self.skipped.len()
        )?;
        for skip in self.skipped.iter() {
            writeln!(f, "  skipped {}: {}", skip.path.to_string_lossy(), skip.reason)?;
        }
        for partial in self.incomplete.iter() {
            writeln!(
                f,
                "  incomplete {}: {}",
                partial.path.to_string_lossy(),
                partial.reason
            )?;
        }
        writeln!(
            f,
            "Records: {} read, {} bad, {} outside the area",
            self.records_read, self.record_errors, self.records_dropped
        )?;
        for dest in self.destinations.iter() {
            writeln!(
                f,
                "{}: {} loaded, {} out of depth range, {} data read errors",
                dest.path.to_string_lossy(),
                dest.loaded,
                dest.out_of_range,
                dest.data_read_errors
            )?;
        }
        for tile in self.tiles.iter() {
            writeln!(
                f,
                "  tile {}: {} loaded, {} out of depth range",
                tile.tile, tile.loaded, tile.out_of_range
            )?;
        }
        if let Some(stats) = &self.filter {
            writeln!(
                f,
                "Area filter: {} good ({:.2}%), {} bad ({:.2}%), {} bins protected",
                stats.good,
                stats.good_percent(),
                stats.bad,
                stats.bad_percent(),
                stats.protected_bins
            )?;
        }
        match (self.min_depth, self.max_depth) {
            (Some(min), Some(max)) => write!(
                f,
                "{} bins recomputed, depth range {min:.2} to {max:.2}",
                self.recomputed_bins
            ),
            _ => write!(
                f,
                "{} bins recomputed, no valid soundings",
                self.recomputed_bins
            ),
        }
    }
}
