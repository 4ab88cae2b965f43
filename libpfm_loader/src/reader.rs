use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;

use super::channel::TileSender;
use super::constants::{
    LINE_BREAK_MAX_HEADING_CHANGE, LINE_BREAK_MIN_HEADING_CHANGE, LOCAL_NULL_PLACEHOLDER,
    PROGRESS_RECORD_STRIDE, REFERENCE,
};
use super::decoder::SoundingSource;
use super::error::ReaderError;
use super::grid::GridHeader;
use super::input::FileDescriptor;
use super::partition::{locate_tile, SpatialTile};
use super::sounding::{RawSounding, TransferRecord};
use super::store::PfmStore;
use super::worker_status::{LoadPhase, WorkerStatus};

/// Everything the readers share, all of it read-only apart from the store's counters and
/// the abort flag.
#[derive(Debug, Clone, Copy)]
pub struct ReaderShared<'a> {
    pub grid: &'a GridHeader,
    pub tiles: &'a [SpatialTile],
    pub store: &'a PfmStore,
    pub abort: &'a AtomicBool,
    pub reference: bool,
}

/// Per-worker decode state, replacing any cross-call globals
#[derive(Debug, Clone, Default)]
pub struct ReaderContext {
    pub worker_id: usize,
    pub file_number: i16,
    pub line_number: i32,
    pub ping_number: i32,
    last_heading: Option<f64>,
    lines_in_file: u32,
}

impl ReaderContext {
    pub fn new(worker_id: usize) -> Self {
        Self {
            worker_id,
            ..Default::default()
        }
    }

    /// Reset the per-file state for a newly numbered file
    pub fn start_file(&mut self, file_number: i16, line_number: i32) {
        self.file_number = file_number;
        self.line_number = line_number;
        self.ping_number = 0;
        self.last_heading = None;
        self.lines_in_file = 1;
    }

    /// Feed a heading; true if it starts a new survey line.
    ///
    /// A line breaks when the heading changes by more than 120 and less than 345 degrees
    /// from the previous sounding (the upper limit keeps 359 -> 1 from counting).
    pub fn is_line_break(&mut self, heading: f64) -> bool {
        let is_break = match self.last_heading {
            Some(last) => {
                let change = (heading - last).abs();
                change > LINE_BREAK_MIN_HEADING_CHANGE && change < LINE_BREAK_MAX_HEADING_CHANGE
            }
            None => false,
        };
        self.last_heading = Some(heading);
        is_break
    }
}

/// What happened to one file of a reader's share
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FileReport {
    pub index: usize,
    pub path: PathBuf,
    pub file_number: Option<i16>,
    pub lines: u32,
    pub read: u64,
    pub routed: u64,
    /// Soundings outside the survey polygon
    pub dropped: u64,
    pub record_errors: u64,
    /// Why the file could not be loaded (or stopped early)
    pub failure: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ReaderReport {
    pub worker_id: usize,
    pub files: Vec<FileReport>,
    pub aborted: bool,
}

/// A producer: decodes its share of the input files and routes every sounding to the
/// channel of the tile that owns its bin.
pub struct ReaderWorker<'a> {
    context: ReaderContext,
    shared: ReaderShared<'a>,
    senders: Vec<TileSender>,
    tx: Sender<WorkerStatus>,
}

impl<'a> ReaderWorker<'a> {
    /// Create a reader. `senders` must be in tile index order
    pub fn new(
        worker_id: usize,
        shared: ReaderShared<'a>,
        senders: Vec<TileSender>,
        tx: Sender<WorkerStatus>,
    ) -> Self {
        Self {
            context: ReaderContext::new(worker_id),
            shared,
            senders,
            tx,
        }
    }

    /// Process a share of files, then mark this reader done.
    ///
    /// The reader's senders are dropped on return, which is how the writers learn that
    /// this producer is finished.
    pub fn run(
        mut self,
        share: &[FileDescriptor],
        done: &AtomicBool,
    ) -> Result<ReaderReport, ReaderError> {
        let result = self.process_share(share);
        done.store(true, Ordering::Release);
        if result.is_err() {
            self.shared.abort.store(true, Ordering::Release);
        }
        result
    }

    fn process_share(&mut self, share: &[FileDescriptor]) -> Result<ReaderReport, ReaderError> {
        let worker_id = self.context.worker_id;
        let mut report = ReaderReport {
            worker_id,
            ..Default::default()
        };
        let n_files = share.len().max(1) as f32;

        for (position, file) in share.iter().enumerate() {
            if self.is_aborted() {
                spdlog::warn!("Reader {worker_id} stopping early; the load was aborted");
                report.aborted = true;
                break;
            }
            if !file.is_ready() {
                continue;
            }
            self.tx.send(WorkerStatus::new(
                position as f32 / n_files,
                file.index,
                worker_id,
                LoadPhase::Reading,
            ))?;
            let file_report = self.process_file(file, position as f32 / n_files, n_files)?;
            report.files.push(file_report);
        }

        if let Some(last) = share.last() {
            self.tx.send(WorkerStatus::new(
                1.0,
                last.index,
                worker_id,
                LoadPhase::Reading,
            ))?;
        }
        Ok(report)
    }

    fn process_file(
        &mut self,
        file: &FileDescriptor,
        base_progress: f32,
        n_files: f32,
    ) -> Result<FileReport, ReaderError> {
        let worker_id = self.context.worker_id;
        let mut report = FileReport {
            index: file.index,
            path: file.path.clone(),
            ..Default::default()
        };

        let Some(format) = file.format else {
            report.failure = Some(String::from("unrecognized format"));
            return Ok(report);
        };
        let mut source: Box<dyn SoundingSource> = match format.open(&file.path) {
            Ok(source) => source,
            Err(e) => {
                spdlog::error!(
                    "Reader {worker_id} could not open {}: {e}; skipping it",
                    file.path.to_string_lossy()
                );
                report.failure = Some(e.to_string());
                return Ok(report);
            }
        };
        spdlog::info!(
            "Reader {worker_id} loading {} ({}, {})",
            file.path.to_string_lossy(),
            format,
            human_bytes::human_bytes(source.size_bytes() as f64)
        );

        let store = self.shared.store;
        let file_number = store
            .register_file(&file.path, format)
            .map_err(|e| ReaderError::StoreError(worker_id, e))?;
        let line_number = store
            .register_line(file_number, &self.line_name(file, 1))
            .map_err(|e| ReaderError::StoreError(worker_id, e))?;
        self.context.start_file(file_number, line_number);
        report.file_number = Some(file_number);

        loop {
            if self.is_aborted() {
                report.failure = Some(String::from("load aborted"));
                break;
            }
            match source.next_record() {
                Ok(Some(raw)) => {
                    report.read += 1;
                    self.route(raw, file, &mut report)?;
                }
                Ok(None) => break,
                Err(e) if e.is_skippable() => {
                    spdlog::warn!(
                        "Reader {worker_id} skipping record in {}: {e}",
                        file.path.to_string_lossy()
                    );
                    report.record_errors += 1;
                }
                Err(e) => {
                    spdlog::error!(
                        "Reader {worker_id} stopped reading {}: {e}",
                        file.path.to_string_lossy()
                    );
                    report.failure = Some(e.to_string());
                    break;
                }
            }

            if report.read > 0 && report.read % PROGRESS_RECORD_STRIDE == 0 {
                // Unknown record count, so creep towards the end of this file's slice
                let within = 1.0 - 1.0 / (1.0 + (report.read / PROGRESS_RECORD_STRIDE) as f32);
                self.tx.send(WorkerStatus::new(
                    base_progress + within / n_files,
                    file.index,
                    worker_id,
                    LoadPhase::Reading,
                ))?;
            }
        }
        report.lines = self.context.lines_in_file;

        spdlog::info!(
            "Reader {worker_id} finished {}: {} read, {} routed, {} outside the area, {} bad records",
            file.path.to_string_lossy(),
            report.read,
            report.routed,
            report.dropped,
            report.record_errors
        );
        Ok(report)
    }

    /// Turn a raw sounding into a transfer record and hand it to its tile
    fn route(
        &mut self,
        raw: RawSounding,
        file: &FileDescriptor,
        report: &mut FileReport,
    ) -> Result<(), ReaderError> {
        if let Some(heading) = raw.heading {
            if self.context.is_line_break(heading) {
                let worker_id = self.context.worker_id;
                self.context.lines_in_file += 1;
                let name = self.line_name(file, self.context.lines_in_file);
                let line_number = self
                    .shared
                    .store
                    .register_line(self.context.file_number, &name)
                    .map_err(|e| ReaderError::StoreError(worker_id, e))?;
                self.context.line_number = line_number;
            }
        }
        self.context.ping_number += 1;

        let grid = self.shared.grid;
        if !grid.contains(raw.latitude, raw.longitude) {
            report.dropped += 1;
            return Ok(());
        }
        let Some(coord) = grid.bin_coord(raw.latitude, raw.longitude) else {
            report.dropped += 1;
            return Ok(());
        };
        let Some(tile) = locate_tile(&coord, self.shared.tiles) else {
            report.dropped += 1;
            return Ok(());
        };

        let local_flags = if raw.null_placeholder {
            LOCAL_NULL_PLACEHOLDER
        } else {
            0
        };
        let mut record = TransferRecord {
            sounding: raw,
            file_number: self.context.file_number,
            line_number: self.context.line_number,
            ping_number: self.context.ping_number,
            coord,
            local_flags,
        };
        if self.shared.reference {
            record.sounding.flags |= REFERENCE;
        }

        match self.senders.get(tile) {
            Some(sender) => {
                if sender.send(record).is_err() {
                    spdlog::error!(
                        "Reader {} lost the writer for tile {tile}; aborting the load",
                        self.context.worker_id
                    );
                    self.shared.abort.store(true, Ordering::Release);
                } else {
                    report.routed += 1;
                }
            }
            None => report.dropped += 1,
        }
        Ok(())
    }

    fn line_name(&self, file: &FileDescriptor, line: u32) -> String {
        let stem = file
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        format!("{stem} line {line}")
    }

    fn is_aborted(&self) -> bool {
        self.shared.abort.load(Ordering::Acquire)
    }
}
