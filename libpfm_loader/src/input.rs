use fxhash::FxHashSet;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use super::decoder::FormatTag;
use super::error::StoreError;
use super::store::PfmStore;

/// Result of the precheck of one input file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Ready,
    Missing,
    UnknownFormat,
    /// Listed more than once in this load
    Duplicate,
    /// Already in the destination's file list
    AlreadyLoaded,
}

impl Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            Self::Ready => "ready",
            Self::Missing => "file does not exist",
            Self::UnknownFormat => "unrecognized format",
            Self::Duplicate => "listed more than once",
            Self::AlreadyLoaded => "already loaded in the destination",
        };
        write!(f, "{reason}")
    }
}

/// An input file as the readers see it
#[derive(Debug, Clone, PartialEq)]
pub struct FileDescriptor {
    /// Position in the input list
    pub index: usize,
    pub path: PathBuf,
    pub format: Option<FormatTag>,
    pub status: FileStatus,
}

impl FileDescriptor {
    pub fn is_ready(&self) -> bool {
        self.status == FileStatus::Ready
    }
}

/// Check every input before the load starts.
///
/// Files that are missing, have no decoder, appear twice, or are already in the
/// destination are marked and later skipped by the readers.
pub fn precheck(paths: &[PathBuf], store: &PfmStore) -> Result<Vec<FileDescriptor>, StoreError> {
    let mut seen: FxHashSet<&Path> = FxHashSet::default();
    let mut files = Vec::with_capacity(paths.len());
    for (index, path) in paths.iter().enumerate() {
        let format = FormatTag::from_path(path);
        let status = if !path.exists() {
            FileStatus::Missing
        } else if format.is_none() {
            FileStatus::UnknownFormat
        } else if !seen.insert(path.as_path()) {
            FileStatus::Duplicate
        } else if store.contains_file(path)? {
            FileStatus::AlreadyLoaded
        } else {
            FileStatus::Ready
        };
        if status != FileStatus::Ready {
            spdlog::warn!("Skipping {}: {}", path.to_string_lossy(), status);
        }
        files.push(FileDescriptor {
            index,
            path: path.clone(),
            format,
            status,
        });
    }
    Ok(files)
}

/// Divide the input list into contiguous, roughly equal shares (per reader)
pub fn split_shares(files: &[FileDescriptor], n_workers: usize) -> Vec<Vec<FileDescriptor>> {
    let n_workers = n_workers.max(1);
    let base = files.len() / n_workers;
    let extra = files.len() % n_workers;

    let mut shares = Vec::with_capacity(n_workers);
    let mut start = 0;
    for worker in 0..n_workers {
        let len = base + usize::from(worker < extra);
        shares.push(files[start..start + len].to_vec());
        start += len;
    }
    shares
}
