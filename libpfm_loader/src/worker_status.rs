/// Which stage of a load a status message comes from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LoadPhase {
    #[default]
    Reading,
    Writing,
    Merging,
}

/// Progress report sent from the workers to whoever drives the load (the CLI).
///
/// `progress` is the fraction (0.0 to 1.0) of this worker's share that is complete.
/// `file_index` is the index into the input list of the file being worked on; during the
/// merge it is the tile index instead. Writing statuses report the fill level of a tile's
/// channel, with both `worker_id` and `file_index` set to the tile index.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub file_index: usize,
    pub worker_id: usize,
    pub phase: LoadPhase,
}

impl WorkerStatus {
    pub fn new(progress: f32, file_index: usize, worker_id: usize, phase: LoadPhase) -> Self {
        Self {
            progress,
            file_index,
            worker_id,
            phase,
        }
    }

    pub fn percent_complete(&self) -> f32 {
        (self.progress * 100.0).clamp(0.0, 100.0)
    }
}
