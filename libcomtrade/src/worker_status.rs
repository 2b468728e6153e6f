/// Phase of the merge a status update belongs to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Stage {
    #[default]
    Loading,
    Merging,
    Computing,
}

#[derive(Debug, Clone, Default)]
pub struct WorkerStatus {
    pub progress: f32,
    pub group_index: usize,
    pub worker_id: usize,
    pub stage: Stage,
}

impl WorkerStatus {
    pub fn new(progress: f32, group_index: usize, worker_id: usize, stage: Stage) -> Self {
        Self {
            progress,
            group_index,
            worker_id,
            stage,
        }
    }
}
