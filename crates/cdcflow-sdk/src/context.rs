//! Per-subtask runtime context handed to readers and writers.

use cdcflow_types::ChunkDescriptor;

/// Identity and workload of one parallel instance of a stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskContext {
    pub pipeline_name: String,
    /// Logical uid of the owning stage.
    pub stage_uid: String,
    pub index: u32,
    pub parallelism: u32,
    /// Snapshot chunks assigned to this subtask. Always empty for sinks.
    pub chunks: Vec<ChunkDescriptor>,
}

impl SubtaskContext {
    #[must_use]
    pub fn new(
        pipeline_name: impl Into<String>,
        stage_uid: impl Into<String>,
        index: u32,
        parallelism: u32,
    ) -> Self {
        Self {
            pipeline_name: pipeline_name.into(),
            stage_uid: stage_uid.into(),
            index,
            parallelism,
            chunks: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_chunks(mut self, chunks: Vec<ChunkDescriptor>) -> Self {
        self.chunks = chunks;
        self
    }

    /// Whether this is the first subtask of its stage. Work that must
    /// happen exactly once per stage is done here.
    #[must_use]
    pub fn is_leader(&self) -> bool {
        self.index == 0
    }
}

impl std::fmt::Display for SubtaskContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}/{})", self.stage_uid, self.index + 1, self.parallelism)
    }
}
