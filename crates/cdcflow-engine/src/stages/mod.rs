//! Stage definitions and their per-subtask run loops.
//!
//! Source and sink subtasks call blocking connector code and run on the
//! blocking pool, talking to the async stages through bounded channels.
//! Coordinator and partitioner subtasks are plain async tasks.

pub mod coordinator;
pub mod partitioner;
pub mod sink;
pub mod source;

/// Which stage a subtask belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Source,
    SchemaCoordinator,
    Partitioner,
    Sink,
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::SchemaCoordinator => "schema coordinator",
            Self::Partitioner => "partitioner",
            Self::Sink => "sink",
        })
    }
}

/// Outcome of one finished subtask.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtaskReport {
    pub stage: StageKind,
    pub index: u32,
    /// Events this subtask handed downstream (or wrote, for sinks).
    pub events: u64,
}

impl SubtaskReport {
    #[must_use]
    pub fn new(stage: StageKind, index: u32, events: u64) -> Self {
        Self {
            stage,
            index,
            events,
        }
    }
}
