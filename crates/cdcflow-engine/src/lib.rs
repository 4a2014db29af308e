//! Pipeline composition, schema change coordination and local execution
//! for cdcflow.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod composer;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod execution;
pub mod identity;
pub mod options;
pub mod partitioner;
pub mod stages;

// Re-export public API for convenience
pub use composer::PipelineComposer;
pub use config::parser::{parse_pipeline, parse_pipeline_str};
pub use config::types::{PipelineDefinition, SinkDef, SourceDef};
pub use config::validator::validate_pipeline;
pub use coordinator::{CoordinatorStats, SchemaRegistry};
pub use errors::PipelineError;
pub use execution::{ExecutionOutcome, ExecutionSummary, JobHandle, PipelineExecution};
pub use identity::{OperatorId, OperatorIdGenerator};
