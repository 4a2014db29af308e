//! Pipeline error model.

use cdcflow_sdk::factory::FactoryError;
use cdcflow_sdk::splitter::SplitError;
use cdcflow_types::{ConfigError, ConnectorError, TableId};

// ---------------------------------------------------------------------------
// PipelineError
// ---------------------------------------------------------------------------

/// Errors raised while composing or executing a pipeline.
///
/// Composition-time variants (`Configuration`, `DuplicateOperatorId`,
/// `InvalidParallelism`) mean no stage was started. Runtime variants
/// terminate the job; none of them is retried by the engine.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("collection '{table}' cannot be split: {reason}")]
    UnsplittableCollection { table: TableId, reason: String },

    #[error("operator id {id} is shared by stages '{first}' and '{second}'")]
    DuplicateOperatorId {
        id: String,
        first: String,
        second: String,
    },

    #[error("invalid parallelism {value} for {stage}: must be at least 1")]
    InvalidParallelism { stage: String, value: i64 },

    #[error("schema change rejected for '{table}' ({kind}) by the EXCEPTION behavior")]
    SchemaChangeRejected { table: TableId, kind: String },

    #[error("sink failed to apply schema change to '{table}': {source}")]
    SinkApply {
        table: TableId,
        #[source]
        source: ConnectorError,
    },

    /// Typed error raised by a source or sink connector.
    #[error(transparent)]
    Connector(ConnectorError),

    /// Substrate failure: task panic, closed channel, etc.
    #[error(transparent)]
    Infrastructure(anyhow::Error),
}

impl From<anyhow::Error> for PipelineError {
    fn from(e: anyhow::Error) -> Self {
        Self::Infrastructure(e)
    }
}

impl From<ConnectorError> for PipelineError {
    fn from(e: ConnectorError) -> Self {
        Self::Connector(e)
    }
}

impl From<ConfigError> for PipelineError {
    fn from(e: ConfigError) -> Self {
        Self::Configuration(e.to_string())
    }
}

impl From<FactoryError> for PipelineError {
    fn from(e: FactoryError) -> Self {
        match e {
            FactoryError::Connector(inner) => Self::Connector(inner),
            other => Self::Configuration(other.to_string()),
        }
    }
}

impl From<SplitError> for PipelineError {
    fn from(e: SplitError) -> Self {
        match e {
            SplitError::Unsplittable { table, reason } => {
                Self::UnsplittableCollection { table, reason }
            }
            SplitError::InvalidChunkSize { .. } => Self::Configuration(e.to_string()),
            SplitError::Sampling(inner) => Self::Connector(inner),
        }
    }
}

impl PipelineError {
    /// Whether the failure happened before any stage was started.
    #[must_use]
    pub fn is_composition_error(&self) -> bool {
        matches!(
            self,
            Self::Configuration(_) | Self::DuplicateOperatorId { .. } | Self::InvalidParallelism { .. }
        )
    }

    /// Returns the typed connector error behind this failure, if any.
    #[must_use]
    pub fn as_connector_error(&self) -> Option<&ConnectorError> {
        match self {
            Self::Connector(e) | Self::SinkApply { source: e, .. } => Some(e),
            _ => None,
        }
    }
}
