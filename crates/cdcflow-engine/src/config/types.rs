//! Pipeline definition model.

use cdcflow_types::Configuration;

/// One source connector block.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceDef {
    /// Factory identifier, e.g. `values`.
    pub type_id: String,
    pub name: Option<String>,
    pub options: Configuration,
}

/// One sink connector block.
#[derive(Debug, Clone, PartialEq)]
pub struct SinkDef {
    pub type_id: String,
    pub name: Option<String>,
    pub options: Configuration,
}

/// Declarative pipeline: one source, one sink, pipeline-wide options.
///
/// Pipeline option keys carry their full `pipeline.` prefix.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineDefinition {
    pub source: SourceDef,
    pub sink: SinkDef,
    pub config: Configuration,
}

impl SourceDef {
    #[must_use]
    pub fn new(type_id: impl Into<String>, options: Configuration) -> Self {
        Self {
            type_id: type_id.into(),
            name: None,
            options,
        }
    }

    /// Display name, falling back to the type identifier.
    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.type_id)
    }
}

impl SinkDef {
    #[must_use]
    pub fn new(type_id: impl Into<String>, options: Configuration) -> Self {
        Self {
            type_id: type_id.into(),
            name: None,
            options,
        }
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.type_id)
    }
}

impl PipelineDefinition {
    #[must_use]
    pub fn new(source: SourceDef, sink: SinkDef, config: Configuration) -> Self {
        Self {
            source,
            sink,
            config,
        }
    }
}
