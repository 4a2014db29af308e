//! Connector factories and the identifier-keyed registry.
//!
//! Factories are registered explicitly at process start; the composer
//! resolves a definition's `type` identifier through the
//! [`FactoryRegistry`] and validates declared options before creating
//! the connector.

use std::collections::BTreeMap;
use std::sync::Arc;

use cdcflow_types::{ConfigError, Configuration, ConnectorError, OptionSpec};

use crate::connector::{DataSink, DataSource};

/// Which side of the pipeline a factory serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FactoryKind {
    Source,
    Sink,
}

impl std::fmt::Display for FactoryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Source => "source",
            Self::Sink => "sink",
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error("no {kind} factory registered for '{identifier}' (available: {available})")]
    UnknownIdentifier {
        kind: FactoryKind,
        identifier: String,
        available: String,
    },

    #[error("{kind} factory '{identifier}' is already registered")]
    DuplicateIdentifier {
        kind: FactoryKind,
        identifier: String,
    },

    #[error("invalid options for {kind} '{identifier}':\n  - {}", .problems.join("\n  - "))]
    InvalidOptions {
        kind: FactoryKind,
        identifier: String,
        problems: Vec<String>,
    },

    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

/// Everything a factory may consult while creating a connector.
pub struct FactoryContext<'a> {
    /// Options of this connector's definition block.
    pub options: &'a Configuration,
    /// Pipeline-wide options.
    pub pipeline: &'a Configuration,
    pub registry: &'a FactoryRegistry,
}

impl FactoryContext<'_> {
    /// Connector options rendered as plain strings.
    #[must_use]
    pub fn raw_options(&self) -> BTreeMap<String, String> {
        self.options.to_string_map()
    }
}

pub trait DataSourceFactory: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn required_options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn optional_options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the options don't describe a
    /// usable source.
    fn create_data_source(
        &self,
        ctx: &FactoryContext<'_>,
    ) -> Result<Arc<dyn DataSource>, ConnectorError>;
}

pub trait DataSinkFactory: Send + Sync {
    fn identifier(&self) -> &'static str;

    fn required_options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    fn optional_options(&self) -> Vec<OptionSpec> {
        Vec::new()
    }

    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the options don't describe a
    /// usable sink.
    fn create_data_sink(&self, ctx: &FactoryContext<'_>) -> Result<Arc<dyn DataSink>, ConnectorError>;
}

/// Identifier → factory mapping for sources and sinks.
#[derive(Default)]
pub struct FactoryRegistry {
    sources: BTreeMap<&'static str, Arc<dyn DataSourceFactory>>,
    sinks: BTreeMap<&'static str, Arc<dyn DataSinkFactory>>,
}

impl FactoryRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// [`FactoryError::DuplicateIdentifier`] if the identifier is taken.
    pub fn register_source(
        &mut self,
        factory: impl DataSourceFactory + 'static,
    ) -> Result<(), FactoryError> {
        let identifier = factory.identifier();
        if self.sources.contains_key(identifier) {
            return Err(FactoryError::DuplicateIdentifier {
                kind: FactoryKind::Source,
                identifier: identifier.to_string(),
            });
        }
        self.sources.insert(identifier, Arc::new(factory));
        Ok(())
    }

    /// # Errors
    ///
    /// [`FactoryError::DuplicateIdentifier`] if the identifier is taken.
    pub fn register_sink(
        &mut self,
        factory: impl DataSinkFactory + 'static,
    ) -> Result<(), FactoryError> {
        let identifier = factory.identifier();
        if self.sinks.contains_key(identifier) {
            return Err(FactoryError::DuplicateIdentifier {
                kind: FactoryKind::Sink,
                identifier: identifier.to_string(),
            });
        }
        self.sinks.insert(identifier, Arc::new(factory));
        Ok(())
    }

    pub fn source_identifiers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sources.keys().copied()
    }

    pub fn sink_identifiers(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.sinks.keys().copied()
    }

    /// # Errors
    ///
    /// [`FactoryError::UnknownIdentifier`] when nothing is registered
    /// under `identifier`.
    pub fn source_factory(&self, identifier: &str) -> Result<Arc<dyn DataSourceFactory>, FactoryError> {
        self.sources
            .get(identifier)
            .cloned()
            .ok_or_else(|| FactoryError::UnknownIdentifier {
                kind: FactoryKind::Source,
                identifier: identifier.to_string(),
                available: join_or_none(self.source_identifiers()),
            })
    }

    /// # Errors
    ///
    /// [`FactoryError::UnknownIdentifier`] when nothing is registered
    /// under `identifier`.
    pub fn sink_factory(&self, identifier: &str) -> Result<Arc<dyn DataSinkFactory>, FactoryError> {
        self.sinks
            .get(identifier)
            .cloned()
            .ok_or_else(|| FactoryError::UnknownIdentifier {
                kind: FactoryKind::Sink,
                identifier: identifier.to_string(),
                available: join_or_none(self.sink_identifiers()),
            })
    }

    /// Resolve, validate options, and create a source.
    ///
    /// # Errors
    ///
    /// Unknown identifier, invalid options (all problems reported
    /// together), or a connector error from the factory itself.
    pub fn create_source(
        &self,
        identifier: &str,
        options: &Configuration,
        pipeline: &Configuration,
    ) -> Result<Arc<dyn DataSource>, FactoryError> {
        let factory = self.source_factory(identifier)?;
        check_options(
            FactoryKind::Source,
            identifier,
            options,
            &factory.required_options(),
            &factory.optional_options(),
        )?;
        let ctx = FactoryContext {
            options,
            pipeline,
            registry: self,
        };
        Ok(factory.create_data_source(&ctx)?)
    }

    /// Resolve, validate options, and create a sink.
    ///
    /// # Errors
    ///
    /// Unknown identifier, invalid options (all problems reported
    /// together), or a connector error from the factory itself.
    pub fn create_sink(
        &self,
        identifier: &str,
        options: &Configuration,
        pipeline: &Configuration,
    ) -> Result<Arc<dyn DataSink>, FactoryError> {
        let factory = self.sink_factory(identifier)?;
        check_options(
            FactoryKind::Sink,
            identifier,
            options,
            &factory.required_options(),
            &factory.optional_options(),
        )?;
        let ctx = FactoryContext {
            options,
            pipeline,
            registry: self,
        };
        Ok(factory.create_data_sink(&ctx)?)
    }
}

fn join_or_none(ids: impl Iterator<Item = &'static str>) -> String {
    let ids: Vec<&str> = ids.collect();
    if ids.is_empty() {
        "none".to_string()
    } else {
        ids.join(", ")
    }
}

fn check_options(
    kind: FactoryKind,
    identifier: &str,
    options: &Configuration,
    required: &[OptionSpec],
    optional: &[OptionSpec],
) -> Result<(), FactoryError> {
    let problems: Vec<String> = required
        .iter()
        .chain(optional)
        .filter_map(|spec| options.check(spec).err())
        .map(|e: ConfigError| e.to_string())
        .collect();

    let known: Vec<&str> = required.iter().chain(optional).map(|s| s.key).collect();
    let unknown = options.unknown_keys(&known);
    if !unknown.is_empty() {
        tracing::debug!(
            kind = %kind,
            identifier,
            keys = ?unknown,
            "Ignoring undeclared connector options"
        );
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(FactoryError::InvalidOptions {
            kind,
            identifier: identifier.to_string(),
            problems,
        })
    }
}
