//! Convenience re-exports for connector authors.
//!
//! ```ignore
//! use cdcflow_sdk::prelude::*;
//! ```

// Capability traits
pub use crate::connector::{
    DataSink, DataSource, EventReader, EventWriter, MetadataAccessor, MetadataApplier,
};
pub use crate::context::SubtaskContext;

// Factories
pub use crate::factory::{DataSinkFactory, DataSourceFactory, FactoryContext, FactoryRegistry};

// Snapshot splitting
pub use crate::splitter::{split_or_whole, ChunkSplitter, KeySampler, SampledChunkSplitter, SplitError};

// Model types
pub use cdcflow_types::{
    ChunkDescriptor, Column, ConfigOption, Configuration, ConnectorError, DataChangeEvent,
    DataType, Event, OperationKind, OptionSpec, Row, Schema, SchemaChange, SchemaChangeEvent,
    TableId, Value,
};
