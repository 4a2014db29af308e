//! Shared cdcflow event, schema, configuration, and error model types.
//!
//! This crate is dependency-boundary-safe for both the engine and
//! connector implementations.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod chunk;
pub mod config;
pub mod error;
pub mod event;
pub mod policy;
pub mod schema;
pub mod table;
pub mod value;

pub use chunk::ChunkDescriptor;
pub use config::{ConfigError, ConfigOption, Configuration, OptionKind, OptionSpec, OptionValue};
pub use error::{ConnectorError, ErrorCategory};
pub use event::{DataChangeEvent, Event, OperationKind, Row, SchemaChangeEvent};
pub use policy::SchemaChangeBehavior;
pub use schema::{Column, DataType, Schema, SchemaChange, SchemaError};
pub use table::TableId;
pub use value::Value;
