//! `values` connectors: a source that replays configured tables and
//! changelog events, and a sink that materializes them in memory.

pub mod config;
pub mod database;
pub mod sink;
pub mod source;

pub const IDENTIFIER: &str = "values";

pub use database::ValuesDatabase;
pub use sink::{ValuesDataSink, ValuesSinkFactory};
pub use source::{ValuesDataSource, ValuesSourceFactory};
