//! Connector-facing API for cdcflow pipelines.
//!
//! Sources and sinks implement the capability traits in [`connector`],
//! expose themselves through the factories in [`factory`], and may
//! provide a [`splitter::ChunkSplitter`] for parallel snapshot reads.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod connector;
pub mod context;
pub mod factory;
pub mod prelude;
pub mod splitter;

pub use cdcflow_types as types;
