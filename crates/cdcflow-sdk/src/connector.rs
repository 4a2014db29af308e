//! Source and sink capability traits.
//!
//! Connector calls are synchronous and may block; the engine runs them
//! on a blocking thread pool. Shared capabilities (sources, sinks,
//! accessors, appliers) must be `Send + Sync` for use behind `Arc<dyn _>`.
//! Readers and writers are owned by a single subtask and only need `Send`.

use std::sync::Arc;

use cdcflow_types::{ConnectorError, Event, Schema, SchemaChangeEvent, TableId};

use crate::context::SubtaskContext;
use crate::splitter::ChunkSplitter;

/// Pull-based stream of change events for one source subtask.
pub trait EventReader: Send {
    /// Next event, or `Ok(None)` once the stream is exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the upstream system fails.
    fn next_event(&mut self) -> Result<Option<Event>, ConnectorError>;

    /// Release connector resources. Called once after the last read.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when cleanup fails.
    fn close(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Catalog lookups against the source system.
pub trait MetadataAccessor: Send + Sync {
    /// Collections captured by this source, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the catalog can't be read.
    fn list_tables(&self) -> Result<Vec<TableId>, ConnectorError>;

    /// Current schema of `table`, `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the catalog can't be read.
    fn table_schema(&self, table: &TableId) -> Result<Option<Schema>, ConnectorError>;
}

/// A configured change data source.
pub trait DataSource: Send + Sync {
    /// Open the snapshot reader for one subtask. `ctx.chunks` holds the
    /// snapshot chunks assigned to it.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the reader can't be opened.
    fn create_reader(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventReader>, ConnectorError>;

    /// Open the changelog reader. The engine calls this on the leader
    /// subtask only, once every subtask has emitted its snapshot chunks,
    /// so no change can overtake the snapshot row it modifies. `None`
    /// for snapshot-only sources.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the reader can't be opened.
    fn create_changelog_reader(
        &self,
        _ctx: &SubtaskContext,
    ) -> Result<Option<Box<dyn EventReader>>, ConnectorError> {
        Ok(None)
    }

    fn metadata_accessor(&self) -> Arc<dyn MetadataAccessor>;

    /// Splitter for parallel snapshot reads. Sources without one are
    /// read as one whole-table chunk per collection.
    fn chunk_splitter(&self) -> Option<Box<dyn ChunkSplitter>> {
        None
    }
}

/// Writes events into the external system for one sink partition.
pub trait EventWriter: Send {
    /// Write one event. Schema change events reach every writer after the
    /// change was applied through the [`MetadataApplier`].
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on write failure.
    fn write(&mut self, event: &Event) -> Result<(), ConnectorError>;

    /// Make everything written so far durable.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] on flush failure.
    fn flush(&mut self) -> Result<(), ConnectorError> {
        Ok(())
    }
}

/// Applies schema changes to the physical sink target.
///
/// Must be idempotent per event content: the same event applied twice
/// leaves the target as if it was applied once.
pub trait MetadataApplier: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the target rejects the change.
    fn apply_schema_change(&self, event: &SchemaChangeEvent) -> Result<(), ConnectorError>;
}

/// A configured change data sink.
pub trait DataSink: Send + Sync {
    fn metadata_applier(&self) -> Arc<dyn MetadataApplier>;

    /// Open the writer for one sink partition.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the writer can't be opened.
    fn create_writer(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventWriter>, ConnectorError>;
}
