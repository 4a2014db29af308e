//! Schema change coordination.
//!
//! [`SchemaCoordinator`] is a synchronous per-collection state machine.
//! A collection is either streaming (events pass straight through) or
//! blocked on one pending schema change, in which case every later event
//! of that collection is buffered in arrival order. Blocking one
//! collection never holds back another.
//!
//! The machine never calls the sink itself: [`SchemaCoordinator::accept`]
//! returns [`Step::Apply`] and the caller reports the outcome through
//! [`SchemaCoordinator::complete`].
//!
//! Buffers are bounded by the caller: once a blocked collection holds
//! `buffer_limit` events, [`SchemaCoordinator::is_saturated`] turns true
//! and the driver stops taking input until an apply completes. Memory per
//! coordinator is therefore at most `buffer_limit` events per blocked
//! collection.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use cdcflow_types::{
    ConnectorError, Event, Schema, SchemaChangeBehavior, SchemaChangeEvent, TableId,
};

use crate::errors::PipelineError;

/// What the caller must do after feeding the coordinator.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    /// Forward downstream, in this order.
    Emit(Event),
    /// Apply through the sink's metadata applier, then call `complete`.
    Apply(SchemaChangeEvent),
    /// Dropped under the IGNORE behavior.
    Ignored(SchemaChangeEvent),
    /// Held until the collection's pending change completes.
    Buffered { table: TableId, depth: usize },
}

#[derive(Debug)]
enum CollectionState {
    Streaming,
    Blocked {
        pending: SchemaChangeEvent,
        buffer: VecDeque<Event>,
    },
}

/// Externally visible state of one collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Streaming,
    Blocked { buffered: usize },
}

// ---------------------------------------------------------------------------
// SchemaRegistry
// ---------------------------------------------------------------------------

/// Applied schema of every collection seen so far.
///
/// Shared by all coordinator subtasks of one pipeline.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    tables: RwLock<BTreeMap<TableId, Schema>>,
}

impl SchemaRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the initial schema of a collection.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Infrastructure` if the registry lock is poisoned.
    pub fn seed(&self, table: TableId, schema: Schema) -> Result<(), PipelineError> {
        self.tables
            .write()
            .map_err(|_| PipelineError::Infrastructure(anyhow::anyhow!("schema registry lock poisoned")))?
            .insert(table, schema);
        Ok(())
    }

    /// Evolve the tracked schema by an applied change. Returns `false`
    /// (and keeps the old entry) when the change doesn't fit the
    /// tracked schema; the sink stays authoritative in that case.
    ///
    /// # Errors
    ///
    /// Returns `PipelineError::Infrastructure` if the registry lock is poisoned.
    pub fn record(&self, event: &SchemaChangeEvent) -> Result<bool, PipelineError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PipelineError::Infrastructure(anyhow::anyhow!("schema registry lock poisoned")))?;
        match Schema::apply(tables.get(&event.table_id), &event.change) {
            Ok(next) => {
                tables.insert(event.table_id.clone(), next);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(
                    table = %event.table_id,
                    change = event.change.kind(),
                    error = %e,
                    "Applied schema change does not match the tracked schema; keeping previous entry"
                );
                Ok(false)
            }
        }
    }

    /// # Errors
    ///
    /// Returns `PipelineError::Infrastructure` if the registry lock is poisoned.
    pub fn schema(&self, table: &TableId) -> Result<Option<Schema>, PipelineError> {
        Ok(self
            .tables
            .read()
            .map_err(|_| PipelineError::Infrastructure(anyhow::anyhow!("schema registry lock poisoned")))?
            .get(table)
            .cloned())
    }

    /// # Errors
    ///
    /// Returns `PipelineError::Infrastructure` if the registry lock is poisoned.
    pub fn snapshot(&self) -> Result<BTreeMap<TableId, Schema>, PipelineError> {
        Ok(self
            .tables
            .read()
            .map_err(|_| PipelineError::Infrastructure(anyhow::anyhow!("schema registry lock poisoned")))?
            .clone())
    }
}

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

/// Counters shared by all coordinator subtasks.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
    events_in: AtomicU64,
    events_out: AtomicU64,
    schema_changes_applied: AtomicU64,
    schema_changes_ignored: AtomicU64,
    max_buffered: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CoordinatorStats {
    pub events_in: u64,
    pub events_out: u64,
    pub schema_changes_applied: u64,
    pub schema_changes_ignored: u64,
    pub max_buffered: u64,
}

impl CoordinatorMetrics {
    pub fn record_emitted(&self) {
        self.events_out.fetch_add(1, Ordering::Relaxed);
    }

    fn observe_depth(&self, depth: usize) {
        self.max_buffered
            .fetch_max(u64::try_from(depth).unwrap_or(u64::MAX), Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> CoordinatorStats {
        CoordinatorStats {
            events_in: self.events_in.load(Ordering::Relaxed),
            events_out: self.events_out.load(Ordering::Relaxed),
            schema_changes_applied: self.schema_changes_applied.load(Ordering::Relaxed),
            schema_changes_ignored: self.schema_changes_ignored.load(Ordering::Relaxed),
            max_buffered: self.max_buffered.load(Ordering::Relaxed),
        }
    }
}

// ---------------------------------------------------------------------------
// SchemaCoordinator
// ---------------------------------------------------------------------------

pub struct SchemaCoordinator {
    behavior: SchemaChangeBehavior,
    buffer_limit: usize,
    tables: HashMap<TableId, CollectionState>,
    registry: Arc<SchemaRegistry>,
    metrics: Arc<CoordinatorMetrics>,
}

impl SchemaCoordinator {
    #[must_use]
    pub fn new(
        behavior: SchemaChangeBehavior,
        registry: Arc<SchemaRegistry>,
        metrics: Arc<CoordinatorMetrics>,
    ) -> Self {
        Self {
            behavior,
            buffer_limit: usize::MAX,
            tables: HashMap::new(),
            registry,
            metrics,
        }
    }

    /// Cap the events held per blocked collection (at least 1).
    #[must_use]
    pub fn with_buffer_limit(mut self, limit: usize) -> Self {
        self.buffer_limit = limit.max(1);
        self
    }

    #[must_use]
    pub fn behavior(&self) -> SchemaChangeBehavior {
        self.behavior
    }

    #[must_use]
    pub fn status(&self, table: &TableId) -> CollectionStatus {
        match self.tables.get(table) {
            Some(CollectionState::Blocked { buffer, .. }) => CollectionStatus::Blocked {
                buffered: buffer.len(),
            },
            Some(CollectionState::Streaming) | None => CollectionStatus::Streaming,
        }
    }

    /// Whether no collection is waiting on a schema change.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.tables
            .values()
            .all(|s| matches!(s, CollectionState::Streaming))
    }

    /// Whether some blocked collection has reached the buffer limit. The
    /// caller must not feed more input until a pending change completes.
    #[must_use]
    pub fn is_saturated(&self) -> bool {
        self.tables.values().any(|s| match s {
            CollectionState::Blocked { buffer, .. } => buffer.len() >= self.buffer_limit,
            CollectionState::Streaming => false,
        })
    }

    /// Feed one upstream event.
    ///
    /// # Errors
    ///
    /// [`PipelineError::SchemaChangeRejected`] for any schema change under
    /// the EXCEPTION behavior.
    pub fn accept(&mut self, event: Event) -> Result<Step, PipelineError> {
        self.metrics.events_in.fetch_add(1, Ordering::Relaxed);
        let table = event.table_id().clone();
        let state = self
            .tables
            .entry(table.clone())
            .or_insert(CollectionState::Streaming);

        if let CollectionState::Blocked { buffer, .. } = &mut *state {
            buffer.push_back(event);
            let depth = buffer.len();
            self.metrics.observe_depth(depth);
            tracing::trace!(table = %table, depth, "Buffered event behind pending schema change");
            return Ok(Step::Buffered { table, depth });
        }

        let change = match event {
            Event::SchemaChange(change) => change,
            data @ Event::DataChange(_) => return Ok(Step::Emit(data)),
        };

        match self.behavior {
            SchemaChangeBehavior::Evolve => {
                tracing::info!(
                    table = %table,
                    change = change.change.kind(),
                    "Blocking collection until schema change is applied"
                );
                *state = CollectionState::Blocked {
                    pending: change.clone(),
                    buffer: VecDeque::new(),
                };
                Ok(Step::Apply(change))
            }
            SchemaChangeBehavior::Ignore => {
                self.metrics
                    .schema_changes_ignored
                    .fetch_add(1, Ordering::Relaxed);
                tracing::info!(
                    table = %table,
                    change = change.change.kind(),
                    "Ignoring schema change"
                );
                Ok(Step::Ignored(change))
            }
            SchemaChangeBehavior::Exception => {
                tracing::error!(
                    table = %table,
                    change = change.change.kind(),
                    "Schema change rejected"
                );
                Err(PipelineError::SchemaChangeRejected {
                    table,
                    kind: change.change.kind().to_string(),
                })
            }
        }
    }

    /// Report the outcome of applying `table`'s pending change.
    ///
    /// On success the change itself is emitted first, followed by the
    /// buffered events in arrival order. A buffered schema change blocks
    /// the collection again and ends the flush with another
    /// [`Step::Apply`].
    ///
    /// # Errors
    ///
    /// [`PipelineError::SinkApply`] when the applier failed;
    /// `Infrastructure` when `table` has no pending change.
    pub fn complete(
        &mut self,
        table: &TableId,
        outcome: Result<(), ConnectorError>,
    ) -> Result<Vec<Step>, PipelineError> {
        let Some(CollectionState::Blocked { pending, mut buffer }) = self.tables.remove(table)
        else {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "no pending schema change for '{table}'"
            )));
        };
        if let Err(source) = outcome {
            return Err(PipelineError::SinkApply {
                table: table.clone(),
                source,
            });
        }

        self.registry.record(&pending)?;
        self.metrics
            .schema_changes_applied
            .fetch_add(1, Ordering::Relaxed);
        tracing::info!(
            table = %table,
            change = pending.change.kind(),
            released = buffer.len(),
            "Schema change applied; releasing buffered events"
        );

        let mut steps = Vec::with_capacity(buffer.len() + 1);
        steps.push(Step::Emit(Event::SchemaChange(pending)));
        while let Some(event) = buffer.pop_front() {
            match event {
                Event::SchemaChange(next) => {
                    steps.push(Step::Apply(next.clone()));
                    self.tables.insert(
                        table.clone(),
                        CollectionState::Blocked {
                            pending: next,
                            buffer,
                        },
                    );
                    return Ok(steps);
                }
                data @ Event::DataChange(_) => steps.push(Step::Emit(data)),
            }
        }
        self.tables.insert(table.clone(), CollectionState::Streaming);
        Ok(steps)
    }
}
