//! In-memory tables backing the values sink.
//!
//! Schema metadata and row contents are maintained on two paths:
//!
//! - the metadata applier updates a table's schema as soon as the
//!   coordinator applies a change;
//! - each sink writer rewrites the rows of its own partition when the
//!   same change reaches it in the event stream, after every earlier
//!   row of that partition has been written.
//!
//! A table without a schema gets one inferred from its first row image.
//! Changes applied before that are kept and replayed on the inferred
//! schema. Re-applying a change that is already reflected in a schema is
//! a no-op.

use std::collections::BTreeMap;
use std::sync::{Mutex, RwLock, RwLockWriteGuard};

use cdcflow_types::{
    Column, ConnectorError, DataChangeEvent, DataType, Event, OperationKind, Row, Schema,
    SchemaChange, SchemaChangeEvent, TableId, Value,
};

#[derive(Debug, Clone, PartialEq)]
struct StoredRow {
    partition: u32,
    row: Row,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct StoredTable {
    schema: Option<Schema>,
    /// Changes applied while the schema was still unknown.
    deferred: Vec<SchemaChange>,
    rows: BTreeMap<Vec<Value>, StoredRow>,
}

/// Shared in-memory database.
#[derive(Debug, Default)]
pub struct ValuesDatabase {
    tables: RwLock<BTreeMap<TableId, StoredTable>>,
    log: Mutex<Vec<(u32, Event)>>,
}

impl ValuesDatabase {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a schema change to the table's metadata.
    ///
    /// # Errors
    ///
    /// Schema error when the change does not fit the current schema.
    pub fn apply_schema_change(&self, event: &SchemaChangeEvent) -> Result<(), ConnectorError> {
        let mut tables = self.write_tables()?;
        let table = tables.entry(event.table_id.clone()).or_default();

        let Some(schema) = &table.schema else {
            if let SchemaChange::CreateTable { schema } = &event.change {
                table.schema = Some(schema.clone());
            } else {
                tracing::debug!(
                    table = %event.table_id,
                    change = event.change.kind(),
                    "Table has no rows yet; deferring schema change"
                );
                table.deferred.push(event.change.clone());
            }
            return Ok(());
        };

        if is_applied(schema, &event.change) {
            tracing::debug!(
                table = %event.table_id,
                change = event.change.kind(),
                "Schema change already applied"
            );
            return Ok(());
        }
        let next = Schema::apply(Some(schema), &event.change).map_err(|e| {
            ConnectorError::schema(
                "SCHEMA_MISMATCH",
                format!(
                    "cannot apply {} to '{}': {e}",
                    event.change.kind(),
                    event.table_id
                ),
            )
        })?;
        tracing::info!(
            table = %event.table_id,
            change = event.change.kind(),
            columns = next.columns.len(),
            "Applied schema change"
        );
        table.schema = Some(next);
        Ok(())
    }

    /// Materialize a data change written by sink partition `partition`.
    ///
    /// # Errors
    ///
    /// Data error for an event whose row images don't match its operation.
    pub fn apply_data_change(
        &self,
        partition: u32,
        event: &DataChangeEvent,
    ) -> Result<(), ConnectorError> {
        let mut tables = self.write_tables()?;
        let table = tables.entry(event.table_id.clone()).or_default();
        if table.schema.is_none() {
            if let Some(image) = event.after.as_ref().or(event.before.as_ref()) {
                table.schema = Some(infer_schema(&event.table_id, image, &table.deferred));
                table.deferred.clear();
            }
        }

        match (event.op, &event.before, &event.after) {
            (OperationKind::Insert | OperationKind::Update, _, Some(after)) => {
                if let Some(before) = &event.before {
                    let old_key = row_key(&event.key, before);
                    if old_key != row_key(&event.key, after) {
                        table.rows.remove(&old_key);
                    }
                }
                table.rows.insert(
                    row_key(&event.key, after),
                    StoredRow {
                        partition,
                        row: after.clone(),
                    },
                );
            }
            (OperationKind::Delete, Some(before), None) => {
                table.rows.remove(&row_key(&event.key, before));
            }
            _ => {
                return Err(ConnectorError::data(
                    "MALFORMED_EVENT",
                    format!(
                        "{} event for '{}' has mismatched row images",
                        event.op, event.table_id
                    ),
                ))
            }
        }
        Ok(())
    }

    /// Rewrite the rows owned by `partition` for a schema change that
    /// reached that partition's writer.
    ///
    /// # Errors
    ///
    /// Internal error if the table store lock is poisoned.
    pub fn evolve_partition(
        &self,
        partition: u32,
        event: &SchemaChangeEvent,
    ) -> Result<(), ConnectorError> {
        let mut tables = self.write_tables()?;
        let Some(table) = tables.get_mut(&event.table_id) else {
            return Ok(());
        };
        let rows = table
            .rows
            .values_mut()
            .filter(|stored| stored.partition == partition)
            .map(|stored| &mut stored.row);
        evolve_rows(rows, &event.change);
        Ok(())
    }

    /// Record an event as written by sink partition `partition`.
    ///
    /// # Errors
    ///
    /// Internal error if the event log lock is poisoned.
    pub fn record(&self, partition: u32, event: Event) -> Result<(), ConnectorError> {
        self.log
            .lock()
            .map_err(|_| poisoned("event log"))?
            .push((partition, event));
        Ok(())
    }

    #[must_use]
    pub fn table_ids(&self) -> Vec<TableId> {
        self.tables
            .read()
            .map(|t| t.keys().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn schema(&self, table: &TableId) -> Option<Schema> {
        self.tables
            .read()
            .ok()
            .and_then(|t| t.get(table).and_then(|s| s.schema.clone()))
    }

    /// Rows of `table` in key order.
    #[must_use]
    pub fn rows(&self, table: &TableId) -> Vec<Row> {
        self.tables
            .read()
            .ok()
            .and_then(|t| {
                t.get(table)
                    .map(|s| s.rows.values().map(|stored| stored.row.clone()).collect())
            })
            .unwrap_or_default()
    }

    /// Every written event, in write order.
    #[must_use]
    pub fn events(&self) -> Vec<Event> {
        self.log
            .lock()
            .map(|log| log.iter().map(|(_, e)| e.clone()).collect())
            .unwrap_or_default()
    }

    /// Events written by one sink partition, in write order.
    #[must_use]
    pub fn partition_events(&self, partition: u32) -> Vec<Event> {
        self.log
            .lock()
            .map(|log| {
                log.iter()
                    .filter(|(p, _)| *p == partition)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn write_tables(
        &self,
    ) -> Result<RwLockWriteGuard<'_, BTreeMap<TableId, StoredTable>>, ConnectorError> {
        self.tables.write().map_err(|_| poisoned("table store"))
    }
}

fn poisoned(what: &str) -> ConnectorError {
    ConnectorError::internal("LOCK_POISONED", format!("values {what} lock poisoned"))
}

/// Storage key: the primary key, or the whole row image for keyless tables.
fn row_key(key: &[Value], image: &Row) -> Vec<Value> {
    if key.is_empty() {
        image.values().cloned().collect()
    } else {
        key.to_vec()
    }
}

/// Schema from a row image, with earlier deferred changes replayed on it.
fn infer_schema(table: &TableId, image: &Row, deferred: &[SchemaChange]) -> Schema {
    let columns = image
        .iter()
        .map(|(name, value)| {
            let data_type = match value {
                Value::Boolean(_) => DataType::Boolean,
                Value::Int64(_) => DataType::Int64,
                Value::Float64(_) => DataType::Float64,
                Value::Bytes(_) => DataType::Bytes,
                Value::Null | Value::String(_) => DataType::String,
            };
            Column::new(name.clone(), data_type)
        })
        .collect();
    let mut schema = Schema::new(columns, Vec::new());
    for change in deferred {
        if is_applied(&schema, change) {
            continue;
        }
        match Schema::apply(Some(&schema), change) {
            Ok(next) => schema = next,
            Err(e) => tracing::warn!(
                table = %table,
                change = change.kind(),
                error = %e,
                "Deferred schema change does not fit the first row; skipping"
            ),
        }
    }
    tracing::debug!(table = %table, columns = schema.columns.len(), "Created table from first row");
    schema
}

fn is_applied(schema: &Schema, change: &SchemaChange) -> bool {
    let has = |name: &str| schema.column(name).is_some();
    match change {
        SchemaChange::CreateTable { schema: created } => schema == created,
        SchemaChange::AddColumns { columns } => columns.iter().all(|c| has(&c.column.name)),
        SchemaChange::DropColumns { names } => names.iter().all(|n| !has(n)),
        SchemaChange::AlterColumnTypes { types } => types
            .iter()
            .all(|(name, ty)| schema.column(name).is_some_and(|c| &c.data_type == ty)),
        SchemaChange::RenameColumns { renames } => {
            renames.iter().all(|(old, new)| !has(old) && has(new))
        }
    }
}

fn evolve_rows<'a>(rows: impl Iterator<Item = &'a mut Row>, change: &SchemaChange) {
    for row in rows {
        match change {
            SchemaChange::AddColumns { columns } => {
                for added in columns {
                    row.entry(added.column.name.clone()).or_insert(Value::Null);
                }
            }
            SchemaChange::DropColumns { names } => {
                for name in names {
                    row.remove(name);
                }
            }
            SchemaChange::RenameColumns { renames } => {
                for (old, new) in renames {
                    if let Some(value) = row.remove(old) {
                        row.insert(new.clone(), value);
                    }
                }
            }
            SchemaChange::CreateTable { .. } | SchemaChange::AlterColumnTypes { .. } => {}
        }
    }
}
