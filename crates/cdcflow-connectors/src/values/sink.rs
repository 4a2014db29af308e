//! Values sink: materializes events into a shared [`ValuesDatabase`].

use std::sync::Arc;

use cdcflow_sdk::prelude::*;

use crate::values::config::{BATCH_SIZE, ERROR_ON_SCHEMA_CHANGE};
use crate::values::database::ValuesDatabase;

pub struct ValuesDataSink {
    database: Arc<ValuesDatabase>,
    batch_size: usize,
    error_on_schema_change: bool,
}

impl ValuesDataSink {
    #[must_use]
    pub fn new(database: Arc<ValuesDatabase>, batch_size: usize, error_on_schema_change: bool) -> Self {
        Self {
            database,
            batch_size: batch_size.max(1),
            error_on_schema_change,
        }
    }

    #[must_use]
    pub fn database(&self) -> &Arc<ValuesDatabase> {
        &self.database
    }
}

impl DataSink for ValuesDataSink {
    fn metadata_applier(&self) -> Arc<dyn MetadataApplier> {
        Arc::new(ValuesMetadataApplier {
            database: Arc::clone(&self.database),
            error_on_schema_change: self.error_on_schema_change,
        })
    }

    fn create_writer(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventWriter>, ConnectorError> {
        Ok(Box::new(ValuesWriter {
            database: Arc::clone(&self.database),
            partition: ctx.index,
            batch_size: self.batch_size,
            buffer: Vec::with_capacity(self.batch_size),
        }))
    }
}

struct ValuesMetadataApplier {
    database: Arc<ValuesDatabase>,
    error_on_schema_change: bool,
}

impl MetadataApplier for ValuesMetadataApplier {
    fn apply_schema_change(&self, event: &SchemaChangeEvent) -> Result<(), ConnectorError> {
        if self.error_on_schema_change {
            return Err(ConnectorError::schema(
                "SCHEMA_CHANGE_REFUSED",
                format!(
                    "sink refuses {} on '{}' (error.on.schema.change is set)",
                    event.change.kind(),
                    event.table_id
                ),
            ));
        }
        self.database.apply_schema_change(event)
    }
}

/// Buffers data events and materializes them in batches. A schema
/// change flushes the buffer before it rewrites the partition's rows.
struct ValuesWriter {
    database: Arc<ValuesDatabase>,
    partition: u32,
    batch_size: usize,
    buffer: Vec<DataChangeEvent>,
}

impl ValuesWriter {
    fn flush_buffer(&mut self) -> Result<(), ConnectorError> {
        for event in self.buffer.drain(..) {
            self.database.apply_data_change(self.partition, &event)?;
        }
        Ok(())
    }
}

impl EventWriter for ValuesWriter {
    fn write(&mut self, event: &Event) -> Result<(), ConnectorError> {
        self.database.record(self.partition, event.clone())?;
        match event {
            Event::DataChange(data) => {
                self.buffer.push(data.clone());
                if self.buffer.len() >= self.batch_size {
                    self.flush_buffer()?;
                }
            }
            Event::SchemaChange(change) => {
                self.flush_buffer()?;
                self.database.evolve_partition(self.partition, change)?;
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), ConnectorError> {
        self.flush_buffer()
    }
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// Creates values sinks over one shared database, so the caller can
/// inspect what a pipeline wrote.
pub struct ValuesSinkFactory {
    database: Arc<ValuesDatabase>,
}

impl Default for ValuesSinkFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ValuesSinkFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::with_database(Arc::new(ValuesDatabase::new()))
    }

    #[must_use]
    pub fn with_database(database: Arc<ValuesDatabase>) -> Self {
        Self { database }
    }

    #[must_use]
    pub fn database(&self) -> Arc<ValuesDatabase> {
        Arc::clone(&self.database)
    }
}

impl DataSinkFactory for ValuesSinkFactory {
    fn identifier(&self) -> &'static str {
        super::IDENTIFIER
    }

    fn optional_options(&self) -> Vec<OptionSpec> {
        vec![BATCH_SIZE.spec(), ERROR_ON_SCHEMA_CHANGE.spec()]
    }

    fn create_data_sink(&self, ctx: &FactoryContext<'_>) -> Result<Arc<dyn DataSink>, ConnectorError> {
        let batch_size = ctx.options.get(&BATCH_SIZE)?;
        let batch_size = usize::try_from(batch_size)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or_else(|| {
                ConnectorError::config(
                    "INVALID_OPTION",
                    format!("batch.size must be at least 1, got {batch_size}"),
                )
            })?;
        let error_on_schema_change = ctx.options.get(&ERROR_ON_SCHEMA_CHANGE)?;
        Ok(Arc::new(ValuesDataSink::new(
            Arc::clone(&self.database),
            batch_size,
            error_on_schema_change,
        )))
    }
}

#[cfg(test)]
mod tests {
    use cdcflow_types::schema::{AddedColumn, ColumnPosition};

    use super::*;

    fn orders() -> TableId {
        TableId::new("shop.orders")
    }

    fn insert(id: i64) -> Event {
        DataChangeEvent::insert(
            orders(),
            vec![Value::from(id)],
            Row::from([("id".to_string(), Value::from(id))]),
        )
        .into()
    }

    fn add_note() -> SchemaChangeEvent {
        SchemaChangeEvent::new(
            orders(),
            SchemaChange::AddColumns {
                columns: vec![AddedColumn {
                    column: Column::new("note", DataType::String),
                    position: ColumnPosition::Last,
                }],
            },
        )
    }

    #[test]
    fn writer_buffers_until_flush() {
        let sink = ValuesDataSink::new(Arc::new(ValuesDatabase::new()), 10, false);
        let mut writer = sink
            .create_writer(&SubtaskContext::new("p", "sink", 0, 1))
            .unwrap();
        writer.write(&insert(1)).unwrap();
        assert!(sink.database().rows(&orders()).is_empty());
        writer.flush().unwrap();
        assert_eq!(sink.database().rows(&orders()).len(), 1);
    }

    #[test]
    fn schema_change_flushes_then_evolves_rows() {
        let sink = ValuesDataSink::new(Arc::new(ValuesDatabase::new()), 10, false);
        let mut writer = sink
            .create_writer(&SubtaskContext::new("p", "sink", 0, 1))
            .unwrap();
        writer.write(&insert(1)).unwrap();
        sink.metadata_applier().apply_schema_change(&add_note()).unwrap();
        writer.write(&add_note().into()).unwrap();

        let rows = sink.database().rows(&orders());
        assert_eq!(rows[0].get("note"), Some(&Value::Null));
        assert_eq!(
            sink.database().schema(&orders()).unwrap().column_names(),
            vec!["id", "note"]
        );
        assert_eq!(sink.database().events().len(), 2);
    }

    #[test]
    fn refusing_applier_fails_every_change() {
        let sink = ValuesDataSink::new(Arc::new(ValuesDatabase::new()), 1, true);
        let err = sink
            .metadata_applier()
            .apply_schema_change(&add_note())
            .unwrap_err();
        assert_eq!(err.code, "SCHEMA_CHANGE_REFUSED");
    }

    #[test]
    fn factory_shares_its_database() {
        let factory = ValuesSinkFactory::new();
        let registry = FactoryRegistry::new();
        let options = Configuration::new().with("batch.size", 1);
        let ctx = FactoryContext {
            options: &options,
            pipeline: &Configuration::new(),
            registry: &registry,
        };
        let sink = factory.create_data_sink(&ctx).unwrap();
        let mut writer = sink
            .create_writer(&SubtaskContext::new("p", "sink", 0, 1))
            .unwrap();
        writer.write(&insert(7)).unwrap();
        assert_eq!(factory.database().rows(&orders()).len(), 1);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let factory = ValuesSinkFactory::new();
        let registry = FactoryRegistry::new();
        let options = Configuration::new().with("batch.size", 0);
        let ctx = FactoryContext {
            options: &options,
            pipeline: &Configuration::new(),
            registry: &registry,
        };
        assert!(factory.create_data_sink(&ctx).is_err());
    }
}
