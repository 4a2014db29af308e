//! Values source: snapshot rows and changelog events from configuration.
//!
//! Each reader subtask emits the snapshot rows of its assigned chunks,
//! in key order. The changelog (inline events, then the events file) is
//! a separate reader that the engine opens once the whole snapshot has
//! been emitted.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::sync::Arc;

use cdcflow_sdk::prelude::*;

use crate::values::config::{required_source_options, source_options, SourceConfig, TableDef};

pub struct ValuesDataSource {
    config: Arc<SourceConfig>,
}

impl ValuesDataSource {
    #[must_use]
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SourceConfig {
        &self.config
    }
}

impl DataSource for ValuesDataSource {
    fn create_reader(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventReader>, ConnectorError> {
        let mut pending = VecDeque::new();
        if self.config.startup_mode.reads_snapshot() {
            for chunk in &ctx.chunks {
                let Some(table) = self.config.table(&chunk.table_id) else {
                    return Err(ConnectorError::data(
                        "UNKNOWN_TABLE",
                        format!("chunk {chunk} names a table this source does not capture"),
                    ));
                };
                pending.extend(snapshot_events(table, chunk));
            }
        }
        tracing::debug!(
            subtask = %ctx,
            chunks = ctx.chunks.len(),
            snapshot_rows = pending.len(),
            "Values snapshot reader opened"
        );
        Ok(Box::new(ValuesReader { pending }))
    }

    fn create_changelog_reader(
        &self,
        ctx: &SubtaskContext,
    ) -> Result<Option<Box<dyn EventReader>>, ConnectorError> {
        if !self.config.startup_mode.reads_changelog() {
            return Ok(None);
        }
        let mut pending: VecDeque<Event> = self.config.events.iter().cloned().collect();
        if let Some(path) = &self.config.events_file {
            pending.extend(read_events_file(path)?);
        }
        tracing::debug!(subtask = %ctx, events = pending.len(), "Values changelog reader opened");
        Ok(Some(Box::new(ValuesReader { pending })))
    }

    fn metadata_accessor(&self) -> Arc<dyn MetadataAccessor> {
        Arc::new(ValuesMetadataAccessor {
            config: Arc::clone(&self.config),
        })
    }

    fn chunk_splitter(&self) -> Option<Box<dyn ChunkSplitter>> {
        Some(Box::new(SampledChunkSplitter::new(
            ValuesKeySampler {
                config: Arc::clone(&self.config),
            },
            self.config.chunk_size,
            self.config.sampling_stride,
        )))
    }
}

/// Insert events for the rows of `table` that fall inside `chunk`,
/// ordered by primary key.
fn snapshot_events(table: &TableDef, chunk: &ChunkDescriptor) -> Vec<Event> {
    let mut rows: Vec<(Vec<Value>, &Row)> = table
        .rows
        .iter()
        .map(|row| (table.key_of(row), row))
        .filter(|(key, _)| match key.first() {
            Some(first) => chunk.contains(first),
            None => chunk.is_whole_table(),
        })
        .collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));
    rows.into_iter()
        .map(|(key, row)| {
            DataChangeEvent::insert(table.id.clone(), key, row.clone())
                .with_meta("snapshot.split", chunk.split_id())
                .into()
        })
        .collect()
}

fn read_events_file(path: &Path) -> Result<Vec<Event>, ConnectorError> {
    let file = File::open(path).map_err(|e| {
        ConnectorError::config(
            "EVENTS_FILE",
            format!("cannot open events file {}: {e}", path.display()),
        )
    })?;
    let mut events = Vec::new();
    for (number, line) in BufReader::new(file).lines().enumerate() {
        let line = line.map_err(|e| {
            ConnectorError::transient("EVENTS_FILE", format!("read failed at line {}: {e}", number + 1))
        })?;
        if line.trim().is_empty() {
            continue;
        }
        let event = serde_json::from_str(&line).map_err(|e| {
            ConnectorError::data(
                "MALFORMED_EVENT",
                format!("{} line {}: {e}", path.display(), number + 1),
            )
        })?;
        events.push(event);
    }
    Ok(events)
}

struct ValuesReader {
    pending: VecDeque<Event>,
}

impl EventReader for ValuesReader {
    fn next_event(&mut self) -> Result<Option<Event>, ConnectorError> {
        Ok(self.pending.pop_front())
    }
}

struct ValuesMetadataAccessor {
    config: Arc<SourceConfig>,
}

impl MetadataAccessor for ValuesMetadataAccessor {
    fn list_tables(&self) -> Result<Vec<TableId>, ConnectorError> {
        Ok(self.config.tables.iter().map(|t| t.id.clone()).collect())
    }

    fn table_schema(&self, table: &TableId) -> Result<Option<Schema>, ConnectorError> {
        Ok(self.config.table(table).map(TableDef::schema))
    }
}

/// Samples the first primary-key column of single-key tables.
struct ValuesKeySampler {
    config: Arc<SourceConfig>,
}

impl KeySampler for ValuesKeySampler {
    fn key_column(&self, table: &TableId) -> Result<Option<String>, ConnectorError> {
        let def = self.config.table(table).ok_or_else(|| unknown_table(table))?;
        Ok(match def.primary_keys.as_slice() {
            [single] => Some(single.clone()),
            _ => None,
        })
    }

    fn sample_key_values(&self, table: &TableId, stride: usize) -> Result<Vec<Value>, ConnectorError> {
        let def = self.config.table(table).ok_or_else(|| unknown_table(table))?;
        let mut keys: Vec<Value> = def
            .rows
            .iter()
            .filter_map(|row| def.key_of(row).into_iter().next())
            .collect();
        keys.sort();
        keys.dedup();
        Ok(keys.into_iter().step_by(stride.max(1)).collect())
    }
}

fn unknown_table(table: &TableId) -> ConnectorError {
    ConnectorError::data("UNKNOWN_TABLE", format!("table '{table}' is not captured"))
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

pub struct ValuesSourceFactory;

impl DataSourceFactory for ValuesSourceFactory {
    fn identifier(&self) -> &'static str {
        super::IDENTIFIER
    }

    fn required_options(&self) -> Vec<OptionSpec> {
        required_source_options()
    }

    fn optional_options(&self) -> Vec<OptionSpec> {
        source_options()
    }

    fn create_data_source(
        &self,
        ctx: &FactoryContext<'_>,
    ) -> Result<Arc<dyn DataSource>, ConnectorError> {
        let config = SourceConfig::from_options(ctx.options)?;
        tracing::info!(
            tables = config.tables.len(),
            changelog_events = config.events.len(),
            chunk_size = config.chunk_size,
            "Created values source"
        );
        Ok(Arc::new(ValuesDataSource::new(config)))
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use cdcflow_sdk::splitter::split_or_whole;
    use serde_json::json;

    use super::*;

    fn source(extra: &[(&str, serde_json::Value)]) -> ValuesDataSource {
        let mut options = Configuration::new().with(
            "tables",
            json!([
                {
                    "id": "shop.orders",
                    "columns": [{"name": "id", "data_type": "int64"}, {"name": "item", "data_type": "string"}],
                    "primary_keys": ["id"],
                    "rows": (1..=10).map(|i| json!({"id": i, "item": format!("item-{i}")})).collect::<Vec<_>>()
                },
                {
                    "id": "shop.audit",
                    "columns": [{"name": "line", "data_type": "string"}],
                    "rows": [{"line": "a"}, {"line": "b"}]
                }
            ]),
        );
        for (key, value) in extra {
            options.set(*key, value.clone());
        }
        ValuesDataSource::new(SourceConfig::from_options(&options).unwrap())
    }

    fn drain(source: &ValuesDataSource, ctx: &SubtaskContext) -> Vec<Event> {
        let mut reader = source.create_reader(ctx).unwrap();
        let mut events = Vec::new();
        while let Some(event) = reader.next_event().unwrap() {
            events.push(event);
        }
        events
    }

    fn drain_changelog(source: &ValuesDataSource) -> Option<Vec<Event>> {
        let ctx = SubtaskContext::new("p", "source", 0, 1);
        let mut reader = source.create_changelog_reader(&ctx).unwrap()?;
        let mut events = Vec::new();
        while let Some(event) = reader.next_event().unwrap() {
            events.push(event);
        }
        Some(events)
    }

    fn keys(events: &[Event]) -> Vec<i64> {
        events
            .iter()
            .filter_map(Event::as_data_change)
            .filter_map(|e| e.key.first().and_then(Value::as_i64))
            .collect()
    }

    #[test]
    fn splitter_places_boundaries_on_real_keys() {
        let source = source(&[("scan.snapshot.chunk.size", json!(3))]);
        let splitter = source.chunk_splitter().unwrap();
        let chunks = splitter.generate_splits(&TableId::new("shop.orders")).unwrap();
        let bounds: Vec<(Option<i64>, Option<i64>)> = chunks
            .iter()
            .map(|c| (c.low.as_ref().and_then(Value::as_i64), c.high.as_ref().and_then(Value::as_i64)))
            .collect();
        assert_eq!(
            bounds,
            vec![(None, Some(4)), (Some(4), Some(7)), (Some(7), Some(10)), (Some(10), None)]
        );
    }

    #[test]
    fn keyless_table_falls_back_to_whole_table() {
        let source = source(&[]);
        let splitter = source.chunk_splitter().unwrap();
        let chunks = split_or_whole(splitter.as_ref(), &TableId::new("shop.audit")).unwrap();
        assert_eq!(chunks, vec![ChunkDescriptor::whole_table(TableId::new("shop.audit"))]);
    }

    #[test]
    fn chunks_partition_snapshot_rows() {
        let source = source(&[("scan.snapshot.chunk.size", json!(3))]);
        let chunks = source
            .chunk_splitter()
            .unwrap()
            .generate_splits(&TableId::new("shop.orders"))
            .unwrap();

        let mut seen = Vec::new();
        for chunk in chunks {
            let ctx = SubtaskContext::new("p", "source", 1, 2).with_chunks(vec![chunk]);
            seen.extend(keys(&drain(&source, &ctx)));
        }
        assert_eq!(seen, (1..=10).collect::<Vec<_>>());
    }

    #[test]
    fn snapshot_reader_never_carries_changelog() {
        let change = json!([{
            "type": "data_change",
            "table_id": "shop.orders",
            "op": "delete",
            "key": [3],
            "before": {"id": 3, "item": "item-3"}
        }]);
        let source = source(&[("events", change)]);
        let leader = drain(&source, &SubtaskContext::new("p", "source", 0, 2));
        assert!(leader.is_empty());
        let changelog = drain_changelog(&source).unwrap();
        assert_eq!(keys(&changelog), vec![3]);
    }

    #[test]
    fn snapshot_mode_skips_changelog() {
        let change = json!([{
            "type": "schema_change",
            "table_id": "shop.orders",
            "change": {"kind": "drop_columns", "names": ["item"]}
        }]);
        let source = source(&[("events", change), ("scan.startup.mode", json!("snapshot"))]);
        let ctx = SubtaskContext::new("p", "source", 0, 1)
            .with_chunks(vec![ChunkDescriptor::whole_table(TableId::new("shop.audit"))]);
        let events = drain(&source, &ctx);
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| !e.is_schema_change()));
        assert!(drain_changelog(&source).is_none());
    }

    #[test]
    fn events_file_is_read_after_inline_events() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"{{"type":"data_change","table_id":"shop.orders","op":"insert","key":[11],"after":{{"id":11}}}}"#
        )
        .unwrap();
        writeln!(file).unwrap();
        let source = source(&[
            ("events.file", json!(file.path().to_str().unwrap())),
            ("scan.startup.mode", json!("latest-offset")),
        ]);
        let ctx = SubtaskContext::new("p", "source", 0, 1)
            .with_chunks(vec![ChunkDescriptor::whole_table(TableId::new("shop.orders"))]);
        assert!(drain(&source, &ctx).is_empty());
        assert_eq!(keys(&drain_changelog(&source).unwrap()), vec![11]);
    }

    #[test]
    fn accessor_reports_schemas() {
        let source = source(&[]);
        let accessor = source.metadata_accessor();
        assert_eq!(accessor.list_tables().unwrap().len(), 2);
        let schema = accessor
            .table_schema(&TableId::new("shop.orders"))
            .unwrap()
            .unwrap();
        assert_eq!(schema.primary_keys, vec!["id".to_string()]);
        assert!(accessor.table_schema(&TableId::new("nope")).unwrap().is_none());
    }
}
