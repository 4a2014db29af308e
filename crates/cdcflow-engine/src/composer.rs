//! Pipeline composition: definition in, executable pipeline out.
//!
//! Stages are built in a fixed order. The sink's capabilities come first
//! so that an unusable sink fails the composition before any source
//! connection is opened; the coordinator is then wired to the sink's
//! metadata applier, and the partitioner to the coordinator's and the
//! sink's operator ids.

use std::collections::BTreeMap;
use std::sync::Arc;

use cdcflow_sdk::factory::FactoryRegistry;
use cdcflow_types::{ConfigOption, Configuration};

use crate::config::types::PipelineDefinition;
use crate::coordinator::{CoordinatorMetrics, SchemaRegistry};
use crate::errors::PipelineError;
use crate::execution::PipelineExecution;
use crate::identity::{generate, OperatorId};
use crate::options;
use crate::partitioner::Partitioner;
use crate::stages::coordinator::SchemaCoordinatorStage;
use crate::stages::sink::SinkStage;
use crate::stages::source::SourceStage;
use crate::stages::StageKind;

/// Builds [`PipelineExecution`]s from definitions using registered
/// connector factories.
pub struct PipelineComposer {
    registry: Arc<FactoryRegistry>,
    blocking: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parallelism {
    source: u32,
    coordinator: u32,
    sink: u32,
}

impl PipelineComposer {
    /// Composer whose pipelines run in-process and block until done.
    #[must_use]
    pub fn local(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            blocking: true,
        }
    }

    /// Composer whose pipelines are submitted and return a handle.
    #[must_use]
    pub fn detached(registry: Arc<FactoryRegistry>) -> Self {
        Self {
            registry,
            blocking: false,
        }
    }

    #[must_use]
    pub fn registry(&self) -> &FactoryRegistry {
        &self.registry
    }

    /// Compose a pipeline.
    ///
    /// # Errors
    ///
    /// `Configuration` for missing or malformed options and unresolvable
    /// connectors, `InvalidParallelism` for a parallelism below 1,
    /// `DuplicateOperatorId` when two stages share an identity, or a
    /// connector error raised while creating the source or sink.
    pub fn compose(&self, definition: PipelineDefinition) -> Result<PipelineExecution, PipelineError> {
        let PipelineDefinition {
            source: source_def,
            sink: sink_def,
            config,
        } = definition;

        let name = config.get(&options::PIPELINE_NAME)?;
        let parallelism = resolve_parallelism(&config)?;
        let behavior = config.get(&options::SCHEMA_CHANGE_BEHAVIOR)?;
        let channel_capacity = positive(&config, &options::CHANNEL_CAPACITY, "channels")?;

        let sink = self
            .registry
            .create_sink(&sink_def.type_id, &sink_def.options, &config)?;
        let applier = sink.metadata_applier();
        tracing::debug!(sink = sink_def.display_name(), "Sink capabilities created");

        let source = self
            .registry
            .create_source(&source_def.type_id, &source_def.options, &config)?;

        let source_uid = config.get(&options::SOURCE_UID)?;
        let coordinator_uid = config.get(&options::SCHEMA_OPERATOR_UID)?;
        let sink_uid = config.get(&options::SINK_UID)?;
        let ids = assign_operator_ids(&[
            (StageKind::Source, source_uid.as_str()),
            (StageKind::SchemaCoordinator, coordinator_uid.as_str()),
            (StageKind::Partitioner, options::PARTITIONER_UID),
            (StageKind::Sink, sink_uid.as_str()),
        ])?;
        let [source_id, coordinator_id, partitioner_id, sink_id] = ids;

        let source_stage = SourceStage {
            source,
            name: source_def.display_name().to_string(),
            uid: source_uid,
            id: source_id,
            parallelism: parallelism.source,
        };
        tracing::info!(
            stage = %StageKind::Source,
            connector = %source_def.type_id,
            uid = %source_stage.uid,
            id = %source_stage.id,
            parallelism = source_stage.parallelism,
            "Built stage"
        );

        let coordinator_stage = SchemaCoordinatorStage {
            behavior,
            applier,
            uid: coordinator_uid,
            id: coordinator_id,
            parallelism: parallelism.coordinator,
            buffer_limit: channel_capacity,
            registry: Arc::new(SchemaRegistry::new()),
            metrics: Arc::new(CoordinatorMetrics::default()),
        };
        tracing::info!(
            stage = %StageKind::SchemaCoordinator,
            behavior = %behavior,
            uid = %coordinator_stage.uid,
            id = %coordinator_stage.id,
            parallelism = coordinator_stage.parallelism,
            "Built stage"
        );

        let partitioner = Partitioner::new(i64::from(parallelism.sink), coordinator_id, sink_id)?;
        tracing::info!(
            stage = %StageKind::Partitioner,
            id = %partitioner_id,
            upstream = %partitioner.upstream(),
            downstream = %partitioner.downstream(),
            partitions = partitioner.partitions(),
            "Built stage"
        );

        let sink_stage = SinkStage {
            sink,
            name: sink_def.display_name().to_string(),
            uid: sink_uid,
            id: sink_id,
            parallelism: parallelism.sink,
        };
        tracing::info!(
            stage = %StageKind::Sink,
            connector = %sink_def.type_id,
            uid = %sink_stage.uid,
            id = %sink_stage.id,
            parallelism = sink_stage.parallelism,
            "Built stage"
        );

        Ok(PipelineExecution {
            name,
            blocking: self.blocking,
            channel_capacity,
            source: source_stage,
            coordinator: coordinator_stage,
            partitioner,
            partitioner_id,
            sink: sink_stage,
        })
    }
}

fn resolve_parallelism(config: &Configuration) -> Result<Parallelism, PipelineError> {
    let global = config.get(&options::GLOBAL_PARALLELISM)?;
    let global = to_parallelism("global", global)?;
    let source = match config.get_optional(&options::SOURCE_PARALLELISM)? {
        Some(value) => to_parallelism("source", value)?,
        None => global,
    };
    let sink = match config.get_optional(&options::SINK_PARALLELISM)? {
        Some(value) => to_parallelism("sink", value)?,
        None => global,
    };
    Ok(Parallelism {
        source,
        coordinator: global,
        sink,
    })
}

fn to_parallelism(stage: &str, value: i64) -> Result<u32, PipelineError> {
    u32::try_from(value)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| PipelineError::InvalidParallelism {
            stage: stage.to_string(),
            value,
        })
}

fn positive(
    config: &Configuration,
    option: &ConfigOption<i64>,
    what: &str,
) -> Result<usize, PipelineError> {
    let value = config.get(option)?;
    usize::try_from(value)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| {
            PipelineError::Configuration(format!(
                "option '{}' for {what} must be at least 1, got {value}",
                option.key()
            ))
        })
}

/// Derive one operator id per stage, rejecting collisions.
fn assign_operator_ids(stages: &[(StageKind, &str); 4]) -> Result<[OperatorId; 4], PipelineError> {
    let mut seen: BTreeMap<OperatorId, String> = BTreeMap::new();
    let mut ids = [OperatorId::from_bytes([0; 16]); 4];
    for (slot, (kind, uid)) in ids.iter_mut().zip(stages) {
        let id = generate(uid);
        let label = format!("{kind} '{uid}'");
        if let Some(first) = seen.get(&id) {
            return Err(PipelineError::DuplicateOperatorId {
                id: id.to_hex(),
                first: first.clone(),
                second: label,
            });
        }
        seen.insert(id, label);
        *slot = id;
    }
    Ok(ids)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use cdcflow_sdk::prelude::*;
    use cdcflow_types::{
        schema::{AddedColumn, ColumnPosition},
        SchemaChangeBehavior,
    };
    use rstest::rstest;

    use super::*;
    use crate::config::types::{SinkDef, SourceDef};
    use crate::execution::ExecutionOutcome;

    // -----------------------------------------------------------------------
    // In-memory connectors
    // -----------------------------------------------------------------------

    struct VecAccessor;

    impl MetadataAccessor for VecAccessor {
        fn list_tables(&self) -> Result<Vec<TableId>, ConnectorError> {
            Ok(vec![])
        }

        fn table_schema(&self, _table: &TableId) -> Result<Option<Schema>, ConnectorError> {
            Ok(None)
        }
    }

    struct VecSource {
        events: Vec<Event>,
    }

    struct VecReader {
        events: std::vec::IntoIter<Event>,
    }

    impl EventReader for VecReader {
        fn next_event(&mut self) -> Result<Option<Event>, ConnectorError> {
            Ok(self.events.next())
        }
    }

    impl DataSource for VecSource {
        fn create_reader(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventReader>, ConnectorError> {
            let events = if ctx.is_leader() {
                self.events.clone()
            } else {
                Vec::new()
            };
            Ok(Box::new(VecReader {
                events: events.into_iter(),
            }))
        }

        fn metadata_accessor(&self) -> Arc<dyn MetadataAccessor> {
            Arc::new(VecAccessor)
        }
    }

    struct VecSourceFactory {
        events: Vec<Event>,
        created: Arc<AtomicUsize>,
    }

    impl DataSourceFactory for VecSourceFactory {
        fn identifier(&self) -> &'static str {
            "vec"
        }

        fn create_data_source(
            &self,
            _ctx: &FactoryContext<'_>,
        ) -> Result<Arc<dyn DataSource>, ConnectorError> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(VecSource {
                events: self.events.clone(),
            }))
        }
    }

    /// Written events per sink partition, plus applied schema changes.
    #[derive(Default)]
    struct Collected {
        partitions: Mutex<BTreeMap<u32, Vec<Event>>>,
        applied: Mutex<Vec<SchemaChangeEvent>>,
    }

    struct CollectSink {
        collected: Arc<Collected>,
    }

    struct CollectApplier {
        collected: Arc<Collected>,
    }

    impl MetadataApplier for CollectApplier {
        fn apply_schema_change(&self, event: &SchemaChangeEvent) -> Result<(), ConnectorError> {
            self.collected.applied.lock().unwrap().push(event.clone());
            Ok(())
        }
    }

    struct CollectWriter {
        index: u32,
        collected: Arc<Collected>,
    }

    impl EventWriter for CollectWriter {
        fn write(&mut self, event: &Event) -> Result<(), ConnectorError> {
            self.collected
                .partitions
                .lock()
                .unwrap()
                .entry(self.index)
                .or_default()
                .push(event.clone());
            Ok(())
        }
    }

    impl DataSink for CollectSink {
        fn metadata_applier(&self) -> Arc<dyn MetadataApplier> {
            Arc::new(CollectApplier {
                collected: Arc::clone(&self.collected),
            })
        }

        fn create_writer(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventWriter>, ConnectorError> {
            Ok(Box::new(CollectWriter {
                index: ctx.index,
                collected: Arc::clone(&self.collected),
            }))
        }
    }

    struct CollectSinkFactory {
        collected: Arc<Collected>,
    }

    impl DataSinkFactory for CollectSinkFactory {
        fn identifier(&self) -> &'static str {
            "collect"
        }

        fn create_data_sink(&self, _ctx: &FactoryContext<'_>) -> Result<Arc<dyn DataSink>, ConnectorError> {
            Ok(Arc::new(CollectSink {
                collected: Arc::clone(&self.collected),
            }))
        }
    }

    struct Fixture {
        registry: Arc<FactoryRegistry>,
        sources_created: Arc<AtomicUsize>,
        collected: Arc<Collected>,
    }

    fn fixture(events: Vec<Event>) -> Fixture {
        let sources_created = Arc::new(AtomicUsize::new(0));
        let collected = Arc::new(Collected::default());
        let mut registry = FactoryRegistry::new();
        registry
            .register_source(VecSourceFactory {
                events,
                created: Arc::clone(&sources_created),
            })
            .unwrap();
        registry
            .register_sink(CollectSinkFactory {
                collected: Arc::clone(&collected),
            })
            .unwrap();
        Fixture {
            registry: Arc::new(registry),
            sources_created,
            collected,
        }
    }

    fn definition(pipeline: &[(&str, serde_json::Value)]) -> PipelineDefinition {
        let config = pipeline
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect();
        PipelineDefinition::new(
            SourceDef::new("vec", Configuration::new()),
            SinkDef::new("collect", Configuration::new()),
            config,
        )
    }

    fn add_column(table: &str) -> Event {
        SchemaChangeEvent::new(
            TableId::new(table),
            SchemaChange::AddColumns {
                columns: vec![AddedColumn {
                    column: Column::new("x", DataType::String),
                    position: ColumnPosition::Last,
                }],
            },
        )
        .into()
    }

    fn insert(table: &str, id: i64) -> Event {
        DataChangeEvent::insert(
            TableId::new(table),
            vec![Value::from(id)],
            Row::from([("id".to_string(), Value::from(id))]),
        )
        .into()
    }

    // -----------------------------------------------------------------------
    // Composition
    // -----------------------------------------------------------------------

    #[test]
    fn missing_global_parallelism_fails_before_any_stage() {
        let fx = fixture(vec![]);
        let composer = PipelineComposer::local(Arc::clone(&fx.registry));
        let err = composer.compose(definition(&[])).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("pipeline.global.parallelism")));
        assert_eq!(fx.sources_created.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::zero_global("pipeline.global.parallelism", 0, "global")]
    #[case::negative_global("pipeline.global.parallelism", -2, "global")]
    #[case::zero_source("pipeline.source.parallelism", 0, "source")]
    #[case::negative_sink("pipeline.sink.parallelism", -1, "sink")]
    fn parallelism_below_one_is_rejected(
        #[case] key: &str,
        #[case] value: i64,
        #[case] expected_stage: &str,
    ) {
        let fx = fixture(vec![]);
        let composer = PipelineComposer::local(fx.registry);
        let mut options: Vec<(&str, serde_json::Value)> =
            vec![("pipeline.global.parallelism", 1.into())];
        options.retain(|(k, _)| *k != key);
        options.push((key, value.into()));
        let err = composer.compose(definition(&options)).err().unwrap();
        match err {
            PipelineError::InvalidParallelism { stage, value: got } => {
                assert_eq!(stage, expected_stage);
                assert_eq!(got, value);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unresolvable_sink_fails_before_source_is_built() {
        let fx = fixture(vec![]);
        let composer = PipelineComposer::local(Arc::clone(&fx.registry));
        let mut def = definition(&[("pipeline.global.parallelism", 1.into())]);
        def.sink = SinkDef::new("nowhere", Configuration::new());
        let err = composer.compose(def).err().unwrap();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m.contains("nowhere")));
        assert_eq!(fx.sources_created.load(Ordering::SeqCst), 0);
    }

    #[rstest]
    #[case::coordinator_as_sink("pipeline.schema.operator.uid", "sink", "schema coordinator 'sink'", "sink 'sink'")]
    #[case::source_as_coordinator(
        "pipeline.source.uid",
        "$$_schema_operator_$$",
        "source '$$_schema_operator_$$'",
        "schema coordinator '$$_schema_operator_$$'"
    )]
    #[case::sink_as_partitioner("pipeline.sink.uid", "partitioner", "partitioner 'partitioner'", "sink 'partitioner'")]
    fn colliding_uids_are_rejected(
        #[case] key: &str,
        #[case] uid: &str,
        #[case] expected_first: &str,
        #[case] expected_second: &str,
    ) {
        let fx = fixture(vec![]);
        let composer = PipelineComposer::local(fx.registry);
        let err = composer
            .compose(definition(&[
                ("pipeline.global.parallelism", 1.into()),
                (key, uid.into()),
            ]))
            .err()
            .unwrap();
        match err {
            PipelineError::DuplicateOperatorId { first, second, .. } => {
                assert_eq!(first, expected_first);
                assert_eq!(second, expected_second);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn composed_pipeline_exposes_identity_and_mode() {
        let fx = fixture(vec![]);
        let execution = PipelineComposer::detached(fx.registry)
            .compose(definition(&[
                ("pipeline.global.parallelism", 2.into()),
                ("pipeline.sink.parallelism", 3.into()),
                ("pipeline.name", "orders".into()),
            ]))
            .unwrap();
        assert_eq!(execution.name(), "orders");
        assert!(!execution.is_blocking());
        assert_eq!(execution.coordinator().id(), generate("$$_schema_operator_$$"));
        assert_eq!(execution.partitioner().upstream(), execution.coordinator().id());
        assert_eq!(execution.partitioner().downstream(), execution.sink().id());
        assert_eq!(execution.partitioner().partitions(), 3);
        assert_eq!(execution.source().parallelism(), 2);
    }

    #[test]
    fn blank_name_falls_back() {
        let fx = fixture(vec![]);
        let execution = PipelineComposer::local(fx.registry)
            .compose(definition(&[
                ("pipeline.global.parallelism", 1.into()),
                ("pipeline.name", "  ".into()),
            ]))
            .unwrap();
        assert_eq!(execution.name(), "unnamed pipeline");
    }

    // -----------------------------------------------------------------------
    // Local execution
    // -----------------------------------------------------------------------

    fn partition_of(fx: &Fixture, event: &Event) -> Vec<u32> {
        fx.collected
            .partitions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, events)| events.contains(event))
            .map(|(p, _)| *p)
            .collect()
    }

    #[tokio::test]
    async fn evolve_delivers_schema_change_to_every_partition_before_data() {
        let fx = fixture(vec![add_column("db.t"), insert("db.t", 1)]);
        let execution = PipelineComposer::local(Arc::clone(&fx.registry))
            .compose(definition(&[("pipeline.global.parallelism", 3.into())]))
            .unwrap();
        let ExecutionOutcome::Completed(summary) = execution.execute().await.unwrap() else {
            panic!("local composer must block");
        };
        assert_eq!(summary.coordinator.schema_changes_applied, 1);
        assert_eq!(fx.collected.applied.lock().unwrap().len(), 1);

        assert_eq!(partition_of(&fx, &add_column("db.t")), vec![0, 1, 2]);
        let data_partitions = partition_of(&fx, &insert("db.t", 1));
        assert_eq!(data_partitions.len(), 1);

        let partitions = fx.collected.partitions.lock().unwrap();
        let events = &partitions[&data_partitions[0]];
        assert_eq!(events, &vec![add_column("db.t"), insert("db.t", 1)]);
    }

    #[tokio::test]
    async fn ignore_never_reaches_the_sink() {
        let fx = fixture(vec![add_column("db.t"), insert("db.t", 1)]);
        let execution = PipelineComposer::local(Arc::clone(&fx.registry))
            .compose(definition(&[
                ("pipeline.global.parallelism", 2.into()),
                ("pipeline.schema.change.behavior", "ignore".into()),
            ]))
            .unwrap();
        execution.execute().await.unwrap();
        assert!(partition_of(&fx, &add_column("db.t")).is_empty());
        assert_eq!(partition_of(&fx, &insert("db.t", 1)).len(), 1);
        assert!(fx.collected.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn exception_fails_the_job() {
        let fx = fixture(vec![insert("db.t", 1), add_column("db.t"), insert("db.t", 2)]);
        let execution = PipelineComposer::local(Arc::clone(&fx.registry))
            .compose(definition(&[
                ("pipeline.global.parallelism", 1.into()),
                (
                    "pipeline.schema.change.behavior",
                    SchemaChangeBehavior::Exception.as_str().into(),
                ),
            ]))
            .unwrap();
        let err = execution.execute().await.unwrap_err();
        assert!(matches!(err, PipelineError::SchemaChangeRejected { .. }));
        assert!(partition_of(&fx, &insert("db.t", 2)).is_empty());
    }

    #[tokio::test]
    async fn detached_job_can_be_awaited() {
        let fx = fixture(vec![insert("db.t", 1), insert("db.u", 2)]);
        let execution = PipelineComposer::detached(Arc::clone(&fx.registry))
            .compose(definition(&[("pipeline.global.parallelism", 2.into())]))
            .unwrap();
        let ExecutionOutcome::Submitted(handle) = execution.execute().await.unwrap() else {
            panic!("detached composer must not block");
        };
        let summary = handle.wait().await.unwrap();
        assert_eq!(summary.events_read, 2);
        assert_eq!(summary.events_written, 2);
    }
}
