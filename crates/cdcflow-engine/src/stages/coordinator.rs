use std::sync::Arc;

use cdcflow_sdk::connector::MetadataApplier;
use cdcflow_types::{ConnectorError, Event, SchemaChangeBehavior, TableId};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};

use crate::coordinator::{CoordinatorMetrics, SchemaCoordinator, SchemaRegistry, Step};
use crate::errors::PipelineError;
use crate::identity::OperatorId;
use crate::stages::{StageKind, SubtaskReport};

/// Schema coordinator stage: policy, applier and shared bookkeeping.
pub struct SchemaCoordinatorStage {
    pub(crate) behavior: SchemaChangeBehavior,
    pub(crate) applier: Arc<dyn MetadataApplier>,
    pub(crate) uid: String,
    pub(crate) id: OperatorId,
    pub(crate) parallelism: u32,
    /// Events buffered per blocked collection before intake pauses.
    pub(crate) buffer_limit: usize,
    pub(crate) registry: Arc<SchemaRegistry>,
    pub(crate) metrics: Arc<CoordinatorMetrics>,
}

impl SchemaCoordinatorStage {
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    #[must_use]
    pub fn id(&self) -> OperatorId {
        self.id
    }

    #[must_use]
    pub fn behavior(&self) -> SchemaChangeBehavior {
        self.behavior
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    pub(crate) fn state_machine(&self) -> SchemaCoordinator {
        SchemaCoordinator::new(
            self.behavior,
            Arc::clone(&self.registry),
            Arc::clone(&self.metrics),
        )
        .with_buffer_limit(self.buffer_limit)
    }
}

type ApplyResult = (TableId, Result<(), ConnectorError>);

enum Wake {
    Input(Option<Event>),
    Applied(Result<ApplyResult, JoinError>),
}

/// Drive one coordinator subtask until its input is exhausted and no
/// schema change is in flight.
///
/// Applier calls run on the blocking pool while intake continues, so a
/// collection blocked on its change never stalls the others. Intake
/// pauses while a blocked collection's buffer is full.
pub(crate) async fn run_coordinator_subtask(
    index: u32,
    mut coordinator: SchemaCoordinator,
    applier: Arc<dyn MetadataApplier>,
    metrics: Arc<CoordinatorMetrics>,
    mut input: mpsc::Receiver<Event>,
    output: mpsc::Sender<Event>,
) -> Result<SubtaskReport, PipelineError> {
    let mut applies: JoinSet<ApplyResult> = JoinSet::new();
    let mut input_open = true;
    let mut emitted = 0u64;

    loop {
        let wake = tokio::select! {
            biased;
            Some(joined) = applies.join_next(), if !applies.is_empty() => Wake::Applied(joined),
            event = input.recv(), if input_open && !coordinator.is_saturated() => Wake::Input(event),
            else => break,
        };

        let steps = match wake {
            Wake::Input(Some(event)) => vec![coordinator.accept(event)?],
            Wake::Input(None) => {
                input_open = false;
                continue;
            }
            Wake::Applied(joined) => {
                let (table, outcome) = joined.map_err(|e| {
                    PipelineError::Infrastructure(anyhow::anyhow!(
                        "schema change apply task failed: {e}"
                    ))
                })?;
                coordinator.complete(&table, outcome)?
            }
        };

        for step in steps {
            match step {
                Step::Emit(event) => {
                    if output.send(event).await.is_err() {
                        tracing::debug!(index, "Partitioner input closed; stopping coordinator");
                        return Ok(SubtaskReport::new(StageKind::SchemaCoordinator, index, emitted));
                    }
                    metrics.record_emitted();
                    emitted += 1;
                }
                Step::Apply(change) => {
                    let applier = Arc::clone(&applier);
                    applies.spawn_blocking(move || {
                        let outcome = applier.apply_schema_change(&change);
                        (change.table_id, outcome)
                    });
                }
                Step::Ignored(_) | Step::Buffered { .. } => {}
            }
        }
    }

    tracing::info!(index, events = emitted, "Schema coordinator subtask finished");
    Ok(SubtaskReport::new(StageKind::SchemaCoordinator, index, emitted))
}
