//! Local execution of a composed pipeline.
//!
//! Every subtask runs as a tokio task. Stages are connected by bounded
//! channels:
//!
//! ```text
//! source[i] ──by table──▶ coordinator[j] ──1:1──▶ partitioner[j] ──by key──▶ sink[k]
//! ```
//!
//! Subtask results are collected fail-fast: the first error aborts the
//! remaining tasks and is returned from [`PipelineExecution::execute`].

use std::sync::Arc;
use std::time::Instant;

use cdcflow_sdk::context::SubtaskContext;
use cdcflow_types::Event;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::coordinator::{CoordinatorStats, SchemaRegistry};
use crate::errors::PipelineError;
use crate::identity::OperatorId;
use crate::partitioner::{Envelope, Partitioner};
use crate::stages::coordinator::{run_coordinator_subtask, SchemaCoordinatorStage};
use crate::stages::partitioner::run_partitioner_subtask;
use crate::stages::sink::{run_sink_subtask, SinkStage};
use crate::stages::source::{plan_snapshot, run_source_subtask, SnapshotBarrier, SourceStage};
use crate::stages::{StageKind, SubtaskReport};

/// A composed, ready-to-run pipeline.
pub struct PipelineExecution {
    pub(crate) name: String,
    pub(crate) blocking: bool,
    pub(crate) channel_capacity: usize,
    pub(crate) source: SourceStage,
    pub(crate) coordinator: SchemaCoordinatorStage,
    pub(crate) partitioner: Partitioner,
    pub(crate) partitioner_id: OperatorId,
    pub(crate) sink: SinkStage,
}

/// Result of [`PipelineExecution::execute`].
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Blocking mode: the pipeline ran to completion.
    Completed(ExecutionSummary),
    /// Non-blocking mode: the pipeline was submitted and is running.
    Submitted(JobHandle),
}

/// Counters for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionSummary {
    pub pipeline_name: String,
    pub events_read: u64,
    pub events_written: u64,
    pub events_routed: u64,
    pub coordinator: CoordinatorStats,
    pub subtasks: Vec<SubtaskReport>,
    pub duration_secs: f64,
}

/// Handle to a pipeline submitted in non-blocking mode.
#[derive(Debug)]
pub struct JobHandle {
    name: String,
    handle: JoinHandle<Result<ExecutionSummary, PipelineError>>,
}

impl JobHandle {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wait for the job to finish.
    ///
    /// # Errors
    ///
    /// The pipeline's own error, or `Infrastructure` if the job panicked
    /// or was cancelled.
    pub async fn wait(self) -> Result<ExecutionSummary, PipelineError> {
        match self.handle.await {
            Ok(result) => result,
            Err(join_err) => Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "Pipeline job '{}' did not finish: {join_err}",
                self.name
            ))),
        }
    }

    /// Cancel the job. Its channels are dropped, which stops the
    /// connector subtasks still running on the blocking pool.
    pub fn abort(&self) {
        tracing::info!(pipeline = %self.name, "Cancelling pipeline job");
        self.handle.abort();
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl PipelineExecution {
    /// Pipeline name, or "unnamed pipeline" when none was configured.
    #[must_use]
    pub fn name(&self) -> &str {
        if self.name.trim().is_empty() {
            "unnamed pipeline"
        } else {
            &self.name
        }
    }

    /// Whether [`execute`](Self::execute) waits for the pipeline to finish.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.blocking
    }

    /// Schemas applied by the coordinator so far.
    #[must_use]
    pub fn schema_registry(&self) -> Arc<SchemaRegistry> {
        Arc::clone(&self.coordinator.registry)
    }

    /// Operator ids of the four stages, in flow order.
    #[must_use]
    pub fn operator_ids(&self) -> [(StageKind, OperatorId); 4] {
        [
            (StageKind::Source, self.source.id),
            (StageKind::SchemaCoordinator, self.coordinator.id),
            (StageKind::Partitioner, self.partitioner_id),
            (StageKind::Sink, self.sink.id),
        ]
    }

    #[must_use]
    pub fn source(&self) -> &SourceStage {
        &self.source
    }

    #[must_use]
    pub fn coordinator(&self) -> &SchemaCoordinatorStage {
        &self.coordinator
    }

    #[must_use]
    pub fn partitioner(&self) -> &Partitioner {
        &self.partitioner
    }

    #[must_use]
    pub fn sink(&self) -> &SinkStage {
        &self.sink
    }

    /// Run the pipeline.
    ///
    /// In blocking mode this returns once every stage has terminated. In
    /// non-blocking mode the pipeline is spawned and a [`JobHandle`] is
    /// returned immediately.
    ///
    /// # Errors
    ///
    /// In blocking mode, the first subtask failure.
    pub async fn execute(self) -> Result<ExecutionOutcome, PipelineError> {
        if self.blocking {
            return self.run().await.map(ExecutionOutcome::Completed);
        }
        let name = self.name().to_string();
        tracing::info!(pipeline = %name, "Submitting pipeline job");
        let handle = tokio::spawn(self.run());
        Ok(ExecutionOutcome::Submitted(JobHandle { name, handle }))
    }

    async fn run(self) -> Result<ExecutionSummary, PipelineError> {
        let start = Instant::now();
        let name = self.name().to_string();
        tracing::info!(
            pipeline = %name,
            source_parallelism = self.source.parallelism,
            coordinator_parallelism = self.coordinator.parallelism,
            sink_parallelism = self.sink.parallelism,
            "Starting pipeline"
        );

        let assignments = {
            let source = Arc::clone(&self.source.source);
            let registry = Arc::clone(&self.coordinator.registry);
            let parallelism = self.source.parallelism;
            tokio::task::spawn_blocking(move || {
                plan_snapshot(source.as_ref(), parallelism, &registry)
            })
            .await
            .map_err(|e| {
                PipelineError::Infrastructure(anyhow::anyhow!("Snapshot planning panicked: {e}"))
            })??
        };

        let capacity = self.channel_capacity.max(1);
        let mut tasks: JoinSet<Result<SubtaskReport, PipelineError>> = JoinSet::new();

        // Sinks first so every downstream receiver exists before anything sends.
        let mut sink_txs: Vec<mpsc::Sender<Envelope>> = Vec::new();
        for index in 0..self.sink.parallelism {
            let (tx, rx) = mpsc::channel::<Envelope>(capacity);
            sink_txs.push(tx);
            let sink = Arc::clone(&self.sink.sink);
            let ctx = SubtaskContext::new(&name, &self.sink.uid, index, self.sink.parallelism);
            let expected = self.sink.id;
            tasks.spawn_blocking(move || run_sink_subtask(sink.as_ref(), &ctx, expected, rx));
        }

        let mut coordinator_txs: Vec<mpsc::Sender<Event>> = Vec::new();
        for index in 0..self.coordinator.parallelism {
            let (coord_tx, coord_rx) = mpsc::channel::<Event>(capacity);
            let (part_tx, part_rx) = mpsc::channel::<Event>(capacity);
            coordinator_txs.push(coord_tx);

            tasks.spawn(run_partitioner_subtask(
                index,
                self.partitioner.clone(),
                part_rx,
                sink_txs.clone(),
            ));
            tasks.spawn(run_coordinator_subtask(
                index,
                self.coordinator.state_machine(),
                Arc::clone(&self.coordinator.applier),
                Arc::clone(&self.coordinator.metrics),
                coord_rx,
                part_tx,
            ));
        }
        drop(sink_txs);

        // Arrivals exist before any reader starts, so a reader cancelled
        // before it runs still releases the leader.
        let readers = u32::try_from(assignments.len()).unwrap_or(u32::MAX);
        let arrivals = SnapshotBarrier::arrivals(readers);
        for ((index, chunks), snapshot) in (0u32..).zip(assignments).zip(arrivals) {
            let source = Arc::clone(&self.source.source);
            let ctx = SubtaskContext::new(&name, &self.source.uid, index, self.source.parallelism)
                .with_chunks(chunks);
            let outputs = coordinator_txs.clone();
            tasks.spawn_blocking(move || {
                run_source_subtask(source.as_ref(), &ctx, &outputs, snapshot)
            });
        }
        drop(coordinator_txs);

        let subtasks = collect_subtask_results(tasks).await?;
        let summary = summarize(name, subtasks, &self.coordinator, start);
        tracing::info!(
            pipeline = %summary.pipeline_name,
            events_read = summary.events_read,
            events_written = summary.events_written,
            schema_changes_applied = summary.coordinator.schema_changes_applied,
            schema_changes_ignored = summary.coordinator.schema_changes_ignored,
            duration_secs = summary.duration_secs,
            "Pipeline completed"
        );
        Ok(summary)
    }
}

fn summarize(
    pipeline_name: String,
    mut subtasks: Vec<SubtaskReport>,
    coordinator: &SchemaCoordinatorStage,
    start: Instant,
) -> ExecutionSummary {
    let total = |kind: StageKind, reports: &[SubtaskReport]| -> u64 {
        reports
            .iter()
            .filter(|r| r.stage == kind)
            .map(|r| r.events)
            .sum()
    };
    subtasks.sort_by_key(|r| (r.stage as u8, r.index));
    ExecutionSummary {
        pipeline_name,
        events_read: total(StageKind::Source, &subtasks),
        events_written: total(StageKind::Sink, &subtasks),
        events_routed: total(StageKind::Partitioner, &subtasks),
        coordinator: coordinator.metrics.snapshot(),
        subtasks,
        duration_secs: start.elapsed().as_secs_f64(),
    }
}

async fn collect_subtask_results(
    mut tasks: JoinSet<Result<SubtaskReport, PipelineError>>,
) -> Result<Vec<SubtaskReport>, PipelineError> {
    let mut reports = Vec::new();
    let mut first_error: Option<PipelineError> = None;

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(report)) if first_error.is_none() => reports.push(report),
            Ok(Ok(_)) => {}
            Ok(Err(error)) => {
                tracing::error!("Subtask failed: {}", error);
                if first_error.is_none() {
                    first_error = Some(error);
                    tasks.abort_all();
                }
            }
            Err(join_err) if join_err.is_cancelled() && first_error.is_some() => {
                // Siblings cancelled after the first failure.
            }
            Err(join_err) => {
                tasks.abort_all();
                return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                    "Subtask panicked: {join_err}"
                )));
            }
        }
    }

    match first_error {
        Some(error) => Err(error),
        None => Ok(reports),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn exploding_reader() -> Result<SubtaskReport, PipelineError> {
        panic!("reader exploded")
    }

    #[tokio::test]
    async fn first_error_wins_and_aborts_siblings() {
        let mut tasks: JoinSet<Result<SubtaskReport, PipelineError>> = JoinSet::new();
        tasks.spawn(async { Err(PipelineError::Configuration("boom".into())) });
        tasks.spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(30)).await;
            Ok(SubtaskReport::new(StageKind::Sink, 0, 0))
        });

        let err = collect_subtask_results(tasks).await.unwrap_err();
        assert!(matches!(err, PipelineError::Configuration(ref m) if m == "boom"));
    }

    #[tokio::test]
    async fn all_reports_collected_on_success() {
        let mut tasks: JoinSet<Result<SubtaskReport, PipelineError>> = JoinSet::new();
        for index in 0..3 {
            tasks.spawn(async move { Ok(SubtaskReport::new(StageKind::Source, index, 5)) });
        }
        let reports = collect_subtask_results(tasks).await.unwrap();
        assert_eq!(reports.len(), 3);
        assert_eq!(reports.iter().map(|r| r.events).sum::<u64>(), 15);
    }

    #[tokio::test]
    async fn panicking_subtask_is_infrastructure_error() {
        let mut tasks: JoinSet<Result<SubtaskReport, PipelineError>> = JoinSet::new();
        tasks.spawn(exploding_reader());
        let err = collect_subtask_results(tasks).await.unwrap_err();
        assert!(matches!(err, PipelineError::Infrastructure(_)));
    }
}
