use std::sync::Arc;

use cdcflow_sdk::connector::DataSink;
use cdcflow_sdk::context::SubtaskContext;
use tokio::sync::mpsc;

use crate::errors::PipelineError;
use crate::identity::OperatorId;
use crate::partitioner::Envelope;
use crate::stages::{StageKind, SubtaskReport};

/// Sink stage: the connector's writers at the sink parallelism.
pub struct SinkStage {
    pub(crate) sink: Arc<dyn DataSink>,
    pub(crate) name: String,
    pub(crate) uid: String,
    pub(crate) id: OperatorId,
    pub(crate) parallelism: u32,
}

impl SinkStage {
    #[must_use]
    pub fn uid(&self) -> &str {
        &self.uid
    }

    #[must_use]
    pub fn id(&self) -> OperatorId {
        self.id
    }

    #[must_use]
    pub fn parallelism(&self) -> u32 {
        self.parallelism
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Write every envelope addressed to this sink partition, then flush.
/// Runs on the blocking pool.
pub(crate) fn run_sink_subtask(
    sink: &dyn DataSink,
    ctx: &SubtaskContext,
    expected: OperatorId,
    mut input: mpsc::Receiver<Envelope>,
) -> Result<SubtaskReport, PipelineError> {
    let mut writer = sink.create_writer(ctx)?;
    let mut written = 0u64;

    while let Some(envelope) = input.blocking_recv() {
        if envelope.downstream != expected || envelope.partition != ctx.index {
            return Err(PipelineError::Infrastructure(anyhow::anyhow!(
                "envelope for {} partition {} reached sink {} partition {}",
                envelope.downstream,
                envelope.partition,
                expected,
                ctx.index
            )));
        }
        writer.write(&envelope.event)?;
        written += 1;
    }
    writer.flush()?;

    tracing::info!(subtask = %ctx, events = written, "Sink subtask finished");
    Ok(SubtaskReport::new(StageKind::Sink, ctx.index, written))
}
