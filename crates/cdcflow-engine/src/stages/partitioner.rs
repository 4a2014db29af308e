use cdcflow_types::Event;
use tokio::sync::mpsc;

use crate::errors::PipelineError;
use crate::partitioner::{Envelope, Partitioner};
use crate::stages::{StageKind, SubtaskReport};

/// Route one coordinator subtask's output across the sink partitions.
pub(crate) async fn run_partitioner_subtask(
    index: u32,
    partitioner: Partitioner,
    mut input: mpsc::Receiver<Event>,
    outputs: Vec<mpsc::Sender<Envelope>>,
) -> Result<SubtaskReport, PipelineError> {
    if outputs.len() != partitioner.partitions() as usize {
        return Err(PipelineError::Infrastructure(anyhow::anyhow!(
            "partitioner expects {} sink channels, got {}",
            partitioner.partitions(),
            outputs.len()
        )));
    }

    let mut routed = 0u64;
    while let Some(event) = input.recv().await {
        for envelope in partitioner.route(event) {
            let target = envelope.partition as usize;
            if outputs[target].send(envelope).await.is_err() {
                tracing::debug!(index, partition = target, "Sink input closed; stopping partitioner");
                return Ok(SubtaskReport::new(StageKind::Partitioner, index, routed));
            }
            routed += 1;
        }
    }

    tracing::info!(index, envelopes = routed, "Partitioner subtask finished");
    Ok(SubtaskReport::new(StageKind::Partitioner, index, routed))
}
