//! Event routing between the schema coordinator and the sink.
//!
//! Data events go to exactly one of N sink partitions, chosen by a fixed
//! hash of the collection id and the encoded primary key, so every event
//! of one key lands on the same partition across runs. Schema change
//! events are broadcast to all N partitions.

use cdcflow_types::{DataChangeEvent, Event, TableId, Value};
use xxhash_rust::xxh3::xxh3_64;

use crate::errors::PipelineError;
use crate::identity::OperatorId;

/// A routed event.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub event: Event,
    pub partition: u32,
    /// Stage the event was released by.
    pub upstream: OperatorId,
    /// Stage the event is addressed to.
    pub downstream: OperatorId,
}

/// Partition of `(table, key)` among `partitions` targets. An empty key
/// routes by collection id alone.
///
/// `partitions` must be at least 1.
#[must_use]
pub fn partition_for(table: &TableId, key: &[Value], partitions: u32) -> u32 {
    let mut buf = Vec::with_capacity(table.as_str().len() + key.len() * 9);
    buf.extend_from_slice(table.as_str().as_bytes());
    for value in key {
        value.encode_into(&mut buf);
    }
    let bucket = xxh3_64(&buf) % u64::from(partitions.max(1));
    u32::try_from(bucket).unwrap_or(0)
}

/// Subtask of a `parallelism`-wide stage that owns `table`.
#[must_use]
pub fn subtask_for_table(table: &TableId, parallelism: u32) -> u32 {
    partition_for(table, &[], parallelism)
}

#[derive(Debug, Clone)]
pub struct Partitioner {
    partitions: u32,
    upstream: OperatorId,
    downstream: OperatorId,
}

impl Partitioner {
    /// # Errors
    ///
    /// [`PipelineError::InvalidParallelism`] when `partitions < 1`.
    pub fn new(
        partitions: i64,
        upstream: OperatorId,
        downstream: OperatorId,
    ) -> Result<Self, PipelineError> {
        let partitions = u32::try_from(partitions)
            .ok()
            .filter(|n| *n >= 1)
            .ok_or(PipelineError::InvalidParallelism {
                stage: "partitioner downstream".to_string(),
                value: partitions,
            })?;
        Ok(Self {
            partitions,
            upstream,
            downstream,
        })
    }

    #[must_use]
    pub fn partitions(&self) -> u32 {
        self.partitions
    }

    #[must_use]
    pub fn upstream(&self) -> OperatorId {
        self.upstream
    }

    #[must_use]
    pub fn downstream(&self) -> OperatorId {
        self.downstream
    }

    #[must_use]
    pub fn partition_of(&self, event: &DataChangeEvent) -> u32 {
        partition_for(&event.table_id, &event.key, self.partitions)
    }

    /// Envelopes for one event: one for a data change, N for a schema change.
    #[must_use]
    pub fn route(&self, event: Event) -> Vec<Envelope> {
        match &event {
            Event::DataChange(data) => {
                let partition = self.partition_of(data);
                vec![self.envelope(event, partition)]
            }
            Event::SchemaChange(_) => (0..self.partitions)
                .map(|partition| self.envelope(event.clone(), partition))
                .collect(),
        }
    }

    fn envelope(&self, event: Event, partition: u32) -> Envelope {
        Envelope {
            event,
            partition,
            upstream: self.upstream,
            downstream: self.downstream,
        }
    }
}
