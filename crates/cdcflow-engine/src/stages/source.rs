use std::sync::{Arc, Condvar, Mutex, PoisonError};

use cdcflow_sdk::connector::{DataSource, EventReader};
use cdcflow_sdk::context::SubtaskContext;
use cdcflow_sdk::splitter::split_or_whole;
use cdcflow_types::{ChunkDescriptor, ConnectorError, Event};
use tokio::sync::mpsc;

use crate::coordinator::SchemaRegistry;
use crate::errors::PipelineError;
use crate::identity::OperatorId;
use crate::partitioner::subtask_for_table;
use crate::stages::{StageKind, SubtaskReport};

/// Source stage: the connector's event stream at the requested parallelism.
pub struct SourceStage {
    pub(crate) source: Arc<dyn DataSource>,
    pub(crate) name: String,
    pub(crate) uid: String,
    pub(crate) id: OperatorId,
    pub(crate) parallelism: u32,
}

impl SourceStage {
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

/// Discover captured tables, seed the schema registry with their current
/// schemas, split them into chunks and deal the chunks round-robin to
/// `parallelism` reader subtasks.
pub(crate) fn plan_snapshot(
    source: &dyn DataSource,
    parallelism: u32,
    registry: &SchemaRegistry,
) -> Result<Vec<Vec<ChunkDescriptor>>, PipelineError> {
    let accessor = source.metadata_accessor();
    let splitter = source.chunk_splitter();
    let tables = accessor.list_tables()?;

    let mut chunks = Vec::new();
    for table in &tables {
        if let Some(schema) = accessor.table_schema(table)? {
            registry.seed(table.clone(), schema)?;
        }
        match &splitter {
            Some(splitter) => chunks.extend(split_or_whole(splitter.as_ref(), table)?),
            None => chunks.push(ChunkDescriptor::whole_table(table.clone())),
        }
    }

    let slots = usize::try_from(parallelism.max(1)).unwrap_or(1);
    let mut assignments = vec![Vec::new(); slots];
    for (i, chunk) in chunks.into_iter().enumerate() {
        assignments[i % slots].push(chunk);
    }
    tracing::info!(
        tables = tables.len(),
        chunks = assignments.iter().map(Vec::len).sum::<usize>(),
        parallelism,
        "Planned snapshot chunks"
    );
    Ok(assignments)
}

/// Releases the changelog once every reader subtask has emitted its
/// snapshot chunks.
pub(crate) struct SnapshotBarrier {
    state: Mutex<BarrierState>,
    changed: Condvar,
}

struct BarrierState {
    remaining: u32,
    aborted: bool,
}

impl SnapshotBarrier {
    /// One arrival per reader subtask, handed out before any of them starts.
    pub(crate) fn arrivals(readers: u32) -> Vec<SnapshotArrival> {
        let barrier = Arc::new(Self {
            state: Mutex::new(BarrierState {
                remaining: readers,
                aborted: false,
            }),
            changed: Condvar::new(),
        });
        (0..readers)
            .map(|_| SnapshotArrival {
                barrier: Arc::clone(&barrier),
                finished: false,
            })
            .collect()
    }

    fn arrive(&self, finished: bool) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.remaining = state.remaining.saturating_sub(1);
        state.aborted |= !finished;
        self.changed.notify_all();
    }

    /// Block until every reader has arrived. `false` if any of them stopped
    /// before finishing its snapshot.
    pub(crate) fn wait(&self) -> bool {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = self
            .changed
            .wait_while(state, |s| s.remaining > 0 && !s.aborted)
            .unwrap_or_else(PoisonError::into_inner);
        !state.aborted
    }
}

/// A reader's pending arrival at the [`SnapshotBarrier`]. Dropping it
/// unfinished (error, early stop, cancelled task) aborts the barrier.
pub(crate) struct SnapshotArrival {
    barrier: Arc<SnapshotBarrier>,
    finished: bool,
}

impl SnapshotArrival {
    /// Mark this reader's snapshot complete. The arrival lands when `self`
    /// drops on return.
    pub(crate) fn finish(mut self) -> Arc<SnapshotBarrier> {
        self.finished = true;
        Arc::clone(&self.barrier)
    }
}

impl Drop for SnapshotArrival {
    fn drop(&mut self) {
        self.barrier.arrive(self.finished);
    }
}

/// Read one subtask's snapshot chunks, then (leader only, after every
/// reader's snapshot) the changelog. Each event goes to the coordinator
/// subtask owning its collection. Runs on the blocking pool.
pub(crate) fn run_source_subtask(
    source: &dyn DataSource,
    ctx: &SubtaskContext,
    outputs: &[mpsc::Sender<Event>],
    snapshot: SnapshotArrival,
) -> Result<SubtaskReport, PipelineError> {
    let mut reader = source.create_reader(ctx)?;
    let (mut events, open) = forward(reader.as_mut(), ctx, outputs)?;
    reader.close()?;

    if open {
        let barrier = snapshot.finish();
        if ctx.is_leader() {
            if barrier.wait() {
                if let Some(mut changelog) = source.create_changelog_reader(ctx)? {
                    let (read, _) = forward(changelog.as_mut(), ctx, outputs)?;
                    events += read;
                    changelog.close()?;
                }
            } else {
                tracing::debug!(subtask = %ctx, "A reader stopped early; skipping changelog");
            }
        }
    }

    tracing::info!(subtask = %ctx, events, "Source subtask finished");
    Ok(SubtaskReport::new(StageKind::Source, ctx.index, events))
}

/// Route every event `reader` yields. Returns the count forwarded and
/// whether the coordinator inputs are still open.
fn forward(
    reader: &mut dyn EventReader,
    ctx: &SubtaskContext,
    outputs: &[mpsc::Sender<Event>],
) -> Result<(u64, bool), PipelineError> {
    let fanout = u32::try_from(outputs.len()).unwrap_or(u32::MAX);
    let mut events = 0u64;

    while let Some(event) = reader.next_event()? {
        if let Event::DataChange(data) = &event {
            if !data.is_well_formed() {
                return Err(ConnectorError::data(
                    "MALFORMED_EVENT",
                    format!(
                        "{} event for '{}' has row images that don't match the operation",
                        data.op, data.table_id
                    ),
                )
                .into());
            }
        }
        let target = subtask_for_table(event.table_id(), fanout) as usize;
        if outputs[target].blocking_send(event).is_err() {
            tracing::debug!(subtask = %ctx, "Coordinator input closed; stopping reader");
            return Ok((events, false));
        }
        events += 1;
    }
    Ok((events, true))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn barrier_opens_once_every_reader_finishes() {
        let mut arrivals = SnapshotBarrier::arrivals(3);
        let leader = arrivals.remove(0);
        let followers: Vec<_> = arrivals
            .into_iter()
            .map(|arrival| {
                std::thread::spawn(move || {
                    std::thread::sleep(Duration::from_millis(20));
                    drop(arrival.finish());
                })
            })
            .collect();
        assert!(leader.finish().wait());
        for follower in followers {
            follower.join().unwrap();
        }
    }

    #[test]
    fn dropped_arrival_releases_waiting_leader() {
        let mut arrivals = SnapshotBarrier::arrivals(2);
        let follower = arrivals.pop().unwrap();
        let leader = arrivals.pop().unwrap().finish();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            drop(follower);
        });
        assert!(!leader.wait());
        stopper.join().unwrap();
    }

    #[test]
    fn single_reader_never_blocks() {
        let arrival = SnapshotBarrier::arrivals(1).pop().unwrap();
        assert!(arrival.finish().wait());
    }
}
