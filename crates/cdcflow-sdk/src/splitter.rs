//! Snapshot chunk splitting.
//!
//! A [`ChunkSplitter`] cuts one collection into ordered half-open key
//! ranges that together cover the whole key domain without overlap. The
//! first chunk is unbounded below and the last is unbounded above, so a
//! row whose key was not seen while splitting still lands in exactly one
//! chunk.

use cdcflow_types::{ChunkDescriptor, ConnectorError, TableId, Value};

/// Default target rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 8096;

/// Default sampling stride (every key is read).
pub const DEFAULT_SAMPLING_STRIDE: usize = 1;

#[derive(Debug, thiserror::Error)]
pub enum SplitError {
    #[error("collection '{table}' cannot be split: {reason}")]
    Unsplittable { table: TableId, reason: String },

    #[error("chunk size and sampling stride must be at least 1 (chunk size {chunk_size}, stride {stride})")]
    InvalidChunkSize { chunk_size: usize, stride: usize },

    #[error("failed to sample keys: {0}")]
    Sampling(#[from] ConnectorError),
}

/// Produces the snapshot chunks of a collection.
pub trait ChunkSplitter: Send + Sync {
    /// # Errors
    ///
    /// [`SplitError::Unsplittable`] when the collection has no usable key;
    /// other variants for invalid sizing or sampling failures.
    fn generate_splits(&self, table: &TableId) -> Result<Vec<ChunkDescriptor>, SplitError>;
}

/// Observes actual key values of a collection.
pub trait KeySampler: Send + Sync {
    /// Single-column key usable for range splitting, `None` if the
    /// collection has none.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when the catalog can't be read.
    fn key_column(&self, table: &TableId) -> Result<Option<String>, ConnectorError>;

    /// Distinct key values in ascending order, keeping only every
    /// `stride`-th one (the first value is always kept).
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError`] when keys can't be read.
    fn sample_key_values(&self, table: &TableId, stride: usize) -> Result<Vec<Value>, ConnectorError>;
}

/// Equal-row-count splitter with boundaries on real key values.
///
/// Every `chunk_size`-th distinct key starts a new chunk. With a
/// `sampling_stride` above 1 only every n-th key is observed and the
/// boundary spacing is scaled down so chunks keep roughly `chunk_size`
/// rows.
pub struct SampledChunkSplitter<S> {
    sampler: S,
    chunk_size: usize,
    sampling_stride: usize,
}

impl<S: KeySampler> SampledChunkSplitter<S> {
    #[must_use]
    pub fn new(sampler: S, chunk_size: usize, sampling_stride: usize) -> Self {
        Self {
            sampler,
            chunk_size,
            sampling_stride,
        }
    }

    fn boundaries(&self, samples: &[Value]) -> Vec<Value> {
        let step = (self.chunk_size / self.sampling_stride).max(1);
        samples.iter().skip(step).step_by(step).cloned().collect()
    }
}

impl<S: KeySampler> ChunkSplitter for SampledChunkSplitter<S> {
    fn generate_splits(&self, table: &TableId) -> Result<Vec<ChunkDescriptor>, SplitError> {
        if self.chunk_size == 0 || self.sampling_stride == 0 {
            return Err(SplitError::InvalidChunkSize {
                chunk_size: self.chunk_size,
                stride: self.sampling_stride,
            });
        }
        if self.sampler.key_column(table)?.is_none() {
            return Err(SplitError::Unsplittable {
                table: table.clone(),
                reason: "no single-column primary key".into(),
            });
        }

        let mut samples = self.sampler.sample_key_values(table, self.sampling_stride)?;
        samples.sort();
        samples.dedup();
        let boundaries = self.boundaries(&samples);

        Ok(chunks_from_boundaries(table, boundaries))
    }
}

/// Turn ascending boundaries `b1 < b2 < ... < bn` into the chunks
/// `(-inf, b1) [b1, b2) ... [bn, +inf)`.
#[must_use]
pub fn chunks_from_boundaries(table: &TableId, boundaries: Vec<Value>) -> Vec<ChunkDescriptor> {
    let mut chunks = Vec::with_capacity(boundaries.len() + 1);
    let mut low = None;
    for (ordinal, high) in (0u32..).zip(boundaries) {
        chunks.push(ChunkDescriptor::new(table.clone(), ordinal, low, Some(high.clone())));
        low = Some(high);
    }
    let last = u32::try_from(chunks.len()).unwrap_or(u32::MAX);
    chunks.push(ChunkDescriptor::new(table.clone(), last, low, None));
    chunks
}

/// Split `table`, falling back to a single whole-table chunk when the
/// collection has no usable key.
///
/// # Errors
///
/// Propagates every [`SplitError`] other than `Unsplittable`.
pub fn split_or_whole(
    splitter: &dyn ChunkSplitter,
    table: &TableId,
) -> Result<Vec<ChunkDescriptor>, SplitError> {
    match splitter.generate_splits(table) {
        Ok(chunks) => Ok(chunks),
        Err(SplitError::Unsplittable { table, reason }) => {
            tracing::warn!(
                table = %table,
                reason = %reason,
                "Collection cannot be split; reading it as a single chunk"
            );
            Ok(vec![ChunkDescriptor::whole_table(table)])
        }
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use proptest::prelude::*;

    use super::*;

    struct FixedKeys {
        keys: BTreeMap<TableId, Vec<Value>>,
    }

    impl FixedKeys {
        fn of(table: &str, keys: impl IntoIterator<Item = i64>) -> Self {
            Self {
                keys: BTreeMap::from([(
                    TableId::new(table),
                    keys.into_iter().map(Value::from).collect(),
                )]),
            }
        }
    }

    impl KeySampler for FixedKeys {
        fn key_column(&self, table: &TableId) -> Result<Option<String>, ConnectorError> {
            Ok(self.keys.contains_key(table).then(|| "id".to_string()))
        }

        fn sample_key_values(
            &self,
            table: &TableId,
            stride: usize,
        ) -> Result<Vec<Value>, ConnectorError> {
            let mut keys = self.keys.get(table).cloned().unwrap_or_default();
            keys.sort();
            Ok(keys.into_iter().step_by(stride).collect())
        }
    }

    fn bounds(chunks: &[ChunkDescriptor]) -> Vec<(Option<i64>, Option<i64>)> {
        chunks
            .iter()
            .map(|c| {
                (
                    c.low.as_ref().and_then(Value::as_i64),
                    c.high.as_ref().and_then(Value::as_i64),
                )
            })
            .collect()
    }

    #[test]
    fn ten_keys_chunk_size_three() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("db.t", 1..=10), 3, 1);
        let chunks = splitter.generate_splits(&TableId::new("db.t")).unwrap();
        assert_eq!(
            bounds(&chunks),
            vec![
                (None, Some(4)),
                (Some(4), Some(7)),
                (Some(7), Some(10)),
                (Some(10), None),
            ]
        );
        let ordinals: Vec<u32> = chunks.iter().map(|c| c.ordinal).collect();
        assert_eq!(ordinals, vec![0, 1, 2, 3]);
    }

    #[test]
    fn stride_keeps_boundaries_on_real_keys() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", (1..=20).map(|k| k * 5)), 4, 2);
        let chunks = splitter.generate_splits(&TableId::new("t")).unwrap();
        for chunk in &chunks {
            if let Some(high) = chunk.high.as_ref().and_then(Value::as_i64) {
                assert_eq!(high % 5, 0, "boundary {high} is not an existing key");
            }
        }
        assert_eq!(chunks.len(), 5);
    }

    #[test]
    fn empty_collection_is_one_chunk() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", []), 3, 1);
        let chunks = splitter.generate_splits(&TableId::new("t")).unwrap();
        assert_eq!(chunks, vec![ChunkDescriptor::whole_table(TableId::new("t"))]);
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", 1..=3), 0, 1);
        assert!(matches!(
            splitter.generate_splits(&TableId::new("t")),
            Err(SplitError::InvalidChunkSize { chunk_size: 0, .. })
        ));
    }

    #[test]
    fn keyless_collection_is_unsplittable() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", 1..=3), 2, 1);
        assert!(matches!(
            splitter.generate_splits(&TableId::new("other")),
            Err(SplitError::Unsplittable { .. })
        ));
    }

    #[test]
    fn split_or_whole_falls_back_for_keyless_collection() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", 1..=3), 2, 1);
        let chunks = split_or_whole(&splitter, &TableId::new("other")).unwrap();
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].is_whole_table());
        assert_eq!(chunks[0].ordinal, 0);
    }

    #[test]
    fn split_or_whole_propagates_sizing_errors() {
        let splitter = SampledChunkSplitter::new(FixedKeys::of("t", 1..=3), 2, 0);
        assert!(split_or_whole(&splitter, &TableId::new("t")).is_err());
    }

    proptest! {
        #[test]
        fn chunks_cover_every_key_exactly_once(
            keys in proptest::collection::btree_set(-1000i64..1000, 0..200),
            lookups in proptest::collection::vec(-2000i64..2000, 0..50),
            chunk_size in 1usize..40,
            stride in 1usize..5,
        ) {
            let splitter = SampledChunkSplitter::new(FixedKeys::of("t", keys.iter().copied()), chunk_size, stride);
            let chunks = splitter.generate_splits(&TableId::new("t")).unwrap();

            prop_assert!(chunks.first().unwrap().low.is_none());
            prop_assert!(chunks.last().unwrap().high.is_none());
            for pair in chunks.windows(2) {
                prop_assert_eq!(&pair[0].high, &pair[1].low);
                prop_assert!(pair[0].high.is_some());
            }
            for key in keys.iter().chain(lookups.iter()) {
                let value = Value::from(*key);
                let owners = chunks.iter().filter(|c| c.contains(&value)).count();
                prop_assert_eq!(owners, 1, "key {} owned by {} chunks", key, owners);
            }
        }
    }
}
