//! Snapshot chunk descriptors.

use serde::{Deserialize, Serialize};

use crate::table::TableId;
use crate::value::Value;

/// Half-open key range `[low, high)` of one collection, scanned as a unit
/// during the initial snapshot.
///
/// `low == None` is unbounded below, `high == None` is unbounded above.
/// A whole-table chunk has both bounds open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkDescriptor {
    pub table_id: TableId,
    pub ordinal: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub low: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub high: Option<Value>,
}

impl ChunkDescriptor {
    #[must_use]
    pub fn new(table_id: TableId, ordinal: u32, low: Option<Value>, high: Option<Value>) -> Self {
        Self {
            table_id,
            ordinal,
            low,
            high,
        }
    }

    /// Single chunk covering the whole collection.
    #[must_use]
    pub fn whole_table(table_id: TableId) -> Self {
        Self::new(table_id, 0, None, None)
    }

    #[must_use]
    pub fn is_whole_table(&self) -> bool {
        self.low.is_none() && self.high.is_none()
    }

    /// Stable identifier `"<table>:<ordinal>"`.
    #[must_use]
    pub fn split_id(&self) -> String {
        format!("{}:{}", self.table_id, self.ordinal)
    }

    /// Whether `key` satisfies `low <= key < high`.
    #[must_use]
    pub fn contains(&self, key: &Value) -> bool {
        let above_low = self.low.as_ref().map_or(true, |low| key >= low);
        let below_high = self.high.as_ref().map_or(true, |high| key < high);
        above_low && below_high
    }
}

impl std::fmt::Display for ChunkDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let low = self
            .low
            .as_ref()
            .map_or_else(|| "-inf".to_string(), ToString::to_string);
        let high = self
            .high
            .as_ref()
            .map_or_else(|| "+inf".to_string(), ToString::to_string);
        write!(f, "{}#{} [{low}, {high})", self.table_id, self.ordinal)
    }
}
