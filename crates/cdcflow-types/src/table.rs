//! Collection identifiers.

use serde::{Deserialize, Serialize};

/// Identifier of a captured data collection (e.g. `"inventory.products"`).
///
/// Kept opaque on purpose: connectors choose how many dotted segments
/// they need (`table`, `schema.table`, `catalog.schema.table`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TableId(String);

impl TableId {
    /// Create a new table identifier.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Build a `schema.table` identifier.
    #[must_use]
    pub fn of(schema: &str, table: &str) -> Self {
        Self(format!("{schema}.{table}"))
    }

    /// Borrow the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Last dotted segment, i.e. the bare table name.
    #[must_use]
    pub fn table_name(&self) -> &str {
        self.0.rsplit('.').next().unwrap_or(&self.0)
    }
}

impl std::fmt::Display for TableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl<S: Into<String>> From<S> for TableId {
    fn from(value: S) -> Self {
        Self(value.into())
    }
}
