//! Change events flowing through a pipeline.
//!
//! Every [`Event`] names the collection it belongs to. Data events carry
//! row images and the primary-key values used for partitioning; schema
//! events carry a [`SchemaChange`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::schema::SchemaChange;
use crate::table::TableId;
use crate::value::Value;

/// Row image keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Row-level operation captured from the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
        })
    }
}

/// A row-level change.
///
/// Construct via [`DataChangeEvent::insert`], [`DataChangeEvent::update`]
/// or [`DataChangeEvent::delete`] so the before/after images always
/// match the operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataChangeEvent {
    pub table_id: TableId,
    pub op: OperationKind,
    /// Primary-key values, in primary-key column order.
    #[serde(default)]
    pub key: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<Row>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<Row>,
    /// Connector-defined metadata (source offsets, timestamps, ...).
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: BTreeMap<String, String>,
}

impl DataChangeEvent {
    #[must_use]
    pub fn insert(table_id: TableId, key: Vec<Value>, after: Row) -> Self {
        Self {
            table_id,
            op: OperationKind::Insert,
            key,
            before: None,
            after: Some(after),
            meta: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn update(table_id: TableId, key: Vec<Value>, before: Row, after: Row) -> Self {
        Self {
            table_id,
            op: OperationKind::Update,
            key,
            before: Some(before),
            after: Some(after),
            meta: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn delete(table_id: TableId, key: Vec<Value>, before: Row) -> Self {
        Self {
            table_id,
            op: OperationKind::Delete,
            key,
            before: Some(before),
            after: None,
            meta: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.insert(key.into(), value.into());
        self
    }

    /// Whether the row images agree with the operation kind.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        match self.op {
            OperationKind::Insert => self.before.is_none() && self.after.is_some(),
            OperationKind::Update => self.before.is_some() && self.after.is_some(),
            OperationKind::Delete => self.before.is_some() && self.after.is_none(),
        }
    }
}

/// A structural change to one collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaChangeEvent {
    pub table_id: TableId,
    pub change: SchemaChange,
}

impl SchemaChangeEvent {
    #[must_use]
    pub fn new(table_id: TableId, change: SchemaChange) -> Self {
        Self { table_id, change }
    }
}

/// Any event flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    DataChange(DataChangeEvent),
    SchemaChange(SchemaChangeEvent),
}

impl Event {
    #[must_use]
    pub fn table_id(&self) -> &TableId {
        match self {
            Self::DataChange(e) => &e.table_id,
            Self::SchemaChange(e) => &e.table_id,
        }
    }

    #[must_use]
    pub fn is_schema_change(&self) -> bool {
        matches!(self, Self::SchemaChange(_))
    }

    #[must_use]
    pub fn as_data_change(&self) -> Option<&DataChangeEvent> {
        match self {
            Self::DataChange(e) => Some(e),
            Self::SchemaChange(_) => None,
        }
    }
}

impl From<DataChangeEvent> for Event {
    fn from(e: DataChangeEvent) -> Self {
        Self::DataChange(e)
    }
}

impl From<SchemaChangeEvent> for Event {
    fn from(e: SchemaChangeEvent) -> Self {
        Self::SchemaChange(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64) -> Row {
        Row::from([("id".to_string(), Value::from(id))])
    }

    #[test]
    fn constructors_are_well_formed() {
        let t = TableId::new("db.t");
        assert!(DataChangeEvent::insert(t.clone(), vec![1.into()], row(1)).is_well_formed());
        assert!(DataChangeEvent::update(t.clone(), vec![1.into()], row(1), row(1)).is_well_formed());
        assert!(DataChangeEvent::delete(t, vec![1.into()], row(1)).is_well_formed());
    }

    #[test]
    fn insert_with_before_image_is_malformed() {
        let mut e = DataChangeEvent::insert(TableId::new("t"), vec![], row(1));
        e.before = Some(row(0));
        assert!(!e.is_well_formed());
    }

    #[test]
    fn event_json_is_tagged() {
        let e: Event = DataChangeEvent::insert(TableId::new("db.t"), vec![1.into()], row(1)).into();
        let json = serde_json::to_value(&e).unwrap();
        assert_eq!(json["type"], "data_change");
        assert_eq!(json["op"], "insert");
        assert_eq!(json["after"]["id"], 1);
        assert!(json.get("before").is_none());
    }

    #[test]
    fn parses_schema_change_from_json() {
        let json = r#"{"type":"schema_change","table_id":"db.t",
            "change":{"kind":"drop_columns","names":["x"]}}"#;
        let e: Event = serde_json::from_str(json).unwrap();
        assert!(e.is_schema_change());
        assert_eq!(e.table_id().as_str(), "db.t");
    }
}
