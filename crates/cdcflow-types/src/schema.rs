//! Table schemas and structural change descriptions.
//!
//! A [`Schema`] is the column layout of one collection. A [`SchemaChange`]
//! describes one structural change; [`Schema::apply`] evolves a schema
//! by a change and rejects changes that do not fit it.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Logical column data type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Boolean,
    Int32,
    Int64,
    Float64,
    Decimal { precision: u8, scale: i8 },
    Varchar { length: u32 },
    String,
    Bytes,
    Date,
    Timestamp,
    Json,
}

/// Column definition within a schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Column {
    pub name: String,
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
}

fn default_nullable() -> bool {
    true
}

impl Column {
    #[must_use]
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: true,
        }
    }

    #[must_use]
    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Column layout and primary key of a collection.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
}

/// Where an added column is placed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnPosition {
    First,
    #[default]
    Last,
    After(String),
    Before(String),
}

/// A column added by [`SchemaChange::AddColumns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddedColumn {
    pub column: Column,
    #[serde(default)]
    pub position: ColumnPosition,
}

/// Structural change to a collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchemaChange {
    CreateTable { schema: Schema },
    AddColumns { columns: Vec<AddedColumn> },
    DropColumns { names: Vec<String> },
    AlterColumnTypes { types: BTreeMap<String, DataType> },
    RenameColumns { renames: BTreeMap<String, String> },
}

impl SchemaChange {
    /// Short operator-facing name of the change kind.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateTable { .. } => "create_table",
            Self::AddColumns { .. } => "add_columns",
            Self::DropColumns { .. } => "drop_columns",
            Self::AlterColumnTypes { .. } => "alter_column_types",
            Self::RenameColumns { .. } => "rename_columns",
        }
    }
}

/// Errors raised when a change does not fit the schema it is applied to.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SchemaError {
    #[error("table already exists")]
    TableAlreadyExists,

    #[error("table has no known schema")]
    UnknownTable,

    #[error("column '{0}' does not exist")]
    UnknownColumn(String),

    #[error("column '{0}' already exists")]
    DuplicateColumn(String),

    #[error("primary key column '{0}' cannot be dropped")]
    PrimaryKeyColumn(String),
}

impl Schema {
    #[must_use]
    pub fn new(columns: Vec<Column>, primary_keys: Vec<String>) -> Self {
        Self {
            columns,
            primary_keys,
        }
    }

    #[must_use]
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, SchemaError> {
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| SchemaError::UnknownColumn(name.to_string()))
    }

    #[must_use]
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    /// Evolve `current` (the schema known so far, `None` for an unseen
    /// table) by `change`.
    ///
    /// # Errors
    ///
    /// Returns a [`SchemaError`] when the change references columns that
    /// don't exist, re-adds existing ones, or creates a table twice.
    pub fn apply(current: Option<&Schema>, change: &SchemaChange) -> Result<Schema, SchemaError> {
        let current = match (current, change) {
            (None, SchemaChange::CreateTable { schema }) => return Ok(schema.clone()),
            (None, _) => return Err(SchemaError::UnknownTable),
            (Some(current), _) => current,
        };

        let mut next = current.clone();
        match change {
            SchemaChange::CreateTable { .. } => return Err(SchemaError::TableAlreadyExists),
            SchemaChange::AddColumns { columns } => {
                for added in columns {
                    if next.column(&added.column.name).is_some() {
                        return Err(SchemaError::DuplicateColumn(added.column.name.clone()));
                    }
                    let at = match &added.position {
                        ColumnPosition::First => 0,
                        ColumnPosition::Last => next.columns.len(),
                        ColumnPosition::After(anchor) => next.index_of(anchor)? + 1,
                        ColumnPosition::Before(anchor) => next.index_of(anchor)?,
                    };
                    next.columns.insert(at, added.column.clone());
                }
            }
            SchemaChange::DropColumns { names } => {
                for name in names {
                    if next.primary_keys.contains(name) {
                        return Err(SchemaError::PrimaryKeyColumn(name.clone()));
                    }
                    let idx = next.index_of(name)?;
                    next.columns.remove(idx);
                }
            }
            SchemaChange::AlterColumnTypes { types } => {
                for (name, data_type) in types {
                    let idx = next.index_of(name)?;
                    next.columns[idx].data_type = data_type.clone();
                }
            }
            SchemaChange::RenameColumns { renames } => {
                for (old, new) in renames {
                    if next.column(new).is_some() {
                        return Err(SchemaError::DuplicateColumn(new.clone()));
                    }
                    let idx = next.index_of(old)?;
                    next.columns[idx].name.clone_from(new);
                    for pk in &mut next.primary_keys {
                        if pk == old {
                            pk.clone_from(new);
                        }
                    }
                }
            }
        }
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn products() -> Schema {
        Schema::new(
            vec![
                Column::new("id", DataType::Int64).not_null(),
                Column::new("name", DataType::String),
            ],
            vec!["id".into()],
        )
    }

    #[test]
    fn create_table_on_unknown_table() {
        let change = SchemaChange::CreateTable { schema: products() };
        let schema = Schema::apply(None, &change).unwrap();
        assert_eq!(schema.column_names(), vec!["id", "name"]);
    }

    #[test]
    fn create_table_twice_is_rejected() {
        let change = SchemaChange::CreateTable { schema: products() };
        let err = Schema::apply(Some(&products()), &change).unwrap_err();
        assert_eq!(err, SchemaError::TableAlreadyExists);
    }

    #[test]
    fn add_column_respects_position() {
        let change = SchemaChange::AddColumns {
            columns: vec![
                AddedColumn {
                    column: Column::new("price", DataType::Float64),
                    position: ColumnPosition::After("id".into()),
                },
                AddedColumn {
                    column: Column::new("tag", DataType::String),
                    position: ColumnPosition::First,
                },
            ],
        };
        let schema = Schema::apply(Some(&products()), &change).unwrap();
        assert_eq!(schema.column_names(), vec!["tag", "id", "price", "name"]);
    }

    #[test]
    fn add_existing_column_is_rejected() {
        let change = SchemaChange::AddColumns {
            columns: vec![AddedColumn {
                column: Column::new("name", DataType::String),
                position: ColumnPosition::Last,
            }],
        };
        assert_eq!(
            Schema::apply(Some(&products()), &change).unwrap_err(),
            SchemaError::DuplicateColumn("name".into())
        );
    }

    #[test]
    fn drop_primary_key_is_rejected() {
        let change = SchemaChange::DropColumns {
            names: vec!["id".into()],
        };
        assert_eq!(
            Schema::apply(Some(&products()), &change).unwrap_err(),
            SchemaError::PrimaryKeyColumn("id".into())
        );
    }

    #[test]
    fn rename_updates_primary_key() {
        let change = SchemaChange::RenameColumns {
            renames: BTreeMap::from([("id".to_string(), "product_id".to_string())]),
        };
        let schema = Schema::apply(Some(&products()), &change).unwrap();
        assert_eq!(schema.primary_keys, vec!["product_id".to_string()]);
        assert!(schema.column("product_id").is_some());
    }

    #[test]
    fn alter_unknown_column_is_rejected() {
        let change = SchemaChange::AlterColumnTypes {
            types: BTreeMap::from([("missing".to_string(), DataType::Int32)]),
        };
        assert_eq!(
            Schema::apply(Some(&products()), &change).unwrap_err(),
            SchemaError::UnknownColumn("missing".into())
        );
    }

    #[test]
    fn change_on_unknown_table_is_rejected() {
        let change = SchemaChange::DropColumns {
            names: vec!["name".into()],
        };
        assert_eq!(Schema::apply(None, &change).unwrap_err(), SchemaError::UnknownTable);
    }

    #[test]
    fn schema_change_json_is_tagged_by_kind() {
        let change = SchemaChange::DropColumns {
            names: vec!["name".into()],
        };
        let json = serde_json::to_value(&change).unwrap();
        assert_eq!(json["kind"], "drop_columns");
    }
}
