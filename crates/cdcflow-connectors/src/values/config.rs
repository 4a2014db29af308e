//! Values connector options.

use std::path::PathBuf;
use std::sync::LazyLock;

use cdcflow_sdk::splitter::{DEFAULT_CHUNK_SIZE, DEFAULT_SAMPLING_STRIDE};
use cdcflow_types::{
    Column, ConfigOption, Configuration, ConnectorError, Event, OptionKind, OptionSpec, Row,
    Schema, TableId, Value,
};
use serde::Deserialize;

pub const STARTUP_MODES: &[&str] = &["initial", "snapshot", "latest-offset"];

pub static CHUNK_SIZE: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("scan.snapshot.chunk.size")
        .default_value(i64::try_from(DEFAULT_CHUNK_SIZE).unwrap_or(i64::MAX))
        .with_description("Target number of rows per snapshot chunk")
});

pub static SAMPLING_STRIDE: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("scan.snapshot.sampling.stride")
        .default_value(i64::try_from(DEFAULT_SAMPLING_STRIDE).unwrap_or(1))
        .with_description("Read every n-th key when choosing chunk boundaries")
});

pub static STARTUP_MODE: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("scan.startup.mode")
        .default_value("initial")
        .with_description(
            "initial reads the snapshot and then the changelog, snapshot stops after the \
             snapshot, latest-offset reads only the changelog",
        )
});

pub static EVENTS_FILE: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("events.file")
        .with_description("JSON-lines file of changelog events, read after the inline events")
});

pub const TABLES_KEY: &str = "tables";
pub const EVENTS_KEY: &str = "events";

pub static BATCH_SIZE: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("batch.size")
        .default_value(128)
        .with_description("Data events buffered per writer before they are materialized")
});

pub static ERROR_ON_SCHEMA_CHANGE: LazyLock<ConfigOption<bool>> = LazyLock::new(|| {
    ConfigOption::new("error.on.schema.change")
        .default_value(false)
        .with_description("Fail every schema change applied to the sink")
});

/// Where the source starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    Initial,
    Snapshot,
    LatestOffset,
}

impl StartupMode {
    #[must_use]
    pub fn reads_snapshot(self) -> bool {
        matches!(self, Self::Initial | Self::Snapshot)
    }

    #[must_use]
    pub fn reads_changelog(self) -> bool {
        matches!(self, Self::Initial | Self::LatestOffset)
    }
}

/// One captured table: schema and snapshot contents.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub columns: Vec<Column>,
    #[serde(default)]
    pub primary_keys: Vec<String>,
    #[serde(default)]
    pub rows: Vec<Row>,
}

impl TableDef {
    #[must_use]
    pub fn schema(&self) -> Schema {
        Schema::new(self.columns.clone(), self.primary_keys.clone())
    }

    /// Primary-key values of `row`, in primary-key column order.
    #[must_use]
    pub fn key_of(&self, row: &Row) -> Vec<Value> {
        self.primary_keys
            .iter()
            .map(|k| row.get(k).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Values source configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceConfig {
    pub tables: Vec<TableDef>,
    pub events: Vec<Event>,
    pub events_file: Option<PathBuf>,
    pub chunk_size: usize,
    pub sampling_stride: usize,
    pub startup_mode: StartupMode,
}

impl SourceConfig {
    /// # Errors
    ///
    /// Returns a config error for malformed tables, events, or sizing
    /// options.
    pub fn from_options(options: &Configuration) -> Result<Self, ConnectorError> {
        let tables: Vec<TableDef> = read_list(options, TABLES_KEY)?;
        let events: Vec<Event> = read_list(options, EVENTS_KEY)?;
        let config = Self {
            tables,
            events,
            events_file: options.get_optional(&EVENTS_FILE)?.map(PathBuf::from),
            chunk_size: positive(options, &CHUNK_SIZE)?,
            sampling_stride: positive(options, &SAMPLING_STRIDE)?,
            startup_mode: parse_startup_mode(&options.get(&STARTUP_MODE)?)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns a config error for duplicate table ids or primary keys
    /// naming unknown columns.
    pub fn validate(&self) -> Result<(), ConnectorError> {
        let mut seen = std::collections::BTreeSet::new();
        for table in &self.tables {
            if !seen.insert(&table.id) {
                return Err(ConnectorError::config(
                    "DUPLICATE_TABLE",
                    format!("table '{}' is defined more than once", table.id),
                ));
            }
            for pk in &table.primary_keys {
                if !table.columns.iter().any(|c| &c.name == pk) {
                    return Err(ConnectorError::config(
                        "INVALID_PRIMARY_KEY",
                        format!("primary key '{pk}' is not a column of '{}'", table.id),
                    ));
                }
            }
        }
        Ok(())
    }

    #[must_use]
    pub fn table(&self, id: &TableId) -> Option<&TableDef> {
        self.tables.iter().find(|t| &t.id == id)
    }
}

#[must_use]
pub fn source_options() -> Vec<OptionSpec> {
    vec![
        OptionSpec {
            key: EVENTS_KEY,
            kind: OptionKind::List,
            required: false,
            description: "Inline changelog events",
        },
        CHUNK_SIZE.spec(),
        SAMPLING_STRIDE.spec(),
        OptionSpec {
            key: STARTUP_MODE.key(),
            kind: OptionKind::Enum(STARTUP_MODES),
            required: false,
            description: "initial, snapshot or latest-offset",
        },
        EVENTS_FILE.spec(),
    ]
}

#[must_use]
pub fn required_source_options() -> Vec<OptionSpec> {
    vec![OptionSpec {
        key: TABLES_KEY,
        kind: OptionKind::List,
        required: true,
        description: "Captured tables with their columns, primary keys and rows",
    }]
}

fn parse_startup_mode(raw: &str) -> Result<StartupMode, ConnectorError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "initial" => Ok(StartupMode::Initial),
        "snapshot" => Ok(StartupMode::Snapshot),
        "latest-offset" => Ok(StartupMode::LatestOffset),
        other => Err(ConnectorError::config(
            "INVALID_OPTION",
            format!(
                "scan.startup.mode must be one of {}, got '{other}'",
                STARTUP_MODES.join("|")
            ),
        )),
    }
}

fn read_list<T: serde::de::DeserializeOwned>(
    options: &Configuration,
    key: &str,
) -> Result<Vec<T>, ConnectorError> {
    let Some(raw) = options.raw(key) else {
        return Ok(Vec::new());
    };
    serde_json::from_value(raw.clone()).map_err(|e| {
        ConnectorError::config("INVALID_OPTION", format!("option '{key}' is malformed: {e}"))
    })
}

fn positive(options: &Configuration, option: &ConfigOption<i64>) -> Result<usize, ConnectorError> {
    let value = options.get(option)?;
    usize::try_from(value)
        .ok()
        .filter(|v| *v >= 1)
        .ok_or_else(|| {
            ConnectorError::config(
                "INVALID_OPTION",
                format!("{} must be at least 1, got {value}", option.key()),
            )
        })
}
