//! `print` sink: writes every event as one JSON line.
//!
//! Lines look like `[<prefix>:]<partition>> <event json>`, partitions
//! numbered from 1. Schema changes are accepted without side effects.

use std::io::Write;
use std::sync::{Arc, LazyLock, Mutex};

use cdcflow_sdk::prelude::*;

pub const IDENTIFIER: &str = "print";

pub static PREFIX: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("prefix").with_description("Text printed before the partition number")
});

pub static STANDARD_ERROR: LazyLock<ConfigOption<bool>> = LazyLock::new(|| {
    ConfigOption::new("standard-error")
        .default_value(false)
        .with_description("Print to stderr instead of stdout")
});

/// Where printed lines go.
#[derive(Debug, Clone)]
pub enum PrintTarget {
    Stdout,
    Stderr,
    /// In-memory buffer, for callers that want to capture the output.
    Buffer(Arc<Mutex<Vec<u8>>>),
}

impl PrintTarget {
    fn write_line(&self, line: &str) -> Result<(), ConnectorError> {
        let result = match self {
            Self::Stdout => writeln!(std::io::stdout().lock(), "{line}"),
            Self::Stderr => writeln!(std::io::stderr().lock(), "{line}"),
            Self::Buffer(buffer) => {
                let mut buffer = buffer.lock().map_err(|_| {
                    ConnectorError::internal("LOCK_POISONED", "print buffer lock poisoned")
                })?;
                writeln!(buffer, "{line}")
            }
        };
        result.map_err(|e| ConnectorError::transient("PRINT_FAILED", e.to_string()))
    }
}

pub struct PrintDataSink {
    prefix: Option<String>,
    target: PrintTarget,
}

impl PrintDataSink {
    #[must_use]
    pub fn new(prefix: Option<String>, target: PrintTarget) -> Self {
        Self { prefix, target }
    }
}

impl DataSink for PrintDataSink {
    fn metadata_applier(&self) -> Arc<dyn MetadataApplier> {
        Arc::new(LoggingApplier)
    }

    fn create_writer(&self, ctx: &SubtaskContext) -> Result<Box<dyn EventWriter>, ConnectorError> {
        let tag = match &self.prefix {
            Some(prefix) => format!("{prefix}:{}", ctx.index + 1),
            None => (ctx.index + 1).to_string(),
        };
        Ok(Box::new(PrintWriter {
            tag,
            target: self.target.clone(),
        }))
    }
}

struct LoggingApplier;

impl MetadataApplier for LoggingApplier {
    fn apply_schema_change(&self, event: &SchemaChangeEvent) -> Result<(), ConnectorError> {
        tracing::info!(
            table = %event.table_id,
            change = event.change.kind(),
            "Print sink accepted schema change"
        );
        Ok(())
    }
}

struct PrintWriter {
    tag: String,
    target: PrintTarget,
}

impl EventWriter for PrintWriter {
    fn write(&mut self, event: &Event) -> Result<(), ConnectorError> {
        let json = serde_json::to_string(event)
            .map_err(|e| ConnectorError::internal("ENCODE_FAILED", e.to_string()))?;
        self.target.write_line(&format!("{}> {json}", self.tag))
    }
}

pub struct PrintSinkFactory;

impl DataSinkFactory for PrintSinkFactory {
    fn identifier(&self) -> &'static str {
        IDENTIFIER
    }

    fn optional_options(&self) -> Vec<OptionSpec> {
        vec![PREFIX.spec(), STANDARD_ERROR.spec()]
    }

    fn create_data_sink(&self, ctx: &FactoryContext<'_>) -> Result<Arc<dyn DataSink>, ConnectorError> {
        let prefix = ctx.options.get_optional(&PREFIX)?;
        let target = if ctx.options.get(&STANDARD_ERROR)? {
            PrintTarget::Stderr
        } else {
            PrintTarget::Stdout
        };
        Ok(Arc::new(PrintDataSink::new(prefix, target)))
    }
}
