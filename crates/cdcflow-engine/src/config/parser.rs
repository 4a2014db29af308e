//! Pipeline YAML parsing with environment variable substitution.
//!
//! Connector blocks keep their `type` and optional `name`; every other
//! entry becomes a connector option. Nested maps are flattened into
//! dotted keys, so `scan: {snapshot: {chunk.size: 10}}` and
//! `scan.snapshot.chunk.size: 10` are the same option. Keys of the
//! `pipeline` block are prefixed with `pipeline.`.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{bail, Context, Result};
use cdcflow_types::Configuration;
use regex::Regex;
use serde::Deserialize;
use serde_yaml::{Mapping, Value as YamlValue};

use crate::config::types::{PipelineDefinition, SinkDef, SourceDef};

static ENV_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid env var regex"));

const PIPELINE_PREFIX: &str = "pipeline";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawDefinition {
    source: Mapping,
    sink: Mapping,
    #[serde(default)]
    pipeline: Mapping,
}

/// Substitute `${VAR_NAME}` patterns with environment variable values.
///
/// # Errors
///
/// Returns an error naming every referenced variable that is not set.
pub fn substitute_env_vars(input: &str) -> Result<String> {
    let mut missing = Vec::new();
    let result = ENV_VAR_RE.replace_all(input, |cap: &regex::Captures<'_>| {
        std::env::var(&cap[1]).unwrap_or_else(|_| {
            missing.push(cap[1].to_string());
            String::new()
        })
    });

    if !missing.is_empty() {
        missing.dedup();
        bail!("Missing environment variable(s): {}", missing.join(", "));
    }

    Ok(result.into_owned())
}

/// Parse a pipeline YAML string (after env var substitution).
///
/// # Errors
///
/// Returns an error if env var substitution fails, the YAML is invalid,
/// a connector block has no `type`, or two entries flatten to the same key.
pub fn parse_pipeline_str(yaml_str: &str) -> Result<PipelineDefinition> {
    let substituted = substitute_env_vars(yaml_str)?;
    let raw: RawDefinition =
        serde_yaml::from_str(&substituted).context("Failed to parse pipeline YAML")?;

    let (source_type, source_name, source_options) = connector_block("source", raw.source)?;
    let (sink_type, sink_name, sink_options) = connector_block("sink", raw.sink)?;

    let mut pipeline = BTreeMap::new();
    for (key, value) in raw.pipeline {
        let key = key_to_string(&key).context("Invalid key in 'pipeline' block")?;
        let full = if key.starts_with("pipeline.") {
            key
        } else {
            format!("{PIPELINE_PREFIX}.{key}")
        };
        insert_flattened(&mut pipeline, full, value)?;
    }

    Ok(PipelineDefinition {
        source: SourceDef {
            type_id: source_type,
            name: source_name,
            options: Configuration::from_map(source_options),
        },
        sink: SinkDef {
            type_id: sink_type,
            name: sink_name,
            options: Configuration::from_map(sink_options),
        },
        config: Configuration::from_map(pipeline),
    })
}

/// Parse a pipeline YAML file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or the YAML is invalid.
pub fn parse_pipeline(path: &Path) -> Result<PipelineDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read pipeline file: {}", path.display()))?;
    parse_pipeline_str(&content)
}

type ConnectorBlock = (String, Option<String>, BTreeMap<String, serde_json::Value>);

fn connector_block(block: &str, mut mapping: Mapping) -> Result<ConnectorBlock> {
    let type_id = match mapping.remove("type") {
        Some(YamlValue::String(s)) if !s.trim().is_empty() => s,
        Some(_) => bail!("'{block}.type' must be a non-empty string"),
        None => bail!("'{block}' block is missing 'type'"),
    };
    let name = match mapping.remove("name") {
        Some(YamlValue::String(s)) => Some(s),
        Some(YamlValue::Null) | None => None,
        Some(_) => bail!("'{block}.name' must be a string"),
    };

    let mut options = BTreeMap::new();
    for (key, value) in mapping {
        let key = key_to_string(&key).with_context(|| format!("Invalid key in '{block}' block"))?;
        insert_flattened(&mut options, key, value)?;
    }
    Ok((type_id, name, options))
}

fn insert_flattened(
    out: &mut BTreeMap<String, serde_json::Value>,
    key: String,
    value: YamlValue,
) -> Result<()> {
    if let YamlValue::Mapping(nested) = value {
        for (child, child_value) in nested {
            let child = key_to_string(&child).with_context(|| format!("Invalid key under '{key}'"))?;
            insert_flattened(out, format!("{key}.{child}"), child_value)?;
        }
        return Ok(());
    }

    let json = serde_json::to_value(&value)
        .with_context(|| format!("Option '{key}' has a value that cannot be represented"))?;
    if out.contains_key(&key) {
        bail!("Option '{key}' is defined more than once");
    }
    out.insert(key, json);
    Ok(())
}

fn key_to_string(key: &YamlValue) -> Result<String> {
    match key {
        YamlValue::String(s) => Ok(s.clone()),
        YamlValue::Number(n) => Ok(n.to_string()),
        YamlValue::Bool(b) => Ok(b.to_string()),
        other => bail!("unsupported key {other:?}"),
    }
}
