//! Semantic validation for parsed pipeline definitions.

use anyhow::{bail, Result};
use cdcflow_types::{ConfigOption, Configuration, OptionValue};

use crate::config::types::PipelineDefinition;
use crate::options;

fn check_option<T: OptionValue>(
    config: &Configuration,
    option: &ConfigOption<T>,
    errors: &mut Vec<String>,
) -> Option<T> {
    match config.get_optional(option) {
        Ok(value) => value,
        Err(e) => {
            errors.push(e.to_string());
            None
        }
    }
}

fn check_at_least_one(key: &str, value: Option<i64>, errors: &mut Vec<String>) {
    if let Some(v) = value {
        if v < 1 {
            errors.push(format!("'{key}' must be at least 1, got {v}"));
        }
    }
}

fn check_not_blank(key: &str, value: Option<&str>, errors: &mut Vec<String>) {
    if value.is_some_and(|v| v.trim().is_empty()) {
        errors.push(format!("'{key}' must not be empty"));
    }
}

/// Validate a parsed pipeline definition.
/// Returns `Ok(())` if valid, Err with all validation errors if not.
///
/// Connector options are checked against their factories at
/// composition time, not here.
///
/// # Errors
///
/// Returns an error listing all validation failures found in the definition.
pub fn validate_pipeline(def: &PipelineDefinition) -> Result<()> {
    let mut errors = Vec::new();
    let config = &def.config;

    if def.source.type_id.trim().is_empty() {
        errors.push("Source type must not be empty".to_string());
    }
    if def.sink.type_id.trim().is_empty() {
        errors.push("Sink type must not be empty".to_string());
    }

    for option in [
        &*options::GLOBAL_PARALLELISM,
        &*options::SOURCE_PARALLELISM,
        &*options::SINK_PARALLELISM,
        &*options::CHANNEL_CAPACITY,
    ] {
        let value = check_option(config, option, &mut errors);
        check_at_least_one(option.key(), value, &mut errors);
    }

    check_option(config, &options::SCHEMA_CHANGE_BEHAVIOR, &mut errors);
    for option in [
        &*options::SCHEMA_OPERATOR_UID,
        &*options::SOURCE_UID,
        &*options::SINK_UID,
    ] {
        let value = check_option(config, option, &mut errors);
        check_not_blank(option.key(), value.as_deref(), &mut errors);
    }
    check_option(config, &options::PIPELINE_NAME, &mut errors);

    let known = options::known_keys();
    let unknown = config.unknown_keys(&known);
    if !unknown.is_empty() {
        tracing::warn!(keys = ?unknown, "Unrecognized pipeline options are kept but not validated");
    }

    if errors.is_empty() {
        Ok(())
    } else {
        bail!("Pipeline validation failed:\n  - {}", errors.join("\n  - "));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parser::parse_pipeline_str;

    fn valid_yaml() -> &'static str {
        r"
source:
  type: values
sink:
  type: values
pipeline:
  name: orders
  global.parallelism: 2
"
    }

    #[test]
    fn test_valid_pipeline_passes() {
        let def = parse_pipeline_str(valid_yaml()).unwrap();
        assert!(validate_pipeline(&def).is_ok());
    }

    #[test]
    fn test_missing_parallelism_fails() {
        let yaml = valid_yaml().replace("  global.parallelism: 2\n", "");
        let def = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&def).unwrap_err().to_string();
        assert!(
            err.contains("missing required option 'pipeline.global.parallelism'"),
            "got: {err}"
        );
    }

    #[test]
    fn test_zero_parallelism_fails() {
        let yaml = valid_yaml().replace("parallelism: 2", "parallelism: 0");
        let def = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&def).unwrap_err().to_string();
        assert!(err.contains("must be at least 1, got 0"), "got: {err}");
    }

    #[test]
    fn test_unknown_behavior_fails() {
        let yaml = format!("{}  schema.change.behavior: merge\n", valid_yaml());
        let def = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&def).unwrap_err().to_string();
        assert!(err.contains("pipeline.schema.change.behavior"), "got: {err}");
    }

    #[test]
    fn test_all_problems_reported_together() {
        let yaml = format!(
            "{}  sink.parallelism: -1\n  channel.capacity: 0\n  schema.operator.uid: \"  \"\n",
            valid_yaml()
        );
        let def = parse_pipeline_str(&yaml).unwrap();
        let err = validate_pipeline(&def).unwrap_err().to_string();
        assert!(err.starts_with("Pipeline validation failed:"));
        assert!(err.contains("pipeline.sink.parallelism"));
        assert!(err.contains("pipeline.channel.capacity"));
        assert!(err.contains("pipeline.schema.operator.uid"));
    }

    #[test]
    fn test_unknown_keys_are_not_errors() {
        let yaml = format!("{}  custom.flag: true\n", valid_yaml());
        let def = parse_pipeline_str(&yaml).unwrap();
        assert!(validate_pipeline(&def).is_ok());
        assert!(def.config.contains("pipeline.custom.flag"));
    }
}
