//! Pipeline-wide option declarations.

use std::sync::LazyLock;

use cdcflow_types::{ConfigOption, SchemaChangeBehavior};

pub const DEFAULT_PIPELINE_NAME: &str = "Flink CDC Pipeline Job";
pub const DEFAULT_SCHEMA_OPERATOR_UID: &str = "$$_schema_operator_$$";
pub const DEFAULT_SOURCE_UID: &str = "source";
pub const DEFAULT_SINK_UID: &str = "sink";
pub const PARTITIONER_UID: &str = "partitioner";
pub const DEFAULT_CHANNEL_CAPACITY: i64 = 1024;

pub static PIPELINE_NAME: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.name")
        .default_value(DEFAULT_PIPELINE_NAME)
        .with_description("The name of the pipeline")
});

pub static GLOBAL_PARALLELISM: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.global.parallelism")
        .required()
        .with_description("Parallelism of the pipeline")
});

pub static SCHEMA_CHANGE_BEHAVIOR: LazyLock<ConfigOption<SchemaChangeBehavior>> =
    LazyLock::new(|| {
        ConfigOption::new("pipeline.schema.change.behavior")
            .default_value(SchemaChangeBehavior::Evolve)
            .with_description(
                "Behavior for handling schema change events: EVOLVE applies them, \
                 IGNORE drops them, EXCEPTION fails the pipeline",
            )
    });

pub static SCHEMA_OPERATOR_UID: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.schema.operator.uid")
        .default_value(DEFAULT_SCHEMA_OPERATOR_UID)
        .with_description("The unique ID for the schema operator")
});

pub static SOURCE_PARALLELISM: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.source.parallelism")
        .with_description("Parallelism of the source stage, defaults to the global parallelism")
});

pub static SINK_PARALLELISM: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.sink.parallelism").with_description(
        "Number of sink partitions the partitioner routes to, defaults to the global parallelism",
    )
});

pub static SOURCE_UID: LazyLock<ConfigOption<String>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.source.uid").default_value(DEFAULT_SOURCE_UID)
});

pub static SINK_UID: LazyLock<ConfigOption<String>> =
    LazyLock::new(|| ConfigOption::new("pipeline.sink.uid").default_value(DEFAULT_SINK_UID));

pub static CHANNEL_CAPACITY: LazyLock<ConfigOption<i64>> = LazyLock::new(|| {
    ConfigOption::new("pipeline.channel.capacity")
        .default_value(DEFAULT_CHANNEL_CAPACITY)
        .with_description("Bounded buffer size between adjacent stages")
});

/// Every key declared above, for unknown-key reporting.
#[must_use]
pub fn known_keys() -> Vec<&'static str> {
    vec![
        PIPELINE_NAME.key(),
        GLOBAL_PARALLELISM.key(),
        SCHEMA_CHANGE_BEHAVIOR.key(),
        SCHEMA_OPERATOR_UID.key(),
        SOURCE_PARALLELISM.key(),
        SINK_PARALLELISM.key(),
        SOURCE_UID.key(),
        SINK_UID.key(),
        CHANNEL_CAPACITY.key(),
    ]
}

#[cfg(test)]
mod tests {
    use cdcflow_types::Configuration;

    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Configuration::new();
        assert_eq!(config.get(&PIPELINE_NAME).unwrap(), "Flink CDC Pipeline Job");
        assert_eq!(
            config.get(&SCHEMA_CHANGE_BEHAVIOR).unwrap(),
            SchemaChangeBehavior::Evolve
        );
        assert_eq!(config.get(&SCHEMA_OPERATOR_UID).unwrap(), "$$_schema_operator_$$");
        assert_eq!(config.get(&CHANNEL_CAPACITY).unwrap(), 1024);
    }

    #[test]
    fn global_parallelism_has_no_default() {
        assert!(GLOBAL_PARALLELISM.is_required());
        assert!(Configuration::new().get(&GLOBAL_PARALLELISM).is_err());
    }

    #[test]
    fn stage_overrides_are_optional() {
        let config = Configuration::new();
        assert_eq!(config.get_optional(&SOURCE_PARALLELISM).unwrap(), None);
        assert_eq!(config.get_optional(&SINK_PARALLELISM).unwrap(), None);
    }
}
