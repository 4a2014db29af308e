//! Typed configuration options over a raw key/value map.
//!
//! A [`Configuration`] keeps every key it was given (sorted by key),
//! including keys nobody declared. Typed reads go through a
//! [`ConfigOption`], which fixes the key, the value type, and either a
//! default or the "required" marker.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use serde::{Deserialize, Serialize};

use crate::policy::SchemaChangeBehavior;

/// Errors produced by typed configuration reads.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required option '{key}'")]
    Missing { key: String },

    #[error("invalid value for option '{key}' (expected {expected}): {message}")]
    InvalidValue {
        key: String,
        expected: String,
        message: String,
    },
}

/// Declared type of an option value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptionKind {
    String,
    Integer,
    Boolean,
    Enum(&'static [&'static str]),
    /// A sequence of structured items, read raw by the connector.
    List,
}

impl std::fmt::Display for OptionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::String => f.write_str("string"),
            Self::Integer => f.write_str("integer"),
            Self::Boolean => f.write_str("boolean"),
            Self::Enum(variants) => write!(f, "one of {}", variants.join("|")),
            Self::List => f.write_str("list"),
        }
    }
}

/// Conversion between raw option values and typed values.
pub trait OptionValue: Sized + Clone {
    fn kind() -> OptionKind;

    /// # Errors
    ///
    /// Returns a human-readable message when `raw` can't represent `Self`.
    fn from_raw(raw: &serde_json::Value) -> Result<Self, String>;

    fn to_raw(&self) -> serde_json::Value;
}

impl OptionValue for String {
    fn kind() -> OptionKind {
        OptionKind::String
    }

    fn from_raw(raw: &serde_json::Value) -> Result<Self, String> {
        match raw {
            serde_json::Value::String(s) => Ok(s.clone()),
            serde_json::Value::Number(n) => Ok(n.to_string()),
            serde_json::Value::Bool(b) => Ok(b.to_string()),
            other => Err(format!("cannot read {other} as a string")),
        }
    }

    fn to_raw(&self) -> serde_json::Value {
        serde_json::Value::String(self.clone())
    }
}

impl OptionValue for i64 {
    fn kind() -> OptionKind {
        OptionKind::Integer
    }

    fn from_raw(raw: &serde_json::Value) -> Result<Self, String> {
        match raw {
            serde_json::Value::Number(n) => n
                .as_i64()
                .ok_or_else(|| format!("{n} is not a 64-bit integer")),
            serde_json::Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|e| format!("'{s}' is not an integer: {e}")),
            other => Err(format!("cannot read {other} as an integer")),
        }
    }

    fn to_raw(&self) -> serde_json::Value {
        serde_json::Value::from(*self)
    }
}

impl OptionValue for bool {
    fn kind() -> OptionKind {
        OptionKind::Boolean
    }

    fn from_raw(raw: &serde_json::Value) -> Result<Self, String> {
        match raw {
            serde_json::Value::Bool(b) => Ok(*b),
            serde_json::Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(true),
                "false" => Ok(false),
                _ => Err(format!("'{s}' is not a boolean")),
            },
            other => Err(format!("cannot read {other} as a boolean")),
        }
    }

    fn to_raw(&self) -> serde_json::Value {
        serde_json::Value::Bool(*self)
    }
}

impl OptionValue for SchemaChangeBehavior {
    fn kind() -> OptionKind {
        OptionKind::Enum(&Self::VARIANTS)
    }

    fn from_raw(raw: &serde_json::Value) -> Result<Self, String> {
        match raw {
            serde_json::Value::String(s) => s.parse(),
            other => Err(format!("cannot read {other} as a schema change behavior")),
        }
    }

    fn to_raw(&self) -> serde_json::Value {
        serde_json::Value::String(self.as_str().to_string())
    }
}

/// Untyped description of an option, used for required/optional lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OptionSpec {
    pub key: &'static str,
    pub kind: OptionKind,
    pub required: bool,
    pub description: &'static str,
}

/// Typed option declaration.
#[derive(Debug, Clone)]
pub struct ConfigOption<T> {
    key: &'static str,
    kind: OptionKind,
    default: Option<T>,
    required: bool,
    description: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T: OptionValue> ConfigOption<T> {
    /// Declare an option with no default. It is optional until
    /// [`ConfigOption::required`] is called.
    #[must_use]
    pub fn new(key: &'static str) -> Self {
        Self {
            key,
            kind: T::kind(),
            default: None,
            required: false,
            description: "",
            _marker: PhantomData,
        }
    }

    #[must_use]
    pub fn default_value(mut self, value: impl Into<T>) -> Self {
        self.default = Some(value.into());
        self.required = false;
        self
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.default = None;
        self.required = true;
        self
    }

    #[must_use]
    pub fn with_description(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }

    #[must_use]
    pub fn key(&self) -> &'static str {
        self.key
    }

    #[must_use]
    pub fn default(&self) -> Option<&T> {
        self.default.as_ref()
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        self.required
    }

    #[must_use]
    pub fn spec(&self) -> OptionSpec {
        OptionSpec {
            key: self.key,
            kind: self.kind,
            required: self.required,
            description: self.description,
        }
    }
}

/// Raw option map. Keys sort lexicographically; unknown keys are kept.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Configuration(BTreeMap<String, serde_json::Value>);

impl Configuration {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_map(map: BTreeMap<String, serde_json::Value>) -> Self {
        Self(map)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.set(key, value);
        self
    }

    pub fn set_option<T: OptionValue>(&mut self, option: &ConfigOption<T>, value: &T) {
        self.0.insert(option.key.to_string(), value.to_raw());
    }

    /// Read a typed value, falling back to the option default.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when the key is absent and the option has
    /// no default (required or not); [`ConfigError::InvalidValue`] when
    /// the raw value doesn't parse as `T`.
    pub fn get<T: OptionValue>(&self, option: &ConfigOption<T>) -> Result<T, ConfigError> {
        self.get_optional(option)?.ok_or_else(|| ConfigError::Missing {
            key: option.key.to_string(),
        })
    }

    /// Like [`Configuration::get`], but an absent optional option without a
    /// default reads as `None` instead of an error.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] for an absent required option;
    /// [`ConfigError::InvalidValue`] for an unparsable value.
    pub fn get_optional<T: OptionValue>(
        &self,
        option: &ConfigOption<T>,
    ) -> Result<Option<T>, ConfigError> {
        match self.0.get(option.key) {
            Some(raw) => T::from_raw(raw)
                .map(Some)
                .map_err(|message| ConfigError::InvalidValue {
                    key: option.key.to_string(),
                    expected: option.kind.to_string(),
                    message,
                }),
            None if option.required => Err(ConfigError::Missing {
                key: option.key.to_string(),
            }),
            None => Ok(option.default.clone()),
        }
    }

    /// Check presence (when required) and type of a declared option.
    ///
    /// # Errors
    ///
    /// Same conditions as [`Configuration::get`].
    pub fn check(&self, spec: &OptionSpec) -> Result<(), ConfigError> {
        let Some(raw) = self.0.get(spec.key) else {
            return if spec.required {
                Err(ConfigError::Missing {
                    key: spec.key.to_string(),
                })
            } else {
                Ok(())
            };
        };
        let parsed = match spec.kind {
            OptionKind::String => String::from_raw(raw).map(|_| ()),
            OptionKind::Integer => i64::from_raw(raw).map(|_| ()),
            OptionKind::Boolean => bool::from_raw(raw).map(|_| ()),
            OptionKind::Enum(variants) => String::from_raw(raw).and_then(|s| {
                if variants.iter().any(|v| v.eq_ignore_ascii_case(s.trim())) {
                    Ok(())
                } else {
                    Err(format!("'{s}' is not a valid variant"))
                }
            }),
            OptionKind::List => {
                if raw.is_array() {
                    Ok(())
                } else {
                    Err(format!("expected a list, got {raw}"))
                }
            }
        };
        parsed.map_err(|message| ConfigError::InvalidValue {
            key: spec.key.to_string(),
            expected: spec.kind.to_string(),
            message,
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    #[must_use]
    pub fn raw(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Keys not present in `known`, in key order.
    #[must_use]
    pub fn unknown_keys(&self, known: &[&str]) -> Vec<&str> {
        self.keys().filter(|k| !known.contains(k)).collect()
    }

    /// Flat string view of every entry (strings unquoted, everything
    /// else rendered as JSON).
    #[must_use]
    pub fn to_string_map(&self) -> BTreeMap<String, String> {
        self.0
            .iter()
            .map(|(k, v)| {
                let rendered = match v {
                    serde_json::Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                (k.clone(), rendered)
            })
            .collect()
    }
}

impl FromIterator<(String, serde_json::Value)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (String, serde_json::Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parallelism() -> ConfigOption<i64> {
        ConfigOption::new("pipeline.global.parallelism").required()
    }

    fn name() -> ConfigOption<String> {
        ConfigOption::new("pipeline.name").default_value("fallback")
    }

    #[test]
    fn default_applies_when_absent() {
        let config = Configuration::new();
        assert_eq!(config.get(&name()).unwrap(), "fallback");
    }

    #[test]
    fn required_option_missing_is_error() {
        let err = Configuration::new().get(&parallelism()).unwrap_err();
        assert_eq!(
            err,
            ConfigError::Missing {
                key: "pipeline.global.parallelism".into()
            }
        );
    }

    #[test]
    fn integer_accepts_numeric_strings() {
        let config = Configuration::new().with("pipeline.global.parallelism", "4");
        assert_eq!(config.get(&parallelism()).unwrap(), 4);
    }

    #[test]
    fn invalid_integer_reports_type() {
        let config = Configuration::new().with("pipeline.global.parallelism", "four");
        let err = config.get(&parallelism()).unwrap_err().to_string();
        assert!(err.contains("expected integer"), "got: {err}");
    }

    #[test]
    fn optional_without_default_reads_none() {
        let option: ConfigOption<i64> = ConfigOption::new("pipeline.sink.parallelism");
        assert_eq!(Configuration::new().get_optional(&option).unwrap(), None);
    }

    #[test]
    fn enum_option_parses_variant() {
        let option: ConfigOption<SchemaChangeBehavior> =
            ConfigOption::new("b").default_value(SchemaChangeBehavior::Evolve);
        let config = Configuration::new().with("b", "exception");
        assert_eq!(config.get(&option).unwrap(), SchemaChangeBehavior::Exception);
    }

    #[test]
    fn check_validates_enum_variants() {
        let option: ConfigOption<SchemaChangeBehavior> = ConfigOption::new("b");
        let config = Configuration::new().with("b", "merge");
        assert!(config.check(&option.spec()).is_err());
    }

    #[test]
    fn check_list_requires_array() {
        let spec = OptionSpec {
            key: "tables",
            kind: OptionKind::List,
            required: true,
            description: "",
        };
        assert!(Configuration::new()
            .with("tables", serde_json::json!([{"id": "db.t"}]))
            .check(&spec)
            .is_ok());
        let err = Configuration::new().with("tables", "db.t").check(&spec).unwrap_err();
        assert!(err.to_string().contains("expected list"));
    }

    #[test]
    fn unknown_keys_are_preserved() {
        let config = Configuration::new()
            .with("pipeline.name", "x")
            .with("pipeline.custom.flag", true);
        assert_eq!(config.unknown_keys(&["pipeline.name"]), vec!["pipeline.custom.flag"]);
        assert_eq!(config.raw("pipeline.custom.flag"), Some(&serde_json::Value::Bool(true)));
    }

    #[test]
    fn string_map_renders_scalars() {
        let config = Configuration::new().with("a", "x").with("b", 3);
        let map = config.to_string_map();
        assert_eq!(map["a"], "x");
        assert_eq!(map["b"], "3");
    }

    #[test]
    fn keys_iterate_in_order() {
        let config = Configuration::new().with("z", 1).with("a", 2);
        assert_eq!(config.keys().collect::<Vec<_>>(), vec!["a", "z"]);
    }
}
