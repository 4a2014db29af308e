//! Pipeline-wide schema change policy.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// How the schema coordinator treats schema change events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SchemaChangeBehavior {
    /// Apply the change at the sink, then propagate it downstream.
    #[default]
    Evolve,
    /// Drop the change; downstream keeps the previous structure.
    Ignore,
    /// Fail the pipeline on the first schema change.
    Exception,
}

impl SchemaChangeBehavior {
    pub const VARIANTS: [&'static str; 3] = ["EVOLVE", "IGNORE", "EXCEPTION"];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Evolve => "EVOLVE",
            Self::Ignore => "IGNORE",
            Self::Exception => "EXCEPTION",
        }
    }
}

impl std::fmt::Display for SchemaChangeBehavior {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SchemaChangeBehavior {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EVOLVE" => Ok(Self::Evolve),
            "IGNORE" => Ok(Self::Ignore),
            "EXCEPTION" => Ok(Self::Exception),
            other => Err(format!(
                "unknown schema change behavior '{other}', expected one of {}",
                Self::VARIANTS.join("|")
            )),
        }
    }
}
