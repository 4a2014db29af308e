pub mod check;
pub mod connectors;
pub mod run;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use cdcflow_connectors::builtin_registry;
use cdcflow_connectors::values::ValuesDatabase;
use cdcflow_engine::{parse_pipeline, validate_pipeline, PipelineDefinition};
use cdcflow_sdk::factory::FactoryRegistry;

/// Parse and validate a pipeline file.
fn load(pipeline_path: &Path) -> Result<PipelineDefinition> {
    let definition = parse_pipeline(pipeline_path)
        .with_context(|| format!("Failed to parse pipeline: {}", pipeline_path.display()))?;
    validate_pipeline(&definition)?;
    Ok(definition)
}

/// Built-in connectors, with values sinks writing into `database`.
fn registry(database: &Arc<ValuesDatabase>) -> Result<Arc<FactoryRegistry>> {
    let registry =
        builtin_registry(Arc::clone(database)).context("Failed to register built-in connectors")?;
    Ok(Arc::new(registry))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;

    fn bundled(name: &str) -> PathBuf {
        PathBuf::from(env!("CARGO_MANIFEST_DIR"))
            .join("pipelines")
            .join(name)
    }

    #[test]
    fn bundled_pipeline_loads() {
        let definition = load(&bundled("orders.yaml")).unwrap();
        assert_eq!(definition.source.type_id, "values");
        assert_eq!(definition.sink.type_id, "values");
    }

    #[test]
    fn missing_file_names_the_path() {
        let err = load(&bundled("absent.yaml")).unwrap_err();
        assert!(format!("{err:#}").contains("absent.yaml"));
    }

    #[tokio::test]
    async fn bundled_pipeline_runs() {
        run::execute(&bundled("orders.yaml"), false)
            .await
            .unwrap();
    }
}
