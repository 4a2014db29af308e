use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use cdcflow_connectors::values::ValuesDatabase;
use cdcflow_engine::PipelineComposer;

/// Execute the `check` command: validate the pipeline and build every stage.
pub fn execute(pipeline_path: &Path) -> Result<()> {
    let definition = super::load(pipeline_path)?;
    println!("Pipeline structure: OK");

    let registry = super::registry(&Arc::new(ValuesDatabase::new()))?;
    let execution = PipelineComposer::local(registry).compose(definition)?;

    println!("Pipeline:           {}", execution.name());
    println!(
        "Source:             {} (parallelism {})",
        execution.source().name(),
        execution.source().parallelism()
    );
    println!(
        "Schema coordinator: {} (parallelism {})",
        execution.coordinator().behavior(),
        execution.coordinator().parallelism()
    );
    println!(
        "Sink:               {} (parallelism {})",
        execution.sink().name(),
        execution.sink().parallelism()
    );
    for (stage, id) in execution.operator_ids() {
        println!("  {:18} {id}", format!("{stage}:"));
    }

    println!("\nAll checks passed.");
    Ok(())
}
