use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use cdcflow_connectors::values::ValuesDatabase;
use cdcflow_engine::{ExecutionOutcome, ExecutionSummary, PipelineComposer};

/// Execute the `run` command: parse, validate, compose and run a pipeline.
pub async fn execute(pipeline_path: &Path, dump: bool) -> Result<()> {
    let definition = super::load(pipeline_path)?;

    tracing::info!(
        source = definition.source.display_name(),
        sink = definition.sink.display_name(),
        "Pipeline validated"
    );

    let database = Arc::new(ValuesDatabase::new());
    let registry = super::registry(&database)?;
    // The values sink lives in this process, so the CLI always runs the
    // pipeline to completion.
    let execution = PipelineComposer::local(registry).compose(definition)?;

    let summary = match execution.execute().await? {
        ExecutionOutcome::Completed(summary) => summary,
        ExecutionOutcome::Submitted(handle) => {
            anyhow::bail!("Pipeline '{}' was submitted instead of run", handle.name())
        }
    };

    print_summary(&summary);
    print_tables(&database, dump)?;
    Ok(())
}

fn print_summary(summary: &ExecutionSummary) {
    println!("Pipeline '{}' completed successfully.", summary.pipeline_name);
    println!("  Events read:     {}", summary.events_read);
    println!("  Events routed:   {}", summary.events_routed);
    println!("  Events written:  {}", summary.events_written);
    println!(
        "  Schema changes:  {} applied, {} ignored",
        summary.coordinator.schema_changes_applied, summary.coordinator.schema_changes_ignored
    );
    println!("  Max buffered:    {}", summary.coordinator.max_buffered);
    println!("  Duration:        {:.2}s", summary.duration_secs);

    let json = serde_json::json!({
        "pipeline": summary.pipeline_name,
        "events_read": summary.events_read,
        "events_routed": summary.events_routed,
        "events_written": summary.events_written,
        "schema_changes_applied": summary.coordinator.schema_changes_applied,
        "schema_changes_ignored": summary.coordinator.schema_changes_ignored,
        "duration_secs": summary.duration_secs,
    });
    println!("@@SUMMARY_JSON@@{json}");
}

fn print_tables(database: &ValuesDatabase, dump: bool) -> Result<()> {
    for table in database.table_ids() {
        let rows = database.rows(&table);
        let schema = database.schema(&table);
        let columns = schema
            .as_ref()
            .map(|s| s.column_names().join(", "))
            .unwrap_or_default();
        println!("  Table {table}: {} row(s) [{columns}]", rows.len());
        if dump {
            for row in rows {
                println!("    {}", serde_json::to_string(&row)?);
            }
        }
    }
    Ok(())
}
