use std::sync::Arc;

use anyhow::Result;
use cdcflow_connectors::values::ValuesDatabase;
use cdcflow_types::OptionSpec;

/// Execute the `connectors` command: list built-in connectors and their options.
pub fn execute() -> Result<()> {
    let registry = super::registry(&Arc::new(ValuesDatabase::new()))?;

    println!("Sources:");
    for id in registry.source_identifiers() {
        let factory = registry.source_factory(id)?;
        println!("  {id}");
        print_options(&factory.required_options(), &factory.optional_options());
    }

    println!("\nSinks:");
    for id in registry.sink_identifiers() {
        let factory = registry.sink_factory(id)?;
        println!("  {id}");
        print_options(&factory.required_options(), &factory.optional_options());
    }
    Ok(())
}

fn print_options(required: &[OptionSpec], optional: &[OptionSpec]) {
    for spec in required.iter().chain(optional) {
        let marker = if spec.required { " (required)" } else { "" };
        println!(
            "    {:34} {:8} {}{marker}",
            spec.key,
            spec.kind.to_string(),
            spec.description
        );
    }
}
