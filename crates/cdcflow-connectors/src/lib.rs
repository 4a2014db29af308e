//! Built-in cdcflow connectors.

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

use std::sync::Arc;

use cdcflow_sdk::factory::{FactoryError, FactoryRegistry};

pub mod print;
pub mod values;

/// Register the built-in sources and sinks. Values sinks write into
/// `database`.
///
/// # Errors
///
/// [`FactoryError::DuplicateIdentifier`] if a built-in identifier is
/// already registered.
pub fn register_builtin(
    registry: &mut FactoryRegistry,
    database: Arc<values::ValuesDatabase>,
) -> Result<(), FactoryError> {
    registry.register_source(values::ValuesSourceFactory)?;
    registry.register_sink(values::ValuesSinkFactory::with_database(database))?;
    registry.register_sink(print::PrintSinkFactory)?;
    Ok(())
}

/// Registry holding only the built-in connectors.
///
/// # Errors
///
/// Propagates [`register_builtin`] errors.
pub fn builtin_registry(
    database: Arc<values::ValuesDatabase>,
) -> Result<FactoryRegistry, FactoryError> {
    let mut registry = FactoryRegistry::new();
    register_builtin(&mut registry, database)?;
    Ok(registry)
}
