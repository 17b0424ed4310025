pub mod config;
pub mod create;
pub mod drop;
pub mod truncate;

use bgawb::harness::{DatabaseInstance, Ownership};
use bgawb::logging::Logger;
use bgawb::WorkbenchConfig;
use bgawb::db::SchemaSource;
use std::sync::Arc;

/// A database instance for `name` using the project's connection settings.
fn database_instance(
    log: &Arc<Logger>,
    config: &WorkbenchConfig,
    name: String,
    schema_files: Vec<SchemaSource>,
) -> DatabaseInstance {
    DatabaseInstance::new(
        name,
        config.connection_params(),
        schema_files,
        Ownership::from_externally_managed(config.externally_managed()),
    )
    .with_logger(log.clone())
}
