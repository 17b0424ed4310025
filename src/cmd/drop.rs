use bgawb::logging::Logger;
use bgawb::{Result, WorkbenchConfig};
use std::sync::Arc;

pub fn run(log: &Arc<Logger>, config: &WorkbenchConfig, name: String) -> Result<()> {
    let mut database = super::database_instance(log, config, name, Vec::new());
    database.attach()?.drop_database()?;
    database.disconnect();
    log.info("drop completed", &[("database", database.name())]);
    Ok(())
}
