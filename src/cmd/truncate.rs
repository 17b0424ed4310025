use bgawb::logging::Logger;
use bgawb::{Result, WorkbenchConfig};
use std::sync::Arc;

pub fn run(log: &Arc<Logger>, config: &WorkbenchConfig, name: String) -> Result<()> {
    let mut database = super::database_instance(log, config, name, Vec::new());
    database.attach()?;
    let report = database.truncate()?;
    database.disconnect();
    for table in &report.truncated {
        log.info("truncated table", &[("table", table)]);
    }
    if report.failed.is_empty() {
        log.info(
            "truncate completed",
            &[("tables", &report.truncated.len().to_string())],
        );
    } else {
        log.warn(
            "truncate completed with failures",
            &[
                ("tables", &report.truncated.len().to_string()),
                ("failed", &report.failed.len().to_string()),
            ],
        );
    }
    Ok(())
}
