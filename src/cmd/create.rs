use bgawb::logging::Logger;
use bgawb::{Result, WorkbenchConfig};
use std::sync::Arc;

pub fn run(log: &Arc<Logger>, config: &WorkbenchConfig, name: Option<String>) -> Result<()> {
    let project = config.load_project()?;
    let name = name.unwrap_or_else(|| config.test_db_name());
    let schema_files = vec![
        config.test_db().driver.base_schema(),
        project.db_model_sql_file().into(),
    ];
    log.info(
        "creating database for project",
        &[("project", project.name()), ("database", &name)],
    );
    let mut database = super::database_instance(log, config, name, schema_files);
    database.create()?;
    database.disconnect();
    println!("{}", database.name());
    Ok(())
}
