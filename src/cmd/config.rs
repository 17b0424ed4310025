use bgawb::logging::Logger;
use bgawb::{Result, WorkbenchConfig, WorkbenchError};

pub fn run(log: &Logger, config: &WorkbenchConfig) -> Result<()> {
    log.debug(
        "resolved project config",
        &[("directory", &config.directory().display().to_string())],
    );
    let json = serde_json::to_string_pretty(config.test_db())
        .map_err(|e| WorkbenchError::Config(format!("serializing config: {}", e)))?;
    println!("{}", json);
    Ok(())
}
