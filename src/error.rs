use crate::db::DriverError;
use crate::game::PlayerId;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum WorkbenchError {
    /// A lifecycle call arrived in the wrong order (double create, drop before create, ...).
    #[error("illegal state: {0}")]
    IllegalState(String),

    /// `params` is always the redacted rendering of the connection parameters.
    #[error("failed to connect to database '{database}': {message} - {params}")]
    Connection {
        database: String,
        params: String,
        message: String,
    },

    #[error("couldn't read table schema from {}: {source}", path.display())]
    SchemaLoad {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("no player with id {0} found to override")]
    AmendmentTargetNotFound(PlayerId),

    #[error("game already set up")]
    AlreadySetup,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("database error: {0}")]
    Driver(DriverError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("game error: {0}")]
    Game(String),
}

impl From<DriverError> for WorkbenchError {
    fn from(e: DriverError) -> Self {
        match e {
            DriverError::InvalidIdentifier(name) => {
                WorkbenchError::InvalidArgument(format!("invalid SQL identifier '{}'", name))
            }
            other => WorkbenchError::Driver(other),
        }
    }
}

impl WorkbenchError {
    pub fn illegal_state(msg: impl Into<String>) -> Self {
        WorkbenchError::IllegalState(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, WorkbenchError>;
