pub mod config;
pub mod db;
pub mod error;
pub mod game;
pub mod harness;
pub mod logging;
pub mod project;

pub use config::WorkbenchConfig;
pub use db::{Connection, ConnectionParams, Driver, Row, SchemaSource, Value};
pub use error::{Result, WorkbenchError};
pub use game::{Game, GameAction, GameOptions, Player, PlayerId, StateDefinition};
pub use harness::{DatabaseInstance, LifecycleState, Ownership, TableInstance, TruncateReport};
pub use logging::Logger;
pub use project::Project;
