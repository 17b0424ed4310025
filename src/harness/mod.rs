//! Disposable databases for game tests.
//!
//! A [`TableInstance`] owns one [`DatabaseInstance`] for the duration of a
//! test case: create it, seed a game, assert on rows, drop it.

mod database;
mod table;

pub use database::{DatabaseInstance, LifecycleState, Ownership, TruncateReport};
pub use table::{TableInstance, TableInstanceBuilder};
