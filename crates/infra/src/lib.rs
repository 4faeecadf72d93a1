//! Infrastructure layer: event stores, repository, command handling,
//! projections, configuration and wiring.

pub mod bootstrap;
pub mod command_handler;
pub mod config;
pub mod db;
pub mod event_store;
pub mod policy;
pub mod projections;
pub mod read_model;
pub mod repository;
pub mod workers;

pub use bootstrap::{BootstrapError, ProfileEngine};
pub use command_handler::{CommandHandler, CommandOutcome, DispatchError};
pub use config::{ConfigError, EngineConfig, LogFormat, ProjectionDispatchMode, RetryConfig};
pub use repository::Repository;

#[cfg(test)]
mod integration_tests;
