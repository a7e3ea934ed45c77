//! Gridrun Executor
//!
//! Runs the tasks of a workflow engine on a grid middleware.
//!
//! Architecture:
//! - Configuration: settings from the environment with defaults
//! - Repositories: job, pending submission and minor status stores (Postgres or in-memory)
//! - Services: description rendering, site fault tracking, output finalization
//! - Scheduler: submission dispatcher, status monitor and notification listener
//!
//! [`Executor`] ties them together: callers submit jobs and signal them, the
//! background loops do the rest.

pub mod config;
pub mod db;
pub mod events;
pub mod executor;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod shutdown;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use events::JobEvent;
pub use executor::Executor;
