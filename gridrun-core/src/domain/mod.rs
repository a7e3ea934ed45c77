//! Core domain types
//!
//! These types represent the entities tracked by the executor and are shared
//! between the executor (persists and mutates) and the CLI (reads and signals).

pub mod job;
pub mod minor_status;
pub mod output;
pub mod pending;
