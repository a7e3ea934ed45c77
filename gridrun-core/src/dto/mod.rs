//! Data Transfer Objects
//!
//! Requests handed from callers (library users, the CLI) to the executor.

pub mod job;
