//! Gridrun Core
//!
//! Core types shared by the gridrun crates.
//!
//! This crate contains:
//! - Domain types: jobs, pending submissions, completion records, minor statuses
//! - DTOs: submission requests handed to the executor

pub mod domain;
pub mod dto;
