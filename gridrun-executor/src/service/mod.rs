//! Service layer
//!
//! Business logic used by the scheduler loops: site scoring, job
//! description rendering, output finalization and operator control.

pub mod control;
pub mod description;
pub mod faulty_sites;
pub mod finalizer;

pub use control::signal_job;
pub use description::{BannedSites, GenerateError, JobDescriptionGenerator, script_base};
pub use faulty_sites::{FaultySite, FaultySiteRegistry, FaultySiteTracker};
pub use finalizer::{BoundedRetries, OutputFinalizer, RetryPolicy};
