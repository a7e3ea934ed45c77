//! Scheduler layer
//!
//! Long-running loops of the executor. The dispatcher and the monitor only
//! coordinate through the repositories; the notification listener is an
//! optional side channel.

pub mod dispatcher;
pub mod monitor;
pub mod notification;

pub use dispatcher::SubmissionDispatcher;
pub use monitor::StatusMonitor;
pub use notification::MinorStatusListener;
