//! Job lifecycle events
//!
//! Consumers that want to follow the executor (the CLI, an embedding
//! workflow engine) subscribe through an unbounded channel.

use gridrun_core::domain::job::JobStatus;
use gridrun_core::domain::output::CompletionRecord;
use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub enum JobEvent {
    /// The middleware accepted a job
    Submitted { job_id: String, file_name: String },
    StatusChanged {
        job_id: String,
        from: JobStatus,
        to: JobStatus,
    },
    /// A job reached a terminal state and its outputs were resolved
    Finished(CompletionRecord),
}

/// Optional sender shared by the loops
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    sender: Option<UnboundedSender<JobEvent>>,
}

impl EventSink {
    pub fn new(sender: UnboundedSender<JobEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Sink that drops every event
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: JobEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                debug!("Event receiver dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_emit_delivers_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.emit(JobEvent::Submitted {
            job_id: "1".to_string(),
            file_name: "inv-1".to_string(),
        });

        assert!(matches!(rx.try_recv(), Ok(JobEvent::Submitted { .. })));
    }

    #[test]
    fn test_disabled_sink_and_dropped_receiver() {
        EventSink::disabled().emit(JobEvent::StatusChanged {
            job_id: "1".to_string(),
            from: JobStatus::Queued,
            to: JobStatus::Running,
        });

        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        EventSink::new(tx).emit(JobEvent::StatusChanged {
            job_id: "1".to_string(),
            from: JobStatus::Queued,
            to: JobStatus::Running,
        });
    }
}
