//! Executor facade
//!
//! Wires configuration, middleware client and repositories into the running
//! loops and exposes the operations callers need: submit a job, signal a
//! job, and shut everything down.

use anyhow::{Context, Result};
use gridrun_client::Middleware;
use gridrun_core::domain::job::{Job, JobStatus};
use gridrun_core::domain::pending::PendingSubmission;
use gridrun_core::dto::job::SubmitJob;
use std::collections::BTreeSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::Config;
use crate::events::{EventSink, JobEvent};
use crate::repository::Repositories;
use crate::scheduler::{MinorStatusListener, StatusMonitor, SubmissionDispatcher};
use crate::service::{
    FaultySiteRegistry, JobDescriptionGenerator, OutputFinalizer, script_base, signal_job,
};

pub struct Executor {
    config: Config,
    middleware: Arc<dyn Middleware>,
    repos: Repositories,
    generator: Arc<Mutex<JobDescriptionGenerator>>,
    sites: Arc<FaultySiteRegistry>,
    events: EventSink,
    cancel: CancellationToken,
    tasks: Vec<(&'static str, JoinHandle<Result<()>>)>,
}

impl Executor {
    /// Validates the environment and prepares the workspace
    ///
    /// Fails when the middleware tools are missing or misbehaving.
    pub async fn load(
        config: Config,
        middleware: Arc<dyn Middleware>,
        repos: Repositories,
    ) -> Result<Self> {
        config.validate()?;
        middleware
            .check_available()
            .await
            .context("Middleware is not available")?;
        config
            .prepare_workspace()
            .with_context(|| format!("Failed to prepare {}", config.workspace.display()))?;

        info!(
            "Executor loaded for simulation {} in {}",
            config.simulation_id,
            config.absolute_workspace().display()
        );

        Ok(Self {
            generator: Arc::new(Mutex::new(JobDescriptionGenerator::new(&config))),
            sites: Arc::new(FaultySiteRegistry::new()),
            events: EventSink::disabled(),
            cancel: CancellationToken::new(),
            tasks: Vec::new(),
            config,
            middleware,
            repos,
        })
    }

    /// Sends lifecycle events to `sender`; must be called before `start`
    pub fn with_events(mut self, sender: UnboundedSender<JobEvent>) -> Self {
        self.events = EventSink::new(sender);
        self
    }

    /// Spawns the dispatcher, the monitor and the optional listener
    pub fn start(&mut self) {
        if !self.tasks.is_empty() {
            return;
        }

        let dispatcher = SubmissionDispatcher::new(
            &self.config,
            self.middleware.clone(),
            self.repos.clone(),
            self.events.clone(),
            self.cancel.clone(),
        );
        self.tasks.push(("dispatcher", tokio::spawn(dispatcher.run())));

        let finalizer = OutputFinalizer::new(
            &self.config,
            self.middleware.clone(),
            self.repos.pending.clone(),
            self.generator.clone(),
            self.cancel.clone(),
        );
        let monitor = StatusMonitor::new(
            &self.config,
            self.middleware.clone(),
            self.repos.clone(),
            finalizer,
            self.sites.clone(),
            self.events.clone(),
            self.cancel.clone(),
        );
        self.tasks.push(("monitor", tokio::spawn(monitor.run())));

        if self.config.notification_enabled {
            let listener = MinorStatusListener::new(
                &self.config,
                self.repos.minor_statuses.clone(),
                self.cancel.child_token(),
            );
            self.tasks.push(("listener", tokio::spawn(listener.run())));
        }

        info!("Executor started with {} task(s)", self.tasks.len());
    }

    /// Renders and publishes the job description, then queues the job
    ///
    /// Returns the document base name, shared by every replica of the job.
    pub async fn submit(&self, job: SubmitJob) -> Result<String> {
        let file_name = script_base(&job.script_name).to_string();
        let banned = if self.config.dynamic_ban_enabled {
            self.sites.banned_sites(&job.command)
        } else {
            BTreeSet::new()
        };

        {
            let mut generator = self.generator.lock().await;
            let content = generator
                .generate(&job.script_name, &job.command, &job.env, &banned)
                .with_context(|| format!("Failed to render description of {}", job.script_name))?;
            generator
                .publish(&file_name, &content)
                .await
                .context("Failed to publish job description")?;
        }

        self.repos
            .pending
            .add(&PendingSubmission::new(
                file_name.clone(),
                job.command.clone(),
                job.parameter_string(),
            ))
            .await
            .context("Failed to queue submission")?;

        info!("Queued {} ({})", file_name, job.command);
        Ok(file_name)
    }

    pub async fn kill(&self, job_id: &str) -> Result<Job> {
        signal_job(self.repos.jobs.as_ref(), job_id, JobStatus::Kill).await
    }

    pub async fn reschedule(&self, job_id: &str) -> Result<Job> {
        signal_job(self.repos.jobs.as_ref(), job_id, JobStatus::Reschedule).await
    }

    pub async fn replicate(&self, job_id: &str) -> Result<Job> {
        signal_job(self.repos.jobs.as_ref(), job_id, JobStatus::Replicate).await
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stops every loop and waits for them, including the kill sweep
    pub async fn terminate(&mut self) {
        info!("Terminating executor");
        self.cancel.cancel();

        for (name, task) in self.tasks.drain(..) {
            match task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("{} stopped with an error: {:#}", name, e),
                Err(e) => error!("{} task panicked: {}", name, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeMiddleware, report};
    use gridrun_core::domain::job::MiddlewareStatus;
    use gridrun_core::dto::job::env;
    use std::collections::HashMap;
    use std::time::Duration;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    fn config(dir: &TempDir) -> Config {
        let mut config = Config::new("sim".to_string(), dir.path().to_path_buf());
        config.poll_interval = Duration::from_millis(20);
        config.output_retry_delay = Duration::from_millis(1);
        config
    }

    fn submit_job() -> SubmitJob {
        SubmitJob {
            script_name: "inv-1.sh".to_string(),
            command: "bet".to_string(),
            parameters: vec!["-i".to_string(), "in.nii".to_string()],
            env: HashMap::from([(env::PRIORITY.to_string(), "4".to_string())]),
        }
    }

    #[tokio::test]
    async fn test_submit_publishes_and_queues() {
        let dir = TempDir::new().unwrap();
        let repos = Repositories::in_memory();
        let executor = Executor::load(
            config(&dir),
            Arc::new(FakeMiddleware::new()),
            repos.clone(),
        )
        .await
        .unwrap();

        let file_name = executor.submit(submit_job()).await.unwrap();

        assert_eq!(file_name, "inv-1");
        let document = std::fs::read_to_string(dir.path().join("jdl/inv-1.jdl")).unwrap();
        assert!(document.contains("Priority        = 4;"));

        let pending = repos.pending.list().await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].parameters, "-i in.nii ");
        assert!(dir.path().join("out").is_dir());
    }

    #[tokio::test]
    async fn test_load_rejects_invalid_config() {
        let dir = TempDir::new().unwrap();
        let mut config = config(&dir);
        config.simulation_id = String::new();

        let result = Executor::load(
            config,
            Arc::new(FakeMiddleware::new()),
            Repositories::in_memory(),
        )
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_signals_are_stored() {
        let dir = TempDir::new().unwrap();
        let repos = Repositories::in_memory();
        let executor = Executor::load(
            config(&dir),
            Arc::new(FakeMiddleware::new()),
            repos.clone(),
        )
        .await
        .unwrap();
        let job = Job::submitted("9", uuid::Uuid::new_v4(), "inv-1", "bet", "");
        repos.jobs.add(&job).await.unwrap();

        assert_eq!(
            executor.replicate("9").await.unwrap().status,
            JobStatus::Replicate
        );
        assert!(executor.kill("404").await.is_err());
    }

    #[tokio::test]
    async fn test_end_to_end_submission_and_completion() {
        let dir = TempDir::new().unwrap();
        let repos = Repositories::in_memory();
        let middleware = Arc::new(FakeMiddleware::new());
        middleware.set_output("Exiting with return value 0\n", "");
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut executor = Executor::load(config(&dir), middleware.clone(), repos.clone())
            .await
            .unwrap()
            .with_events(tx);
        executor.submit(submit_job()).await.unwrap();
        executor.start();

        let job_id = loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(JobEvent::Submitted { job_id, .. })) => break job_id,
                Ok(Some(_)) => continue,
                other => panic!("no submission event: {:?}", other),
            }
        };
        middleware.push_status(vec![report(&job_id, MiddlewareStatus::Done, None)]);

        let record = loop {
            match tokio::time::timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(JobEvent::Finished(record))) => break record,
                Ok(Some(_)) => continue,
                other => panic!("no completion event: {:?}", other),
            }
        };
        assert!(record.is_success());

        executor.terminate().await;
        let job = repos.jobs.find_by_id(&job_id).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(repos.pending.list().await.unwrap().is_empty());
    }
}
