//! Output retrieval and completion records
//!
//! When the monitor sees a job reach a terminal state, the finalizer
//! downloads the output sandbox, classifies the wrapper exit value and builds
//! the [`CompletionRecord`] reported to the caller. It also decides, through a
//! [`RetryPolicy`], whether a failed job goes back to the pending queue.

use anyhow::{Context, Result};
use gridrun_client::Middleware;
use gridrun_core::domain::job::{Job, JobStatus};
use gridrun_core::domain::output::{CompletionRecord, ExitCode};
use gridrun_core::domain::pending::PendingSubmission;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::fs;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::repository::PendingRepository;
use crate::service::description::JobDescriptionGenerator;

const MISSING_OUTPUT_MESSAGE: &str = "Output files do not exist.";
const EXIT_MARKER: &str = "Exiting with return value";
const APP_SECTION_START: &str = "<application_execution>";
const APP_SECTION_END: &str = "</application_execution>";

/// Decides whether a failed job is submitted again
pub trait RetryPolicy: Send + Sync {
    /// `failed_attempts` counts failures of the job's document so far,
    /// including this one
    fn should_resubmit(&self, job: &Job, record: &CompletionRecord, failed_attempts: u32) -> bool;
}

/// Resubmits failed jobs up to a fixed number of times per document
#[derive(Debug, Clone, Copy)]
pub struct BoundedRetries {
    pub max: u32,
}

impl RetryPolicy for BoundedRetries {
    fn should_resubmit(&self, job: &Job, record: &CompletionRecord, failed_attempts: u32) -> bool {
        if record.is_success() {
            return false;
        }
        // Operator or middleware initiated removals are final
        if matches!(job.status, JobStatus::Cancelled | JobStatus::Deleted) {
            return false;
        }
        failed_attempts <= self.max
    }
}

/// Retrieves outputs of finished jobs and builds completion records
pub struct OutputFinalizer {
    middleware: Arc<dyn Middleware>,
    pending: Arc<dyn PendingRepository>,
    generator: Arc<Mutex<JobDescriptionGenerator>>,
    policy: Box<dyn RetryPolicy>,
    download_dir: PathBuf,
    out_dir: PathBuf,
    err_dir: PathBuf,
    retries: u32,
    retry_delay: Duration,
    dynamic_ban_enabled: bool,
    /// Last failed record per document
    failed_outputs: HashMap<String, CompletionRecord>,
    /// Failures per document
    failed_counts: HashMap<String, u32>,
    cancel: CancellationToken,
}

impl OutputFinalizer {
    pub fn new(
        config: &Config,
        middleware: Arc<dyn Middleware>,
        pending: Arc<dyn PendingRepository>,
        generator: Arc<Mutex<JobDescriptionGenerator>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            middleware,
            pending,
            generator,
            policy: Box::new(BoundedRetries {
                max: config.max_resubmissions,
            }),
            download_dir: config.download_dir(),
            out_dir: config.out_dir(),
            err_dir: config.err_dir(),
            retries: config.output_retries,
            retry_delay: config.output_retry_delay,
            dynamic_ban_enabled: config.dynamic_ban_enabled,
            failed_outputs: HashMap::new(),
            failed_counts: HashMap::new(),
            cancel,
        }
    }

    pub fn with_policy(mut self, policy: impl RetryPolicy + 'static) -> Self {
        self.policy = Box::new(policy);
        self
    }

    /// Builds the completion record of a job in a terminal state
    ///
    /// Never fails: retrieval problems degrade into an `ERROR_GET_STD` record.
    pub async fn finalize(&mut self, job: &Job) -> CompletionRecord {
        let document = format!("{}.jdl", job.file_name);

        let record = match job.status {
            JobStatus::Cancelled => {
                self.synthesize(job, &document, ExitCode::ExecutionCanceled, "Job Cancelled")
                    .await
            }
            JobStatus::Deleted => {
                self.synthesize(job, &document, ExitCode::ExecutionCanceled, "Job Deleted")
                    .await
            }
            JobStatus::Stalled => {
                self.synthesize(job, &document, ExitCode::ExecutionStalled, "Job Stalled")
                    .await
            }
            _ => self.retrieve(job, &document).await,
        };

        if record.is_success() {
            self.failed_outputs.remove(&document);
        } else {
            self.failed_outputs.insert(document, record.clone());
        }
        record
    }

    /// Puts the job back in the pending queue when the policy asks for it
    ///
    /// A `COMPLETED` job is never resubmitted, whatever its record says: its
    /// invocation already has a winner, so a new submission would only be
    /// killed as a losing replica. With dynamic banning on, `banned` is
    /// patched into the published document first so the new attempt avoids
    /// faulty sites.
    pub async fn resubmit_if_needed(
        &mut self,
        job: &Job,
        record: &CompletionRecord,
        banned: &BTreeSet<String>,
    ) -> Result<bool> {
        if record.is_success() {
            self.failed_counts.remove(&record.document);
            return Ok(false);
        }

        if job.status == JobStatus::Completed {
            info!(
                "Job {} completed with {}, keeping its record",
                job.id, record.exit_code
            );
            return Ok(false);
        }

        let failed = self.failed_counts.entry(record.document.clone()).or_insert(0);
        *failed += 1;
        let failed = *failed;

        if !self.policy.should_resubmit(job, record, failed) {
            info!(
                "Job {} ({}) will not be resubmitted after {} failure(s)",
                job.id, record.exit_code, failed
            );
            return Ok(false);
        }

        if self.dynamic_ban_enabled {
            info!("Dynamic ban enabled: updating banned sites of {}", record.document);
            let mut generator = self.generator.lock().await;
            let path = generator.document_path(&job.file_name);
            generator
                .update_banned_sites(&path, &job.command, banned)
                .await
                .with_context(|| format!("Failed to update banned sites in {}", path.display()))?;
        }

        self.pending
            .add(&PendingSubmission::new(
                job.file_name.clone(),
                job.command.clone(),
                job.parameters.clone(),
            ))
            .await
            .context("Failed to queue resubmission")?;

        info!(
            "Job {} resubmitted as {} (failure {})",
            job.id, job.file_name, failed
        );
        Ok(true)
    }

    async fn retrieve(&mut self, job: &Job, document: &str) -> CompletionRecord {
        let attempts = self.retries + 1;

        for attempt in 1..=attempts {
            match self.fetch_and_parse(job, document).await {
                Ok(record) if record.exit_code != ExitCode::Undefined => return record,
                Ok(_) => {
                    error!(
                        "Unknown exit value in outputs of job {} (attempt {}/{})",
                        job.id, attempt, attempts
                    );
                }
                Err(e) => {
                    error!(
                        "Error downloading outputs of job {} (attempt {}/{}): {:#}",
                        job.id, attempt, attempts, e
                    );
                }
            }

            if attempt < attempts {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        warn!("Output retrieval of job {} interrupted", job.id);
                        break;
                    }
                    _ = tokio::time::sleep(self.retry_delay) => {}
                }
            }
        }

        error!("Output retrieval failed for job {}", job.id);
        self.synthesize(job, document, ExitCode::ErrorGetStd, MISSING_OUTPUT_MESSAGE)
            .await
    }

    async fn fetch_and_parse(&self, job: &Job, document: &str) -> Result<CompletionRecord> {
        let sandbox = self
            .middleware
            .get_output(&job.id, &self.download_dir)
            .await
            .context("dirac-wms-job-get-output failed")?;

        fs::create_dir_all(&self.out_dir).await?;
        fs::create_dir_all(&self.err_dir).await?;

        let std_out = move_into(
            &sandbox.join("std.out"),
            &self.out_dir.join(format!("{}.out", job.file_name)),
        )
        .await?;
        let std_err = move_into(
            &sandbox.join("std.err"),
            &self.err_dir.join(format!("{}.err", job.file_name)),
        )
        .await?;
        self.move_provenance(&sandbox).await?;

        if let Err(e) = fs::remove_dir_all(&sandbox).await {
            warn!("Failed to remove {}: {}", sandbox.display(), e);
        }

        let out_text = read_optional(std_out.as_deref()).await?;
        let err_text = read_optional(std_err.as_deref()).await?;

        let exit_value = parse_exit_value(&err_text)
            .or_else(|| parse_exit_value(&out_text))
            .unwrap_or(-1);
        let exit_code = ExitCode::from_wrapper_exit(exit_value);

        let app_std_out =
            write_app_section(&out_text, &self.out_dir, &job.file_name, "app.out").await?;
        let app_std_err =
            write_app_section(&err_text, &self.err_dir, &job.file_name, "app.err").await?;

        Ok(CompletionRecord {
            job_id: job.id.clone(),
            document: document.to_string(),
            exit_code,
            message: String::new(),
            std_out,
            std_err,
            app_std_out,
            app_std_err,
        })
    }

    async fn move_provenance(&self, sandbox: &Path) -> Result<()> {
        let Ok(mut entries) = fs::read_dir(sandbox).await else {
            return Ok(());
        };
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if name.to_string_lossy().ends_with(".provenance.json") {
                move_into(&entry.path(), &self.out_dir.join(&name)).await?;
            }
        }
        Ok(())
    }

    /// Record for a job whose outputs are unavailable
    ///
    /// Streams of the last failed attempt of the same document are reused;
    /// otherwise the message itself is written as the job's streams.
    async fn synthesize(
        &self,
        job: &Job,
        document: &str,
        exit_code: ExitCode,
        message: &str,
    ) -> CompletionRecord {
        let mut record = CompletionRecord {
            job_id: job.id.clone(),
            document: document.to_string(),
            exit_code,
            message: message.to_string(),
            std_out: None,
            std_err: None,
            app_std_out: None,
            app_std_err: None,
        };

        if let Some(previous) = self.failed_outputs.get(document) {
            info!("Reusing streams of the previous attempt of {}", document);
            record.std_out = previous.std_out.clone();
            record.std_err = previous.std_err.clone();
            record.app_std_out = previous.app_std_out.clone();
            record.app_std_err = previous.app_std_err.clone();
            return record;
        }

        let targets = [
            (&mut record.std_out, &self.out_dir, "out"),
            (&mut record.std_err, &self.err_dir, "err"),
            (&mut record.app_std_out, &self.out_dir, "app.out"),
            (&mut record.app_std_err, &self.err_dir, "app.err"),
        ];
        for (slot, dir, extension) in targets {
            let path = dir.join(format!("{}.{}", job.file_name, extension));
            let written = match fs::create_dir_all(dir).await {
                Ok(()) => fs::write(&path, message).await,
                Err(e) => Err(e),
            };
            match written {
                Ok(()) => *slot = Some(path),
                Err(e) => warn!("Failed to write {}: {}", path.display(), e),
            }
        }
        record
    }
}

/// Exit value printed by the job wrapper, last occurrence wins
pub fn parse_exit_value(text: &str) -> Option<i32> {
    text.lines().rev().find_map(|line| {
        let idx = line.find(EXIT_MARKER)?;
        line[idx + EXIT_MARKER.len()..]
            .trim()
            .trim_end_matches('.')
            .parse()
            .ok()
    })
}

async fn write_app_section(
    text: &str,
    dir: &Path,
    file_name: &str,
    extension: &str,
) -> Result<Option<PathBuf>> {
    let Some(section) = application_section(text) else {
        return Ok(None);
    };
    let path = dir.join(format!("{}.{}", file_name, extension));
    fs::write(&path, section).await?;
    Ok(Some(path))
}

/// Lines between the application execution markers
fn application_section(text: &str) -> Option<String> {
    let start = text.find(APP_SECTION_START)? + APP_SECTION_START.len();
    let end = text[start..]
        .find(APP_SECTION_END)
        .map_or(text.len(), |idx| start + idx);
    Some(text[start..end].trim_matches('\n').to_string())
}

async fn move_into(from: &Path, to: &Path) -> Result<Option<PathBuf>> {
    if !fs::try_exists(from).await? {
        return Ok(None);
    }
    if fs::rename(from, to).await.is_err() {
        fs::copy(from, to)
            .await
            .with_context(|| format!("Failed to copy {} to {}", from.display(), to.display()))?;
        fs::remove_file(from).await?;
    }
    Ok(Some(to.to_path_buf()))
}

async fn read_optional(path: Option<&Path>) -> Result<String> {
    match path {
        Some(path) => fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display())),
        None => Ok(String::new()),
    }
}
