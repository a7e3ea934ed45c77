//! Job command handlers
//!
//! Listing reads the store directly. Kill, reschedule and replicate write a
//! control marker on the job; the executor's monitor acts on it during its
//! next cycle.

use anyhow::Result;
use clap::Subcommand;
use colored::*;
use gridrun_core::domain::job::{Job, JobStatus};
use gridrun_executor::repository::Repositories;
use gridrun_executor::service::signal_job;

use crate::config::Config;

/// Job subcommands
#[derive(Subcommand)]
pub enum JobCommands {
    /// List jobs
    List {
        /// Only jobs in this status (e.g. RUNNING, COMPLETED)
        #[arg(short, long)]
        status: Option<JobStatus>,

        /// Print the jobs as JSON
        #[arg(long)]
        json: bool,
    },
    /// Get job details
    Get {
        /// Middleware job ID
        id: String,
    },
    /// Kill a job
    Kill {
        /// Middleware job ID
        id: String,
    },
    /// Put a job back in the middleware queue
    Reschedule {
        /// Middleware job ID
        id: String,
    },
    /// Submit another replica of a job
    Replicate {
        /// Middleware job ID
        id: String,
    },
}

/// Handle job commands
pub async fn handle_jobs_command(command: JobCommands, config: &Config) -> Result<()> {
    let executor_config = config.executor_config()?;
    let repos = config.repositories(&executor_config).await?;

    match command {
        JobCommands::List { status, json } => list_jobs(&repos, status, json).await,
        JobCommands::Get { id } => get_job(&repos, &id).await,
        JobCommands::Kill { id } => signal(&repos, &id, JobStatus::Kill).await,
        JobCommands::Reschedule { id } => signal(&repos, &id, JobStatus::Reschedule).await,
        JobCommands::Replicate { id } => signal(&repos, &id, JobStatus::Replicate).await,
    }
}

async fn list_jobs(repos: &Repositories, status: Option<JobStatus>, json: bool) -> Result<()> {
    let jobs = match status {
        Some(status) => repos.jobs.find_by_status(status).await?,
        None => repos.jobs.list_all().await?,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&jobs)?);
        return Ok(());
    }

    if jobs.is_empty() {
        println!("{}", "No jobs found.".yellow());
    } else {
        println!("{}", format!("Found {} job(s):", jobs.len()).bold());
        println!();
        for job in jobs {
            print_job_summary(&job);
        }
    }

    Ok(())
}

async fn get_job(repos: &Repositories, id: &str) -> Result<()> {
    let job = repos
        .jobs
        .find_by_id(id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("Job {} not found", id))?;

    print_job_details(&job);

    let statuses = repos.minor_statuses.list_for_job(id).await?;
    if !statuses.is_empty() {
        println!("\n{}", "Minor statuses:".bold());
        for status in statuses {
            println!(
                "  {} {}",
                status
                    .recorded_at
                    .format("%H:%M:%S")
                    .to_string()
                    .dimmed(),
                status.code
            );
        }
    }

    Ok(())
}

async fn signal(repos: &Repositories, id: &str, marker: JobStatus) -> Result<()> {
    let job = signal_job(repos.jobs.as_ref(), id, marker).await?;
    println!(
        "{} Job {} marked {}",
        "✓".green(),
        job.id.bold(),
        colorize_status(&job.status)
    );
    Ok(())
}

fn print_job_summary(job: &Job) {
    println!("  {} Job {}", "▸".cyan(), job.id.bold());
    println!("    File:     {}", job.file_name.dimmed());
    println!("    Status:   {}", colorize_status(&job.status));
    if let Some(site) = &job.site {
        println!("    Site:     {}", site);
    }
    println!(
        "    Created:  {}",
        job.created_at
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
            .dimmed()
    );
    println!();
}

fn print_job_details(job: &Job) {
    println!("{}", "Job Details:".bold());
    println!("  ID:          {}", job.id.cyan());
    println!("  Invocation:  {}", job.invocation_id.to_string().dimmed());
    println!("  File:        {}", job.file_name);
    println!("  Command:     {}", job.command);
    println!("  Parameters:  {}", job.parameters.trim_end());
    println!("  Status:      {}", colorize_status(&job.status));
    println!(
        "  Site:        {}",
        job.site.as_deref().unwrap_or("-").dimmed()
    );
    println!(
        "  Created:     {}",
        job.created_at.format("%Y-%m-%d %H:%M:%S")
    );

    if let Some(queued) = job.queued_at {
        println!("  Queued:      {}", queued.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(started) = job.started_at {
        println!("  Started:     {}", started.format("%Y-%m-%d %H:%M:%S"));
    }

    if let Some(ended) = job.ended_at {
        println!("  Ended:       {}", ended.format("%Y-%m-%d %H:%M:%S"));

        if let Some(started) = job.started_at {
            let duration = ended.signed_duration_since(started);
            println!("  Duration:    {}s", duration.num_seconds());
        }
    }

    if let Some(code) = job.exit_code {
        let code_str = code.to_string();
        println!(
            "  Exit Code:   {}",
            if code == 0 {
                code_str.green()
            } else {
                code_str.red()
            }
        );
    }

    if job.replicating {
        println!("  {}", "Replica pending submission".yellow());
    }
}

/// Colorize job status for display
fn colorize_status(status: &JobStatus) -> colored::ColoredString {
    let status_str = status.as_str();
    match status {
        JobStatus::SuccessfullySubmitted | JobStatus::Queued => status_str.yellow(),
        JobStatus::Running => status_str.cyan(),
        JobStatus::Completed => status_str.green(),
        JobStatus::Error | JobStatus::Stalled => status_str.red(),
        JobStatus::Kill
        | JobStatus::KillReplica
        | JobStatus::Replicate
        | JobStatus::Reschedule => status_str.magenta(),
        JobStatus::Cancelled
        | JobStatus::Deleted
        | JobStatus::CancelledReplica
        | JobStatus::DeletedReplica => status_str.dimmed(),
    }
}
