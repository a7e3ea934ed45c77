//! Scripted middleware for loop tests

use async_trait::async_trait;
use gridrun_client::{ClientError, Middleware, Result, StatusReport, SubmitLine};
use gridrun_core::domain::job::MiddlewareStatus;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

#[derive(Default)]
struct State {
    submit_outputs: VecDeque<Result<Vec<SubmitLine>>>,
    status_outputs: VecDeque<Result<Vec<StatusReport>>>,
    std_out: String,
    std_err: String,
    fail_get_output: bool,
    submit_calls: Vec<Vec<PathBuf>>,
    status_calls: Vec<Vec<String>>,
    kill_calls: Vec<Vec<String>>,
    reschedule_calls: Vec<String>,
    get_output_calls: Vec<String>,
}

/// Middleware answering from queues filled by the test
///
/// Without a queued submit answer every document is accepted with an
/// increasing numeric id. Without a queued status answer the status call
/// returns nothing.
#[derive(Default)]
pub struct FakeMiddleware {
    state: Mutex<State>,
    next_id: Mutex<u64>,
}

impl FakeMiddleware {
    pub fn new() -> Self {
        Self {
            next_id: Mutex::new(1000),
            ..Self::default()
        }
    }

    fn state(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    pub fn push_submit(&self, lines: Vec<SubmitLine>) {
        self.state().submit_outputs.push_back(Ok(lines));
    }

    pub fn push_submit_error(&self, error: ClientError) {
        self.state().submit_outputs.push_back(Err(error));
    }

    pub fn push_status(&self, reports: Vec<StatusReport>) {
        self.state().status_outputs.push_back(Ok(reports));
    }

    pub fn push_status_error(&self, error: ClientError) {
        self.state().status_outputs.push_back(Err(error));
    }

    pub fn set_output(&self, std_out: &str, std_err: &str) {
        let mut state = self.state();
        state.std_out = std_out.to_string();
        state.std_err = std_err.to_string();
        state.fail_get_output = false;
    }

    pub fn fail_get_output(&self, fail: bool) {
        self.state().fail_get_output = fail;
    }

    pub fn submit_calls(&self) -> Vec<Vec<PathBuf>> {
        self.state().submit_calls.clone()
    }

    pub fn status_calls(&self) -> Vec<Vec<String>> {
        self.state().status_calls.clone()
    }

    pub fn kill_calls(&self) -> Vec<Vec<String>> {
        self.state().kill_calls.clone()
    }

    pub fn killed_ids(&self) -> Vec<String> {
        self.state().kill_calls.concat()
    }

    pub fn reschedule_calls(&self) -> Vec<String> {
        self.state().reschedule_calls.clone()
    }

    pub fn get_output_calls(&self) -> Vec<String> {
        self.state().get_output_calls.clone()
    }
}

/// Builds a status report
pub fn report(job_id: &str, status: MiddlewareStatus, site: Option<&str>) -> StatusReport {
    StatusReport {
        job_id: job_id.to_string(),
        status,
        site: site.map(String::from),
    }
}

#[async_trait]
impl Middleware for FakeMiddleware {
    async fn check_available(&self) -> Result<()> {
        Ok(())
    }

    async fn submit(&self, documents: &[PathBuf]) -> Result<Vec<SubmitLine>> {
        let scripted = {
            let mut state = self.state();
            state.submit_calls.push(documents.to_vec());
            state.submit_outputs.pop_front()
        };
        if let Some(output) = scripted {
            return output;
        }

        let mut next_id = self.next_id.lock().unwrap();
        Ok(documents
            .iter()
            .map(|_| {
                *next_id += 1;
                SubmitLine::Accepted(next_id.to_string())
            })
            .collect())
    }

    async fn status(&self, job_ids: &[String]) -> Result<Vec<StatusReport>> {
        let mut state = self.state();
        state.status_calls.push(job_ids.to_vec());
        state.status_outputs.pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn kill(&self, job_ids: &[String]) -> Result<()> {
        self.state().kill_calls.push(job_ids.to_vec());
        Ok(())
    }

    async fn reschedule(&self, job_id: &str) -> Result<()> {
        self.state().reschedule_calls.push(job_id.to_string());
        Ok(())
    }

    async fn get_output(&self, job_id: &str, dest: &Path) -> Result<PathBuf> {
        let (fail, std_out, std_err) = {
            let mut state = self.state();
            state.get_output_calls.push(job_id.to_string());
            (
                state.fail_get_output,
                state.std_out.clone(),
                state.std_err.clone(),
            )
        };

        if fail {
            return Err(ClientError::CommandFailed {
                command: "dirac-wms-job-get-output".to_string(),
                exit_code: 1,
                detail: "No such file".to_string(),
            });
        }

        let sandbox = dest.join(job_id);
        std::fs::create_dir_all(&sandbox)?;
        std::fs::write(sandbox.join("std.out"), std_out)?;
        std::fs::write(sandbox.join("std.err"), std_err)?;
        Ok(sandbox)
    }
}
