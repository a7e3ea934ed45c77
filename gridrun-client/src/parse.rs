//! Parsing of middleware command output

use gridrun_core::domain::job::MiddlewareStatus;

use crate::error::{ClientError, Result};

/// One output line of a batched submission, matched positionally to the batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitLine {
    /// The middleware accepted the document and assigned this identifier
    Accepted(String),
    /// The line did not carry an identifier; holds the raw line
    Rejected(String),
}

/// Status of one job as reported by the middleware
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub job_id: String,
    pub status: MiddlewareStatus,
    pub site: Option<String>,
}

/// Parses a submission output line of the form `... = <numeric id>`
pub fn parse_submit_line(line: &str) -> SubmitLine {
    let id = line
        .rfind('=')
        .map(|idx| line[idx + 1..].trim())
        .filter(|id| !id.is_empty() && id.chars().all(|c| c.is_ascii_digit()));

    match id {
        Some(id) => SubmitLine::Accepted(id.to_string()),
        None => SubmitLine::Rejected(line.to_string()),
    }
}

/// Parses every non-blank line of a submission output
///
/// The submit tool writes exactly one non-empty line per document, either
/// the assigned id or the reason it failed, so the n-th slot belongs to the
/// n-th document of the batch. Blank or whitespace-only lines carry no
/// document and never take a slot; an unparsable non-blank line does, as
/// `Rejected`.
pub fn parse_submit_output(stdout: &str) -> Vec<SubmitLine> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_submit_line)
        .collect()
}

/// Parses a status line such as
/// `JobID=42 ApplicationStatus=Unknown; Status=Running; Site=LCG.CPPM.fr;`
pub fn parse_status_line(line: &str) -> Result<StatusReport> {
    let line = line.trim();
    let rest = line
        .strip_prefix("JobID=")
        .ok_or_else(|| ClientError::ParseError(format!("missing JobID in '{}'", line)))?;

    let (job_id, fields) = match rest.find(char::is_whitespace) {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, ""),
    };
    let job_id = job_id.trim_end_matches(';');
    if job_id.is_empty() {
        return Err(ClientError::ParseError(format!("empty JobID in '{}'", line)));
    }

    let mut status = None;
    let mut site = None;
    for segment in fields.split(';') {
        let Some((key, value)) = segment.split_once('=') else {
            continue;
        };
        match key.trim() {
            "Status" => {
                let parsed = value
                    .trim()
                    .parse::<MiddlewareStatus>()
                    .map_err(ClientError::ParseError)?;
                status = Some(parsed);
            }
            "Site" => {
                let value = value.trim();
                if !value.is_empty() {
                    site = Some(value.to_string());
                }
            }
            _ => {}
        }
    }

    let status = status
        .ok_or_else(|| ClientError::ParseError(format!("missing Status in '{}'", line)))?;

    Ok(StatusReport {
        job_id: job_id.to_string(),
        status,
        site,
    })
}
