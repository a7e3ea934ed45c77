//! Minor status notifications
//!
//! Optional side channel from the middleware notification service. The
//! listener connects over TCP, announces the simulation id on the first line,
//! then stores every `<job id>###<code>` line it receives. Dropped
//! connections are retried with exponential backoff until cancelled.

use anyhow::{Context, Result};
use chrono::Utc;
use gridrun_core::domain::minor_status::MinorStatus;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::repository::MinorStatusRepository;

const SEPARATOR: &str = "###";

/// Backoff parameters for reconnecting to the notification service
pub struct ReconnectConfig {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

/// Next backoff delay, clamped to `max_delay`
pub fn next_delay(current: Duration, config: &ReconnectConfig) -> Duration {
    let next_ms = (current.as_millis() as f64 * config.multiplier) as u64;
    Duration::from_millis(next_ms).min(config.max_delay)
}

/// Wait before the next connection attempt and the delay carried past it
///
/// A clean close starts over from `initial_delay`; a failure waits `current`
/// and backs off.
pub fn retry_schedule(
    clean_close: bool,
    current: Duration,
    config: &ReconnectConfig,
) -> (Duration, Duration) {
    if clean_close {
        (config.initial_delay, config.initial_delay)
    } else {
        (current, next_delay(current, config))
    }
}

/// Parses a `<job id>###<code>` notification line
pub fn parse_notification(line: &str) -> Option<(String, i32)> {
    let (job_id, code) = line.trim().split_once(SEPARATOR)?;
    let job_id = job_id.trim();
    if job_id.is_empty() {
        return None;
    }
    Some((job_id.to_string(), code.trim().parse().ok()?))
}

pub struct MinorStatusListener {
    address: String,
    simulation_id: String,
    statuses: Arc<dyn MinorStatusRepository>,
    reconnect: ReconnectConfig,
    cancel: CancellationToken,
}

impl MinorStatusListener {
    pub fn new(
        config: &Config,
        statuses: Arc<dyn MinorStatusRepository>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            address: format!("{}:{}", config.dirac_host, config.notification_port),
            simulation_id: config.simulation_id.clone(),
            statuses,
            reconnect: ReconnectConfig::default(),
            cancel,
        }
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Listens until cancelled, reconnecting whenever the connection drops
    pub async fn run(self) -> Result<()> {
        info!("Starting minor status listener ({})", self.address);
        let mut delay = self.reconnect.initial_delay;

        loop {
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.listen() => result,
            };

            let (wait, next) = retry_schedule(result.is_ok(), delay, &self.reconnect);
            match result {
                Ok(()) => info!("Notification service closed the connection"),
                Err(e) => warn!(
                    "Notification service unavailable, retrying in {:?}: {:#}",
                    wait, e
                ),
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
            delay = next;
        }

        info!("Minor status listener stopped");
        Ok(())
    }

    async fn listen(&self) -> Result<()> {
        let stream = TcpStream::connect(&self.address)
            .await
            .with_context(|| format!("Failed to connect to {}", self.address))?;
        let (reader, mut writer) = stream.into_split();

        writer
            .write_all(format!("{}\n", self.simulation_id).as_bytes())
            .await
            .context("Failed to announce simulation id")?;
        writer.flush().await?;
        info!("Connected to notification service at {}", self.address);

        let mut lines = BufReader::new(reader).lines();
        while let Some(line) = lines.next_line().await? {
            let Some((job_id, code)) = parse_notification(&line) else {
                warn!("Ignoring malformed notification: {}", line);
                continue;
            };

            debug!("Minor status {} for job {}", code, job_id);
            let status = MinorStatus {
                job_id,
                code,
                recorded_at: Utc::now(),
            };
            if let Err(e) = self.statuses.add(&status).await {
                warn!("Failed to store minor status of job {}: {}", status.job_id, e);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryMinorStatusRepository;
    use tokio::net::TcpListener;

    #[test]
    fn test_parse_notification() {
        assert_eq!(
            parse_notification("12345###101\n"),
            Some(("12345".to_string(), 101))
        );
        assert_eq!(parse_notification("12345###abc"), None);
        assert_eq!(parse_notification("###3"), None);
        assert_eq!(parse_notification("no separator"), None);
    }

    #[test]
    fn test_next_delay_doubles_and_clamps() {
        let config = ReconnectConfig {
            max_delay: Duration::from_secs(10),
            ..Default::default()
        };
        assert_eq!(
            next_delay(Duration::from_secs(1), &config),
            Duration::from_secs(2)
        );
        assert_eq!(
            next_delay(Duration::from_secs(8), &config),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_clean_close_restarts_backoff() {
        let config = ReconnectConfig::default();
        let mut delay = config.initial_delay;
        let mut waits = Vec::new();

        for clean_close in [false, false, true, false] {
            let (wait, next) = retry_schedule(clean_close, delay, &config);
            waits.push(wait.as_secs());
            delay = next;
        }

        assert_eq!(waits, vec![1, 2, 1, 1]);
        assert_eq!(delay, Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_listener_stores_notifications() {
        let server = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = server.local_addr().unwrap().port();

        let mut config = Config::new("sim-42".to_string(), std::env::temp_dir());
        config.dirac_host = "127.0.0.1".to_string();
        config.notification_port = port;

        let repo = Arc::new(InMemoryMinorStatusRepository::new());
        let cancel = CancellationToken::new();
        let listener = MinorStatusListener::new(&config, repo.clone(), cancel.clone());
        let handle = tokio::spawn(listener.run());

        let (socket, _) = server.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();
        assert_eq!(lines.next_line().await.unwrap().unwrap(), "sim-42");

        writer
            .write_all(b"7###101\ngarbage\n7###102\n")
            .await
            .unwrap();
        writer.flush().await.unwrap();

        for _ in 0..100 {
            if repo.list_for_job("7").await.unwrap().len() == 2 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let codes: Vec<i32> = repo
            .list_for_job("7")
            .await
            .unwrap()
            .iter()
            .map(|s| s.code)
            .collect();
        assert_eq!(codes, vec![101, 102]);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
