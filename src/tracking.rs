//! Experiment Tracking
//!
//! Write-only sinks that record a run's configuration and final report table.
//! Tracking is observational: callers log failures and carry on.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use tracing::debug;

use crate::validation::{ReportRecord, ReportSummary};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a tracking backend receives for one run
#[derive(Debug, Clone, Serialize)]
pub struct TrackedRun {
    pub run_id: String,
    pub project: String,
    pub config: serde_json::Value,
    pub summary: ReportSummary,
    pub report: Vec<ReportRecord>,
}

pub trait TrackingSink {
    fn name(&self) -> &'static str;

    fn log_run(&self, run: &TrackedRun) -> Result<(), TrackingError>;
}

/// Tracking disabled
pub struct NoopTracker;

impl TrackingSink for NoopTracker {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn log_run(&self, _run: &TrackedRun) -> Result<(), TrackingError> {
        Ok(())
    }
}

/// Appends one JSON line per run to `<dir>/<project>.jsonl`
pub struct JsonlTracker {
    dir: PathBuf,
}

impl JsonlTracker {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.jsonl", project))
    }
}

impl TrackingSink for JsonlTracker {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn log_run(&self, run: &TrackedRun) -> Result<(), TrackingError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path_for(&run.project);

        let mut line = serde_json::to_vec(run)?;
        line.push(b'\n');

        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;

        debug!("Tracked run {} to {}", run.run_id, path.display());
        Ok(())
    }
}

/// POSTs the run as JSON to a tracking endpoint
pub struct WebhookTracker {
    url: String,
    client: reqwest::blocking::Client,
}

impl WebhookTracker {
    pub fn new(url: impl Into<String>) -> Result<Self, TrackingError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

impl TrackingSink for WebhookTracker {
    fn name(&self) -> &'static str {
        "webhook"
    }

    fn log_run(&self, run: &TrackedRun) -> Result<(), TrackingError> {
        let response = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(run)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(TrackingError::Rejected(status.as_u16()));
        }

        debug!("Tracked run {} to {}", run.run_id, self.url);
        Ok(())
    }
}

#[derive(Debug)]
pub enum TrackingError {
    Io(std::io::Error),
    Serialization(serde_json::Error),
    Http(reqwest::Error),
    Rejected(u16),
}

impl std::fmt::Display for TrackingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Serialization(e) => write!(f, "Serialization error: {}", e),
            Self::Http(e) => write!(f, "HTTP error: {}", e),
            Self::Rejected(status) => write!(f, "tracking endpoint returned status {}", status),
        }
    }
}

impl std::error::Error for TrackingError {}

impl From<std::io::Error> for TrackingError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<serde_json::Error> for TrackingError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e)
    }
}

impl From<reqwest::Error> for TrackingError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracked(run_id: &str) -> TrackedRun {
        TrackedRun {
            run_id: run_id.into(),
            project: "search-term-data-validation".into(),
            config: serde_json::json!({ "origin": "origin" }),
            summary: ReportSummary::default(),
            report: vec![],
        }
    }

    #[test]
    fn test_jsonl_appends_lines() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = JsonlTracker::new(dir.path().join("runs"));

        tracker.log_run(&tracked("one")).unwrap();
        tracker.log_run(&tracked("two")).unwrap();

        let content =
            std::fs::read_to_string(tracker.path_for("search-term-data-validation")).unwrap();
        let ids: Vec<String> = content
            .lines()
            .map(|l| serde_json::from_str::<serde_json::Value>(l).unwrap()["run_id"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(ids, vec!["one", "two"]);
    }

    #[test]
    fn test_webhook_unreachable_is_error() {
        let tracker = WebhookTracker::new("http://127.0.0.1:1/track").unwrap();
        assert!(matches!(tracker.log_run(&tracked("x")), Err(TrackingError::Http(_))));
    }
}
