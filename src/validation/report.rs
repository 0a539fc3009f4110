//! Report Shaping
//!
//! Projects engine rows into the destination table's row format and
//! summarises a run for logging. No validation logic lives here.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ValidationOutcome, ValidationReportRow};

/// Columns of the destination table, in insertion order
pub const REPORT_COLUMNS: [&str; 15] = [
    "run_id",
    "evaluation_date",
    "metric_name",
    "outcome",
    "passed",
    "current_value",
    "baseline_mean",
    "baseline_std_dev",
    "deviation",
    "tolerance_kind",
    "tolerance_threshold",
    "sample_count",
    "window_start",
    "window_end",
    "recorded_at",
];

/// One row of the destination table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportRecord {
    pub run_id: String,
    /// `YYYY-MM-DD`
    pub evaluation_date: String,
    pub metric_name: String,
    pub outcome: String,
    pub passed: bool,
    pub current_value: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub baseline_std_dev: Option<f64>,
    pub deviation: Option<f64>,
    pub tolerance_kind: String,
    pub tolerance_threshold: f64,
    pub sample_count: i64,
    pub window_start: String,
    pub window_end: String,
    /// Wall clock; the only field that differs between identical re-runs
    pub recorded_at: String,
}

impl ReportRecord {
    pub fn from_row(row: &ValidationReportRow, run_id: &Uuid, recorded_at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            evaluation_date: row.evaluation_date.format("%Y-%m-%d").to_string(),
            metric_name: row.metric_name.clone(),
            outcome: row.outcome.as_str().to_string(),
            passed: row.passed,
            current_value: row.current_value,
            baseline_mean: row.baseline_mean,
            baseline_std_dev: row.baseline_std_dev,
            deviation: row.deviation,
            tolerance_kind: row.tolerance_kind.clone(),
            tolerance_threshold: row.tolerance_threshold,
            sample_count: row.sample_count as i64,
            window_start: row.window_start.format("%Y-%m-%d").to_string(),
            window_end: row.window_end.format("%Y-%m-%d").to_string(),
            recorded_at: recorded_at.to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    }
}

/// Shape a run's rows for the destination table. All records share one
/// run id and timestamp.
pub fn shape_report(
    rows: &[ValidationReportRow],
    run_id: &Uuid,
    recorded_at: DateTime<Utc>,
) -> Vec<ReportRecord> {
    rows.iter()
        .map(|row| ReportRecord::from_row(row, run_id, recorded_at))
        .collect()
}

/// Counts by outcome for one run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub out_of_tolerance: usize,
    pub insufficient_history: usize,
    pub missing_current_value: usize,
    pub flagged_metrics: Vec<String>,
}

impl ReportSummary {
    pub fn from_rows(rows: &[ValidationReportRow]) -> Self {
        let mut counts: BTreeMap<ValidationOutcome, usize> = BTreeMap::new();
        let mut flagged_metrics = Vec::new();

        for row in rows {
            *counts.entry(row.outcome).or_default() += 1;
            if row.is_flagged() {
                flagged_metrics.push(row.metric_name.clone());
            }
        }

        let count = |outcome: ValidationOutcome| counts.get(&outcome).copied().unwrap_or(0);
        Self {
            total: rows.len(),
            passed: count(ValidationOutcome::InTolerance),
            out_of_tolerance: count(ValidationOutcome::OutOfTolerance),
            insufficient_history: count(ValidationOutcome::InsufficientHistory),
            missing_current_value: count(ValidationOutcome::MissingCurrentValue),
            flagged_metrics,
        }
    }

    pub fn flagged(&self) -> usize {
        self.flagged_metrics.len()
    }

    pub fn all_passed(&self) -> bool {
        self.flagged_metrics.is_empty()
    }
}

/// Write shaped records as a pretty-printed JSON array.
pub fn write_report_json<P: AsRef<Path>>(path: P, records: &[ReportRecord]) -> std::io::Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, records)?;
    writer.write_all(b"\n")?;
    writer.flush()
}
