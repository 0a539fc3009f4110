//! Validation Run
//!
//! One strictly sequential pass: read origin → evaluate → shape → append →
//! track. Data gaps become report rows; only connectivity and configuration
//! problems abort the run.

use std::collections::BTreeSet;
use std::path::PathBuf;

use chrono::{Days, Utc};
use serde::Serialize;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{RunConfig, RunParameters};
use crate::models::ValidationReportRow;
use crate::tracking::{TrackedRun, TrackingSink};
use crate::validation::{
    shape_report, write_report_json, ConfigError, ReportRecord, ReportSummary, ValidationEngine,
};
use crate::warehouse::{MetricSource, ReportSink, SinkError, SourceError};

/// Knobs that don't affect validation results
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub dry_run: bool,
    pub output: Option<PathBuf>,
    pub tracking_project: String,
    /// Resolved invocation config, recorded with the tracked run
    pub run_config: Option<RunConfig>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            dry_run: false,
            output: None,
            tracking_project: crate::config::DEFAULT_TRACKING_PROJECT.to_string(),
            run_config: None,
        }
    }
}

/// Config snapshot attached to a tracked run
#[derive(Serialize)]
struct TrackedConfig<'a> {
    run: Option<&'a RunConfig>,
    parameters: &'a RunParameters,
    rules: &'a crate::validation::RuleSet,
    dry_run: bool,
}

/// Everything a completed run produced
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub rows: Vec<ValidationReportRow>,
    pub records: Vec<ReportRecord>,
    pub summary: ReportSummary,
    /// Rows appended to the destination (0 on a dry run)
    pub appended: usize,
}

pub struct ValidationRun<'a> {
    engine: &'a ValidationEngine,
    source: &'a dyn MetricSource,
    sink: &'a dyn ReportSink,
    tracker: &'a dyn TrackingSink,
    options: RunOptions,
}

impl<'a> ValidationRun<'a> {
    pub fn new(
        engine: &'a ValidationEngine,
        source: &'a dyn MetricSource,
        sink: &'a dyn ReportSink,
        tracker: &'a dyn TrackingSink,
        options: RunOptions,
    ) -> Self {
        Self {
            engine,
            source,
            sink,
            tracker,
            options,
        }
    }

    pub fn execute(&self, params: &RunParameters) -> Result<RunReport, RunError> {
        let run_id = Uuid::new_v4();
        info!("Data Validation Origin: {}", params.origin);
        info!("Data Validation Reporting Destination: {}", params.destination);
        info!(
            run_id = %run_id,
            evaluation_date = %params.evaluation_date,
            metrics = self.engine.rules().len(),
            "Starting validation run"
        );

        let rules = self.engine.rules();
        let metrics: BTreeSet<String> = rules.metric_names().into_iter().collect();
        let start_date = params
            .evaluation_date
            .checked_sub_days(Days::new(rules.max_window_days() as u64))
            .unwrap_or(chrono::NaiveDate::MIN);

        let observations = self
            .source
            .read_observations(&params.origin, &metrics, start_date, params.evaluation_date)
            .map_err(|e| {
                error!("Failed to read origin {}: {}", params.origin, e);
                RunError::Source(e)
            })?;
        info!(
            "Retrieved {} observations from {} to {}",
            observations.len(),
            start_date,
            params.evaluation_date
        );

        let rows = self.engine.evaluate(&observations, params.evaluation_date);
        let summary = ReportSummary::from_rows(&rows);
        let records = shape_report(&rows, &run_id, Utc::now());

        if let Some(path) = &self.options.output {
            write_report_json(path, &records).map_err(|e| {
                error!("Failed to write report to {}: {}", path.display(), e);
                RunError::Export(e)
            })?;
            info!("Wrote report to {}", path.display());
        }

        let appended = if self.options.dry_run {
            info!("Dry run: skipping append to {}", params.destination);
            0
        } else {
            self.sink
                .append_report(&params.destination, &records)
                .map_err(|e| {
                    error!("Failed to append report to {}: {}", params.destination, e);
                    RunError::Sink(e)
                })?
        };

        self.track(run_id, params, &summary, &records);

        if summary.all_passed() {
            info!(
                "All {} metrics within tolerance for {}",
                summary.total, params.evaluation_date
            );
        } else {
            warn!(
                flagged = summary.flagged(),
                total = summary.total,
                out_of_tolerance = summary.out_of_tolerance,
                insufficient_history = summary.insufficient_history,
                missing_current_value = summary.missing_current_value,
                "Flagged metrics: {}",
                summary.flagged_metrics.join(", ")
            );
        }

        Ok(RunReport {
            run_id,
            rows,
            records,
            summary,
            appended,
        })
    }

    fn track(
        &self,
        run_id: Uuid,
        params: &RunParameters,
        summary: &ReportSummary,
        records: &[ReportRecord],
    ) {
        let snapshot = TrackedConfig {
            run: self.options.run_config.as_ref(),
            parameters: params,
            rules: self.engine.rules(),
            dry_run: self.options.dry_run,
        };
        let config = match serde_json::to_value(&snapshot) {
            Ok(config) => config,
            Err(e) => {
                warn!("Skipping tracking, config snapshot failed: {}", e);
                return;
            }
        };

        let run = TrackedRun {
            run_id: run_id.to_string(),
            project: self.options.tracking_project.clone(),
            config,
            summary: summary.clone(),
            report: records.to_vec(),
        };

        if let Err(e) = self.tracker.log_run(&run) {
            warn!("Tracking via {} failed (run unaffected): {}", self.tracker.name(), e);
        }
    }
}

/// Run-aborting failures
#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Source(SourceError),
    Sink(SinkError),
    Export(std::io::Error),
}

impl RunError {
    /// Process exit status for the scheduler
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 2,
            Self::Source(_) => 3,
            Self::Sink(_) => 4,
            Self::Export(_) => 5,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(e) => write!(f, "configuration error: {}", e),
            Self::Source(e) => write!(f, "{}", e),
            Self::Sink(e) => write!(f, "{}", e),
            Self::Export(e) => write!(f, "report export failed: {}", e),
        }
    }
}

impl std::error::Error for RunError {}

impl From<ConfigError> for RunError {
    fn from(e: ConfigError) -> Self {
        Self::Config(e)
    }
}

impl From<SourceError> for RunError {
    fn from(e: SourceError) -> Self {
        Self::Source(e)
    }
}

impl From<SinkError> for RunError {
    fn from(e: SinkError) -> Self {
        Self::Sink(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{MetricObservation, ValidationOutcome};
    use crate::tracking::{NoopTracker, TrackingError};
    use crate::validation::{MetricRule, RuleSet, ToleranceSpec};
    use chrono::NaiveDate;
    use clap::Parser;
    use parking_lot::Mutex;

    struct FixedSource {
        observations: Vec<MetricObservation>,
        requested: Mutex<Option<(NaiveDate, NaiveDate)>>,
    }

    impl MetricSource for FixedSource {
        fn read_observations(
            &self,
            _origin: &str,
            _metrics: &BTreeSet<String>,
            start_date: NaiveDate,
            end_date: NaiveDate,
        ) -> Result<Vec<MetricObservation>, SourceError> {
            *self.requested.lock() = Some((start_date, end_date));
            Ok(self.observations.clone())
        }
    }

    struct DownSource;

    impl MetricSource for DownSource {
        fn read_observations(
            &self,
            origin: &str,
            _metrics: &BTreeSet<String>,
            _start_date: NaiveDate,
            _end_date: NaiveDate,
        ) -> Result<Vec<MetricObservation>, SourceError> {
            Err(SourceError::Connection(origin.to_string()))
        }
    }

    #[derive(Default)]
    struct MemorySink {
        appended: Mutex<Vec<ReportRecord>>,
        fail: bool,
    }

    impl ReportSink for MemorySink {
        fn append_report(&self, destination: &str, records: &[ReportRecord]) -> Result<usize, SinkError> {
            if self.fail {
                return Err(SinkError::Append(destination.to_string()));
            }
            self.appended.lock().extend_from_slice(records);
            Ok(records.len())
        }
    }

    #[derive(Default)]
    struct RecordingTracker {
        runs: Mutex<Vec<TrackedRun>>,
    }

    impl TrackingSink for RecordingTracker {
        fn name(&self) -> &'static str {
            "recording"
        }

        fn log_run(&self, run: &TrackedRun) -> Result<(), TrackingError> {
            self.runs.lock().push(run.clone());
            Ok(())
        }
    }

    struct FailingTracker;

    impl TrackingSink for FailingTracker {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn log_run(&self, _run: &TrackedRun) -> Result<(), TrackingError> {
            Err(TrackingError::Rejected(503))
        }
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 8, d).unwrap()
    }

    fn engine() -> ValidationEngine {
        ValidationEngine::new(
            RuleSet::new(vec![
                MetricRule::new("rows", 7, ToleranceSpec::StdDevBound { max_std_devs: 3.0 }),
                MetricRule::new("pct", 14, ToleranceSpec::RelativeDelta { max_fraction: 0.1 }),
            ])
            .unwrap(),
        )
    }

    fn source() -> FixedSource {
        let mut observations: Vec<_> = [100.0, 102.0, 98.0, 101.0, 99.0, 103.0, 97.0]
            .iter()
            .enumerate()
            .map(|(i, &v)| MetricObservation::new("rows", day(13 + i as u32), v))
            .collect();
        observations.push(MetricObservation::new("rows", day(20), 150.0));
        FixedSource {
            observations,
            requested: Mutex::new(None),
        }
    }

    fn params() -> RunParameters {
        RunParameters::new("origin", "reports", day(20)).unwrap()
    }

    #[test]
    fn test_run_appends_one_row_per_rule() {
        let engine = engine();
        let source = source();
        let sink = MemorySink::default();
        let run = ValidationRun::new(&engine, &source, &sink, &NoopTracker, RunOptions::default());

        let report = run.execute(&params()).unwrap();

        // Reader covers the longest window through the evaluation date
        assert_eq!(*source.requested.lock(), Some((day(6), day(20))));
        assert_eq!(report.appended, 2);
        assert_eq!(report.summary.out_of_tolerance, 1);
        assert_eq!(report.summary.insufficient_history, 1);

        let appended = sink.appended.lock();
        assert_eq!(appended.len(), 2);
        assert!(appended.iter().all(|r| r.run_id == report.run_id.to_string()));
        let rows = appended.iter().find(|r| r.metric_name == "rows").unwrap();
        assert_eq!(rows.outcome, ValidationOutcome::OutOfTolerance.as_str());
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let engine = engine();
        let sink = MemorySink::default();
        let run = ValidationRun::new(&engine, &DownSource, &sink, &NoopTracker, RunOptions::default());

        let err = run.execute(&params()).unwrap_err();
        assert!(matches!(err, RunError::Source(SourceError::Connection(_))));
        assert_eq!(err.exit_code(), 3);
        assert!(sink.appended.lock().is_empty());
    }

    #[test]
    fn test_sink_failure_is_fatal() {
        let engine = engine();
        let source = source();
        let sink = MemorySink {
            fail: true,
            ..Default::default()
        };
        let run = ValidationRun::new(&engine, &source, &sink, &NoopTracker, RunOptions::default());

        let err = run.execute(&params()).unwrap_err();
        assert!(matches!(err, RunError::Sink(_)));
        assert_eq!(err.exit_code(), 4);
    }

    #[test]
    fn test_tracking_failure_does_not_block() {
        let engine = engine();
        let source = source();
        let sink = MemorySink::default();
        let run = ValidationRun::new(&engine, &source, &sink, &FailingTracker, RunOptions::default());

        let report = run.execute(&params()).unwrap();
        assert_eq!(report.appended, 2);
    }

    #[test]
    fn test_tracked_config_records_resolved_run_config() {
        let args = crate::config::RunArgs::try_parse_from([
            "search-term-validation",
            "--warehouse",
            "/data/warehouse.db",
            "--origin-layout",
            "wide",
            "--date-column",
            "finished_at",
            "--output",
            "/tmp/report.json",
            "--evaluation-date",
            "2024-08-20",
        ])
        .unwrap();
        let run_config = RunConfig::from_args(args).unwrap();

        let engine = engine();
        let source = source();
        let sink = MemorySink::default();
        let tracker = RecordingTracker::default();
        let options = RunOptions {
            tracking_project: run_config.tracking_project.clone(),
            run_config: Some(run_config),
            ..Default::default()
        };
        let run = ValidationRun::new(&engine, &source, &sink, &tracker, options);
        let report = run.execute(&params()).unwrap();

        let runs = tracker.runs.lock();
        assert_eq!(runs.len(), 1);
        let tracked = &runs[0];
        assert_eq!(tracked.run_id, report.run_id.to_string());
        assert_eq!(tracked.config["run"]["warehouse_path"], "/data/warehouse.db");
        assert_eq!(tracked.config["run"]["origin_layout"], "wide");
        assert_eq!(tracked.config["run"]["date_column"], "finished_at");
        assert_eq!(tracked.config["run"]["output"], "/tmp/report.json");
        assert_eq!(tracked.config["parameters"]["origin"], "origin");
        assert!(tracked.config["rules"].is_object());
        assert_eq!(tracked.report.len(), 2);
    }

    #[test]
    fn test_dry_run_skips_append_and_exports() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("report.json");
        let engine = engine();
        let source = source();
        let sink = MemorySink::default();
        let options = RunOptions {
            dry_run: true,
            output: Some(output.clone()),
            ..Default::default()
        };
        let run = ValidationRun::new(&engine, &source, &sink, &NoopTracker, options);

        let report = run.execute(&params()).unwrap();
        assert_eq!(report.appended, 0);
        assert!(sink.appended.lock().is_empty());

        let exported: Vec<ReportRecord> =
            serde_json::from_str(&std::fs::read_to_string(output).unwrap()).unwrap();
        assert_eq!(exported.len(), 2);
    }

    #[test]
    fn test_identical_inputs_give_identical_rows() {
        let engine = engine();
        let source = source();
        let sink = MemorySink::default();
        let run = ValidationRun::new(&engine, &source, &sink, &NoopTracker, RunOptions::default());

        let first = run.execute(&params()).unwrap();
        let second = run.execute(&params()).unwrap();
        assert_ne!(first.run_id, second.run_id);
        assert_eq!(
            serde_json::to_string(&first.rows).unwrap(),
            serde_json::to_string(&second.rows).unwrap()
        );
        // Re-runs append, never overwrite
        assert_eq!(sink.appended.lock().len(), 4);
    }
}
