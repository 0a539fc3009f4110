//! Validation Engine
//!
//! Turns observations plus rules into exactly one report row per rule.
//! Per-metric evaluation only reads shared inputs, so large rule sets are
//! spread across the rayon pool.

use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use rayon::prelude::*;
use tracing::{debug, warn};

use super::baseline::{Baseline, BaselineWindow};
use super::config::{MetricRule, RuleSet};
use crate::models::{MetricObservation, ValidationOutcome, ValidationReportRow};

/// Rule count at which evaluation switches to the rayon pool
const PARALLEL_THRESHOLD: usize = 64;

type SeriesIndex<'a> = HashMap<&'a str, BTreeMap<NaiveDate, f64>>;

pub struct ValidationEngine {
    rules: RuleSet,
}

impl ValidationEngine {
    pub fn new(rules: RuleSet) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    /// Evaluate every configured metric as of `evaluation_date`.
    ///
    /// Rows come back ordered by metric name. Observations for metrics without
    /// a rule are ignored with a warning.
    pub fn evaluate(
        &self,
        observations: &[MetricObservation],
        evaluation_date: NaiveDate,
    ) -> Vec<ValidationReportRow> {
        let index = self.index_observations(observations);

        let rules: Vec<&MetricRule> = self.rules.iter().collect();
        if rules.len() >= PARALLEL_THRESHOLD {
            rules
                .par_iter()
                .map(|rule| evaluate_metric(rule, index.get(rule.metric_name.as_str()), evaluation_date))
                .collect()
        } else {
            rules
                .iter()
                .map(|rule| evaluate_metric(rule, index.get(rule.metric_name.as_str()), evaluation_date))
                .collect()
        }
    }

    fn index_observations<'a>(&self, observations: &'a [MetricObservation]) -> SeriesIndex<'a> {
        let mut index: SeriesIndex<'a> = HashMap::new();
        let mut unknown: BTreeMap<&str, usize> = BTreeMap::new();

        for obs in observations {
            if !self.rules.contains(&obs.metric_name) {
                *unknown.entry(obs.metric_name.as_str()).or_default() += 1;
                continue;
            }
            index
                .entry(obs.metric_name.as_str())
                .or_default()
                .insert(obs.date, obs.value);
        }

        for (metric, count) in unknown {
            warn!(
                metric = metric,
                observations = count,
                "skipping metric with no validation rule"
            );
        }

        index
    }
}

/// Evaluate a single metric. Never fails: data gaps become flagged rows.
pub fn evaluate_metric(
    rule: &MetricRule,
    series: Option<&BTreeMap<NaiveDate, f64>>,
    evaluation_date: NaiveDate,
) -> ValidationReportRow {
    let window = BaselineWindow::preceding(evaluation_date, rule.window_days);
    let mut row = ValidationReportRow {
        metric_name: rule.metric_name.clone(),
        evaluation_date,
        current_value: None,
        baseline_mean: None,
        baseline_std_dev: None,
        deviation: None,
        tolerance_kind: rule.tolerance.kind().to_string(),
        tolerance_threshold: rule.tolerance.threshold(),
        passed: false,
        sample_count: 0,
        window_start: window.start,
        window_end: window.last_day(),
        outcome: ValidationOutcome::InsufficientHistory,
    };

    let empty = BTreeMap::new();
    let series = series.unwrap_or(&empty);

    let Some(baseline) = Baseline::compute(&rule.metric_name, series, window) else {
        warn!(
            metric = %rule.metric_name,
            window_days = rule.window_days,
            "insufficient history for baseline"
        );
        return row;
    };

    debug!(
        metric = %rule.metric_name,
        mean = baseline.mean,
        std_dev = baseline.std_dev,
        samples = baseline.sample_count,
        "baseline computed"
    );

    row.baseline_mean = Some(baseline.mean);
    row.baseline_std_dev = Some(baseline.std_dev);
    row.sample_count = baseline.sample_count;

    let Some(&current) = series.get(&evaluation_date) else {
        warn!(
            metric = %rule.metric_name,
            date = %evaluation_date,
            "missing current value"
        );
        row.outcome = ValidationOutcome::MissingCurrentValue;
        return row;
    };

    let check = rule.tolerance.check(current, &baseline);
    row.current_value = Some(current);
    row.deviation = Some(check.deviation);
    row.passed = check.passed;
    row.outcome = if check.passed {
        ValidationOutcome::InTolerance
    } else {
        ValidationOutcome::OutOfTolerance
    };

    if !check.passed {
        warn!(
            metric = %rule.metric_name,
            current = current,
            mean = baseline.mean,
            deviation = check.deviation,
            threshold = check.threshold,
            kind = rule.tolerance.kind(),
            "metric out of tolerance"
        );
    }

    row
}
