//! Baseline Calculation
//!
//! Rolling per-metric baselines over the days strictly preceding the
//! evaluation date.

use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use statrs::statistics::Statistics;

/// Half-open date range `[start, end)` used for a metric's baseline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BaselineWindow {
    pub start: NaiveDate,
    /// Exclusive; always the evaluation date
    pub end: NaiveDate,
}

impl BaselineWindow {
    pub fn preceding(evaluation_date: NaiveDate, window_days: u32) -> Self {
        let start = evaluation_date
            .checked_sub_days(Days::new(window_days as u64))
            .unwrap_or(NaiveDate::MIN);
        Self {
            start,
            end: evaluation_date,
        }
    }

    /// Last day included in the window
    pub fn last_day(&self) -> NaiveDate {
        self.end.pred_opt().unwrap_or(NaiveDate::MIN)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }
}

/// Statistical summary of a metric over its window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Baseline {
    pub metric_name: String,
    pub mean: f64,
    /// Sample standard deviation (n - 1); 0 for a single observation
    pub std_dev: f64,
    pub sample_count: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
}

impl Baseline {
    /// Compute a baseline from a date-ordered series. Returns `None` when the
    /// window holds no observations.
    pub fn compute(
        metric_name: &str,
        series: &BTreeMap<NaiveDate, f64>,
        window: BaselineWindow,
    ) -> Option<Self> {
        if window.start >= window.end {
            return None;
        }

        let values: Vec<f64> = series
            .range(window.start..window.end)
            .map(|(_, v)| *v)
            .collect();

        if values.is_empty() {
            return None;
        }

        let mean = values.iter().mean();
        let std_dev = if values.len() < 2 {
            0.0
        } else {
            values.iter().std_dev()
        };

        Some(Self {
            metric_name: metric_name.to_string(),
            mean,
            std_dev,
            sample_count: values.len(),
            window_start: window.start,
            window_end: window.last_day(),
        })
    }
}
