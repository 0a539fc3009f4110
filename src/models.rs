use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One aggregate value for one metric on one day, as read from the origin table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricObservation {
    pub metric_name: String,
    pub date: NaiveDate,
    pub value: f64,
}

impl MetricObservation {
    pub fn new(metric_name: impl Into<String>, date: NaiveDate, value: f64) -> Self {
        Self {
            metric_name: metric_name.into(),
            date,
            value,
        }
    }
}

/// Why a metric passed or was flagged
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationOutcome {
    InTolerance,
    OutOfTolerance,
    InsufficientHistory,
    MissingCurrentValue,
}

impl ValidationOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationOutcome::InTolerance => "in_tolerance",
            ValidationOutcome::OutOfTolerance => "out_of_tolerance",
            ValidationOutcome::InsufficientHistory => "insufficient_history",
            ValidationOutcome::MissingCurrentValue => "missing_current_value",
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, ValidationOutcome::InTolerance)
    }
}

impl std::fmt::Display for ValidationOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of validating one metric for one evaluation date.
///
/// Statistics are `None` when the outcome made them impossible to compute:
/// no baseline for `InsufficientHistory`, no current value or deviation for
/// `MissingCurrentValue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReportRow {
    pub metric_name: String,
    pub evaluation_date: NaiveDate,
    pub current_value: Option<f64>,
    pub baseline_mean: Option<f64>,
    pub baseline_std_dev: Option<f64>,
    pub deviation: Option<f64>,
    pub tolerance_kind: String,
    pub tolerance_threshold: f64,
    pub passed: bool,
    pub sample_count: usize,
    pub window_start: NaiveDate,
    pub window_end: NaiveDate,
    pub outcome: ValidationOutcome,
}

impl ValidationReportRow {
    pub fn is_flagged(&self) -> bool {
        !self.passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_in_tolerance_passes() {
        assert!(ValidationOutcome::InTolerance.passed());
        assert!(!ValidationOutcome::OutOfTolerance.passed());
        assert!(!ValidationOutcome::InsufficientHistory.passed());
        assert!(!ValidationOutcome::MissingCurrentValue.passed());
    }

    #[test]
    fn test_outcome_serializes_snake_case() {
        let json = serde_json::to_string(&ValidationOutcome::MissingCurrentValue).unwrap();
        assert_eq!(json, "\"missing_current_value\"");
        assert_eq!(
            ValidationOutcome::InsufficientHistory.to_string(),
            "insufficient_history"
        );
    }
}
