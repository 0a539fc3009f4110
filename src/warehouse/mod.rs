//! Warehouse Boundary
//!
//! Narrow read/write interfaces to the origin and destination tables.
//! Both are blocking and fail fast; any retry policy belongs to the caller.

pub mod sqlite;

use std::collections::BTreeSet;

use chrono::NaiveDate;
use tracing::warn;

use crate::models::MetricObservation;
use crate::validation::ReportRecord;

pub use sqlite::{OriginLayout, SqliteWarehouse};

/// Reads per-day metric observations from an origin table
pub trait MetricSource {
    /// Observations for `metrics` dated within `[start_date, end_date]`.
    /// A metric with no data in range contributes no rows; that is not an error.
    fn read_observations(
        &self,
        origin: &str,
        metrics: &BTreeSet<String>,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<Vec<MetricObservation>, SourceError>;
}

/// Appends report rows to a destination table
pub trait ReportSink {
    /// Append every record or none of them. Returns the number appended.
    fn append_report(&self, destination: &str, records: &[ReportRecord]) -> Result<usize, SinkError>;
}

/// Sort observations by (metric, date) and drop non-finite values.
///
/// Several rows for one (metric, date) collapse to the one read last. Readers
/// order rows by their raw timestamp, so that is the latest upstream run of
/// the day. Other metrics are unaffected.
pub fn normalize_observations(mut observations: Vec<MetricObservation>) -> Vec<MetricObservation> {
    observations.retain(|obs| {
        if obs.value.is_finite() {
            true
        } else {
            warn!(
                metric = %obs.metric_name,
                date = %obs.date,
                value = obs.value,
                "dropping non-finite observation"
            );
            false
        }
    });

    // Stable: rows sharing a key keep their read order
    observations.sort_by(|a, b| {
        a.metric_name
            .cmp(&b.metric_name)
            .then_with(|| a.date.cmp(&b.date))
    });

    observations.dedup_by(|later, kept| {
        if later.metric_name != kept.metric_name || later.date != kept.date {
            return false;
        }
        warn!(
            metric = %kept.metric_name,
            date = %kept.date,
            superseded = kept.value,
            value = later.value,
            "duplicate observation, keeping the latest"
        );
        std::mem::swap(later, kept);
        true
    });

    observations
}

/// Quote an opaque table identifier for SQL. Embedded quotes are doubled.
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Errors reading the origin table. All of them abort the run.
#[derive(Debug)]
pub enum SourceError {
    Connection(String),
    Query(String),
    Malformed(String),
}

impl std::fmt::Display for SourceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "origin unreachable: {}", e),
            Self::Query(e) => write!(f, "origin query failed: {}", e),
            Self::Malformed(e) => write!(f, "malformed origin row: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

/// Errors appending to the destination table. All of them abort the run.
#[derive(Debug)]
pub enum SinkError {
    Connection(String),
    Append(String),
}

impl std::fmt::Display for SinkError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "destination unreachable: {}", e),
            Self::Append(e) => write!(f, "report append failed: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    fn obs(metric: &str, d: u32, value: f64) -> MetricObservation {
        MetricObservation::new(metric, NaiveDate::from_ymd_opt(2024, 2, d).unwrap(), value)
    }

    #[test]
    fn test_normalize_sorts_and_filters() {
        let rows = vec![
            obs("b", 2, 1.0),
            obs("a", 3, 2.0),
            obs("a", 1, f64::NAN),
            obs("a", 2, 3.0),
        ];
        let normalized = normalize_observations(rows);
        let keys: Vec<_> = normalized
            .iter()
            .map(|o| (o.metric_name.as_str(), o.value))
            .collect();
        assert_eq!(keys, vec![("a", 3.0), ("a", 2.0), ("b", 1.0)]);
    }

    #[test]
    fn test_normalize_keeps_latest_duplicate() {
        let rows = vec![
            obs("a", 1, 1.0),
            obs("b", 1, 7.0),
            obs("a", 1, 2.0),
            obs("a", 2, 4.0),
            obs("a", 1, 3.0),
        ];
        let normalized = normalize_observations(rows);
        let keys: Vec<_> = normalized
            .iter()
            .map(|o| (o.metric_name.as_str(), o.date.day(), o.value))
            .collect();
        assert_eq!(keys, vec![("a", 1, 3.0), ("a", 2, 4.0), ("b", 1, 7.0)]);
    }

    #[test]
    fn test_normalize_duplicate_skips_non_finite() {
        let rows = vec![obs("a", 1, 1.0), obs("a", 1, f64::INFINITY)];
        let normalized = normalize_observations(rows);
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].value, 1.0);
    }

    #[test]
    fn test_quote_identifier() {
        assert_eq!(
            quote_identifier("moz-fx-data-shared-prod.search_terms.metrics"),
            "\"moz-fx-data-shared-prod.search_terms.metrics\""
        );
        assert_eq!(quote_identifier("a\"b"), "\"a\"\"b\"");
    }
}
