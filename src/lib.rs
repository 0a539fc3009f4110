//! Search Term Data Validation
//!
//! Checks the daily aggregate metrics emitted by the search-term sanitization
//! job against each metric's own recent history and appends a per-metric
//! report for dashboards and alerting.
//!
//! Pipeline: `warehouse` (read) → `validation` (evaluate + shape) →
//! `warehouse` (append) → `tracking` (optional), driven by `runner`.

pub mod config;
pub mod models;
pub mod runner;
pub mod tracking;
pub mod validation;
pub mod warehouse;

pub use config::{RunArgs, RunConfig, RunParameters};
pub use models::{MetricObservation, ValidationOutcome, ValidationReportRow};
pub use runner::{RunError, RunOptions, RunReport, ValidationRun};
