//! Run Configuration
//!
//! Run parameters come from the command line with environment fallbacks
//! (a `.env` file is loaded first by the binary).

use std::path::PathBuf;

use chrono::{NaiveDate, Utc};
use clap::{Parser, ValueEnum};
use serde::Serialize;

use crate::validation::ConfigError;
use crate::warehouse::OriginLayout;

pub const DEFAULT_ORIGIN: &str =
    "moz-fx-data-shared-prod.search_terms.sanitization_job_data_validation_metrics";
pub const DEFAULT_DESTINATION: &str =
    "moz-fx-data-shared-prod.search_terms_derived.search_term_data_validation_reports_v1";
pub const DEFAULT_TRACKING_PROJECT: &str = "instep-wandb-search-term-data-validation";

/// What one validation run operates on
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunParameters {
    /// Table to draw the metrics from
    pub origin: String,
    /// Table to append the validation report to
    pub destination: String,
    pub evaluation_date: NaiveDate,
}

impl RunParameters {
    pub fn new(
        origin: impl Into<String>,
        destination: impl Into<String>,
        evaluation_date: NaiveDate,
    ) -> Result<Self, ConfigError> {
        let origin = origin.into();
        let destination = destination.into();

        if origin.trim().is_empty() {
            return Err(ConfigError::InvalidParameter("origin table is empty".into()));
        }
        if destination.trim().is_empty() {
            return Err(ConfigError::InvalidParameter(
                "destination table is empty".into(),
            ));
        }

        Ok(Self {
            origin,
            destination,
            evaluation_date,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    Long,
    Wide,
}

/// Command-line arguments for the validation job
#[derive(Parser, Debug, Clone)]
#[command(name = "search-term-validation")]
#[command(about = "Validate daily sanitization metrics against their recent history")]
pub struct RunArgs {
    /// The table from which to draw the data for validation
    #[arg(long, env = "DATA_VALIDATION_ORIGIN", default_value = DEFAULT_ORIGIN)]
    pub origin: String,

    /// The table into which to put the validation results
    #[arg(long, env = "DATA_VALIDATION_REPORTING_DESTINATION", default_value = DEFAULT_DESTINATION)]
    pub destination: String,

    /// Day to validate (YYYY-MM-DD, defaults to today in UTC)
    #[arg(long, env = "DATA_VALIDATION_EVALUATION_DATE")]
    pub evaluation_date: Option<NaiveDate>,

    /// Path to the TOML metric rule file
    #[arg(long, env = "DATA_VALIDATION_RULES_PATH", default_value = "config/metric_rules.toml")]
    pub rules: PathBuf,

    /// SQLite warehouse holding the origin and destination tables
    #[arg(long, env = "DATA_VALIDATION_WAREHOUSE_PATH", default_value = "./warehouse.db")]
    pub warehouse: PathBuf,

    /// Origin table shape
    #[arg(long, env = "DATA_VALIDATION_ORIGIN_LAYOUT", value_enum, default_value = "long")]
    pub origin_layout: LayoutKind,

    /// Date column of a wide origin table
    #[arg(long, env = "DATA_VALIDATION_DATE_COLUMN", default_value = "finished_at")]
    pub date_column: String,

    /// Directory for JSON-lines run tracking
    #[arg(long, env = "DATA_VALIDATION_TRACKING_DIR")]
    pub tracking_dir: Option<PathBuf>,

    /// Endpoint receiving run tracking as JSON
    #[arg(long, env = "DATA_VALIDATION_TRACKING_URL")]
    pub tracking_url: Option<String>,

    /// Tracking project name
    #[arg(long, env = "DATA_VALIDATION_TRACKING_PROJECT", default_value = DEFAULT_TRACKING_PROJECT)]
    pub tracking_project: String,

    /// Also write the shaped report to this JSON file
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Evaluate without appending to the destination table
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with status 1 when any metric is flagged
    #[arg(long)]
    pub fail_on_flagged: bool,
}

/// Fully resolved configuration for one invocation
#[derive(Debug, Clone, Serialize)]
pub struct RunConfig {
    pub parameters: RunParameters,
    pub rules_path: PathBuf,
    pub warehouse_path: PathBuf,
    pub origin_layout: LayoutKind,
    pub date_column: String,
    pub tracking_dir: Option<PathBuf>,
    pub tracking_url: Option<String>,
    pub tracking_project: String,
    pub output: Option<PathBuf>,
    pub dry_run: bool,
    pub fail_on_flagged: bool,
}

impl RunConfig {
    pub fn from_args(args: RunArgs) -> Result<Self, ConfigError> {
        let evaluation_date = args
            .evaluation_date
            .unwrap_or_else(|| Utc::now().date_naive());
        let parameters = RunParameters::new(args.origin, args.destination, evaluation_date)?;

        if args.origin_layout == LayoutKind::Wide && args.date_column.trim().is_empty() {
            return Err(ConfigError::InvalidParameter(
                "wide origin layout needs a date column".into(),
            ));
        }

        Ok(Self {
            parameters,
            rules_path: args.rules,
            warehouse_path: args.warehouse,
            origin_layout: args.origin_layout,
            date_column: args.date_column,
            tracking_dir: args.tracking_dir,
            tracking_url: args.tracking_url,
            tracking_project: args.tracking_project,
            output: args.output,
            dry_run: args.dry_run,
            fail_on_flagged: args.fail_on_flagged,
        })
    }

    pub fn layout(&self) -> OriginLayout {
        match self.origin_layout {
            LayoutKind::Long => OriginLayout::Long,
            LayoutKind::Wide => OriginLayout::Wide {
                date_column: self.date_column.clone(),
            },
        }
    }
}
