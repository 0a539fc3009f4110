//! Search Term Data Validation Job
//!
//! Runs once per day (01:00 UTC in production): pulls the sanitization job's
//! aggregate metrics, checks each against its configured tolerance and appends
//! the findings to the reporting table.
//!
//! # Usage
//!
//! ```bash
//! search-term-validation \
//!   --warehouse ./warehouse.db \
//!   --rules config/metric_rules.toml \
//!   --evaluation-date 2024-01-25 \
//!   --tracking-dir ./runs
//! ```
//!
//! # Exit Codes
//!
//! - 0: Report appended (flagged metrics are part of the report)
//! - 1: Report appended, `--fail-on-flagged` set and a metric was flagged
//! - 2: Configuration error (rules file, run parameters)
//! - 3: Origin unreachable or query failure
//! - 4: Destination append failure
//! - 5: Report export failure

use anyhow::Context;
use clap::Parser;
use dotenv::dotenv;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use search_term_validation::{
    config::{RunArgs, RunConfig},
    runner::{RunError, RunOptions, ValidationRun},
    tracking::{JsonlTracker, NoopTracker, TrackingSink, WebhookTracker},
    validation::{RuleSet, ValidationEngine},
    warehouse::SqliteWarehouse,
};

fn main() {
    let _ = dotenv();
    init_tracing();

    let args = RunArgs::parse();
    let code = match run(args) {
        Ok(code) => code,
        Err(e) => {
            error!("Validation run failed: {}", e);
            e.exit_code()
        }
    };

    std::process::exit(code);
}

fn run(args: RunArgs) -> Result<i32, RunError> {
    let config = RunConfig::from_args(args)?;
    let rules = RuleSet::load(&config.rules_path)?;
    let engine = ValidationEngine::new(rules);

    let warehouse = SqliteWarehouse::open(&config.warehouse_path, config.layout())
        .map_err(RunError::Source)?;

    let tracker = build_tracker(&config).unwrap_or_else(|e| {
        warn!("Tracking disabled: {:#}", e);
        Box::new(NoopTracker)
    });

    let options = RunOptions {
        dry_run: config.dry_run,
        output: config.output.clone(),
        tracking_project: config.tracking_project.clone(),
        run_config: Some(config.clone()),
    };

    let run = ValidationRun::new(&engine, &warehouse, &warehouse, tracker.as_ref(), options);
    let report = run.execute(&config.parameters)?;

    info!(
        run_id = %report.run_id,
        appended = report.appended,
        passed = report.summary.passed,
        flagged = report.summary.flagged(),
        "Validation run complete"
    );

    if config.fail_on_flagged && !report.summary.all_passed() {
        return Ok(1);
    }
    Ok(0)
}

fn build_tracker(config: &RunConfig) -> anyhow::Result<Box<dyn TrackingSink>> {
    if let Some(url) = &config.tracking_url {
        let tracker = WebhookTracker::new(url.clone())
            .with_context(|| format!("failed to build tracking client for {}", url))?;
        info!("Tracking runs to {}", url);
        return Ok(Box::new(tracker));
    }

    if let Some(dir) = &config.tracking_dir {
        info!("Tracking runs under {}", dir.display());
        return Ok(Box::new(JsonlTracker::new(dir.clone())));
    }

    Ok(Box::new(NoopTracker))
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "search_term_validation=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
