//! Metric Validation
//!
//! Detects daily aggregate metrics drifting outside tolerance relative to
//! their own recent history.
//!
//! - `config`: per-metric rules (window + tolerance policy)
//! - `baseline`: rolling mean / sample std-dev over the preceding window
//! - `tolerance`: deviation formulas per tolerance kind
//! - `engine`: one report row per rule
//! - `report`: destination-table shaping and run summary
//!
//! ## Usage
//!
//! ```rust,ignore
//! use search_term_validation::validation::{RuleSet, ValidationEngine};
//!
//! let rules = RuleSet::load("config/metric_rules.toml")?;
//! let engine = ValidationEngine::new(rules);
//! let rows = engine.evaluate(&observations, evaluation_date);
//! ```

pub mod baseline;
pub mod config;
pub mod engine;
pub mod report;
pub mod tolerance;

pub use baseline::*;
pub use config::*;
pub use engine::*;
pub use report::*;
pub use tolerance::*;
