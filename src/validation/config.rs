//! Metric Rule Configuration
//!
//! Per-metric validation rules loaded from a TOML file:
//!
//! ```toml
//! [[metrics]]
//! metric_name = "sanitized_row_count"
//! window_days = 7
//! tolerance = { kind = "std_dev_bound", max_std_devs = 3.0 }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

/// How far the current value may drift from its baseline
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ToleranceSpec {
    /// `|current - mean| <= max_delta`
    AbsoluteDelta { max_delta: f64 },
    /// `|current - mean| / |mean| <= max_fraction`
    RelativeDelta { max_fraction: f64 },
    /// `|current - mean| / std_dev <= max_std_devs`
    StdDevBound { max_std_devs: f64 },
}

impl ToleranceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            ToleranceSpec::AbsoluteDelta { .. } => "absolute_delta",
            ToleranceSpec::RelativeDelta { .. } => "relative_delta",
            ToleranceSpec::StdDevBound { .. } => "std_dev_bound",
        }
    }

    pub fn threshold(&self) -> f64 {
        match *self {
            ToleranceSpec::AbsoluteDelta { max_delta } => max_delta,
            ToleranceSpec::RelativeDelta { max_fraction } => max_fraction,
            ToleranceSpec::StdDevBound { max_std_devs } => max_std_devs,
        }
    }

    fn from_raw(metric: &str, raw: RawTolerance) -> Result<Self, ConfigError> {
        let param = |value: Option<f64>, parameter: &'static str| {
            value.ok_or_else(|| ConfigError::MissingParameter {
                metric: metric.to_string(),
                parameter,
            })
        };

        let spec = match raw.kind.as_str() {
            "absolute_delta" => ToleranceSpec::AbsoluteDelta {
                max_delta: param(raw.max_delta, "max_delta")?,
            },
            "relative_delta" => ToleranceSpec::RelativeDelta {
                max_fraction: param(raw.max_fraction, "max_fraction")?,
            },
            "std_dev_bound" => ToleranceSpec::StdDevBound {
                max_std_devs: param(raw.max_std_devs, "max_std_devs")?,
            },
            other => {
                return Err(ConfigError::UnknownToleranceKind {
                    metric: metric.to_string(),
                    kind: other.to_string(),
                })
            }
        };

        let threshold = spec.threshold();
        if !threshold.is_finite() || threshold < 0.0 {
            return Err(ConfigError::InvalidThreshold {
                metric: metric.to_string(),
                value: threshold,
            });
        }

        Ok(spec)
    }
}

/// Validation rule for a single tracked metric
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricRule {
    pub metric_name: String,
    /// Days of history preceding the evaluation date used for the baseline
    pub window_days: u32,
    pub tolerance: ToleranceSpec,
}

impl MetricRule {
    pub fn new(metric_name: impl Into<String>, window_days: u32, tolerance: ToleranceSpec) -> Self {
        Self {
            metric_name: metric_name.into(),
            window_days,
            tolerance,
        }
    }
}

/// All rules for one run, keyed by metric name.
///
/// Immutable once built; `BTreeMap` keeps report ordering stable across runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RuleSet {
    rules: BTreeMap<String, MetricRule>,
}

impl RuleSet {
    /// Build a rule set, rejecting duplicates, empty sets and zero-day windows.
    pub fn new(rules: Vec<MetricRule>) -> Result<Self, ConfigError> {
        if rules.is_empty() {
            return Err(ConfigError::NoRules);
        }

        let mut map = BTreeMap::new();
        for rule in rules {
            if rule.window_days == 0 {
                return Err(ConfigError::InvalidWindow {
                    metric: rule.metric_name,
                    window_days: 0,
                });
            }
            if map.contains_key(&rule.metric_name) {
                return Err(ConfigError::DuplicateMetric(rule.metric_name));
            }
            map.insert(rule.metric_name.clone(), rule);
        }

        Ok(Self { rules: map })
    }

    /// Parse a TOML rule document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let raw: RawRuleFile = toml::from_str(content)?;

        let mut rules = Vec::with_capacity(raw.metrics.len());
        for entry in raw.metrics {
            if entry.window_days < 1 || entry.window_days > u32::MAX as i64 {
                return Err(ConfigError::InvalidWindow {
                    metric: entry.metric_name,
                    window_days: entry.window_days,
                });
            }
            let tolerance = ToleranceSpec::from_raw(&entry.metric_name, entry.tolerance)?;
            rules.push(MetricRule {
                metric_name: entry.metric_name,
                window_days: entry.window_days as u32,
                tolerance,
            });
        }

        Self::new(rules)
    }

    /// Load rules from a TOML file on disk.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let rules = Self::from_toml_str(&content)?;
        info!("Loaded {} metric rules from {}", rules.len(), path.display());
        Ok(rules)
    }

    pub fn get(&self, metric_name: &str) -> Option<&MetricRule> {
        self.rules.get(metric_name)
    }

    pub fn contains(&self, metric_name: &str) -> bool {
        self.rules.contains_key(metric_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricRule> {
        self.rules.values()
    }

    pub fn metric_names(&self) -> Vec<String> {
        self.rules.keys().cloned().collect()
    }

    /// Longest window across all rules; the reader must cover at least this much history.
    pub fn max_window_days(&self) -> u32 {
        self.rules.values().map(|r| r.window_days).max().unwrap_or(0)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[derive(Debug, Deserialize)]
struct RawRuleFile {
    #[serde(default)]
    metrics: Vec<RawMetricRule>,
}

#[derive(Debug, Deserialize)]
struct RawMetricRule {
    metric_name: String,
    window_days: i64,
    tolerance: RawTolerance,
}

// Parameters are optional here so that an unknown `kind` is reported as such
// rather than as a generic deserialization failure.
#[derive(Debug, Deserialize)]
struct RawTolerance {
    kind: String,
    max_delta: Option<f64>,
    max_fraction: Option<f64>,
    max_std_devs: Option<f64>,
}

/// Errors in rule configuration. All of them abort the run.
#[derive(Debug)]
pub enum ConfigError {
    Io {
        path: String,
        source: std::io::Error,
    },
    Parse(toml::de::Error),
    UnknownToleranceKind {
        metric: String,
        kind: String,
    },
    MissingParameter {
        metric: String,
        parameter: &'static str,
    },
    InvalidThreshold {
        metric: String,
        value: f64,
    },
    InvalidWindow {
        metric: String,
        window_days: i64,
    },
    DuplicateMetric(String),
    NoRules,
    InvalidParameter(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { path, source } => write!(f, "failed to read rules from {}: {}", path, source),
            Self::Parse(e) => write!(f, "invalid rule file: {}", e),
            Self::UnknownToleranceKind { metric, kind } => {
                write!(f, "unknown tolerance kind '{}' for metric '{}'", kind, metric)
            }
            Self::MissingParameter { metric, parameter } => {
                write!(f, "metric '{}' is missing tolerance parameter '{}'", metric, parameter)
            }
            Self::InvalidThreshold { metric, value } => {
                write!(f, "metric '{}' has invalid threshold {}", metric, value)
            }
            Self::InvalidWindow {
                metric,
                window_days,
            } => write!(
                f,
                "metric '{}' has invalid window_days {} (must be >= 1)",
                metric, window_days
            ),
            Self::DuplicateMetric(name) => write!(f, "metric '{}' is configured twice", name),
            Self::NoRules => write!(f, "no metric rules configured"),
            Self::InvalidParameter(msg) => write!(f, "invalid run parameter: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::Parse(e) => Some(e),
            _ => None,
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        Self::Parse(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
        [[metrics]]
        metric_name = "sanitized_row_count"
        window_days = 7
        tolerance = { kind = "std_dev_bound", max_std_devs = 3.0 }

        [[metrics]]
        metric_name = "pct_sanitized_search_terms"
        window_days = 14
        tolerance = { kind = "relative_delta", max_fraction = 0.1 }

        [[metrics]]
        metric_name = "avg_words_all_search_terms"
        window_days = 3
        tolerance = { kind = "absolute_delta", max_delta = 0.5 }
    "#;

    #[test]
    fn test_parse_all_kinds() {
        let rules = RuleSet::from_toml_str(RULES).unwrap();
        assert_eq!(rules.len(), 3);
        assert_eq!(rules.max_window_days(), 14);

        let rule = rules.get("sanitized_row_count").unwrap();
        assert_eq!(rule.window_days, 7);
        assert_eq!(rule.tolerance, ToleranceSpec::StdDevBound { max_std_devs: 3.0 });
        assert_eq!(rule.tolerance.kind(), "std_dev_bound");
        assert_eq!(rule.tolerance.threshold(), 3.0);

        // Sorted by metric name
        assert_eq!(
            rules.metric_names(),
            vec![
                "avg_words_all_search_terms",
                "pct_sanitized_search_terms",
                "sanitized_row_count"
            ]
        );
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let content = r#"
            [[metrics]]
            metric_name = "m"
            window_days = 7
            tolerance = { kind = "percentile_band", max_delta = 1.0 }
        "#;
        match RuleSet::from_toml_str(content) {
            Err(ConfigError::UnknownToleranceKind { metric, kind }) => {
                assert_eq!(metric, "m");
                assert_eq!(kind, "percentile_band");
            }
            other => panic!("expected UnknownToleranceKind, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_parameter() {
        let content = r#"
            [[metrics]]
            metric_name = "m"
            window_days = 7
            tolerance = { kind = "relative_delta", max_delta = 1.0 }
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(content),
            Err(ConfigError::MissingParameter { parameter: "max_fraction", .. })
        ));
    }

    #[test]
    fn test_rejects_bad_window_and_threshold() {
        let zero_window = r#"
            [[metrics]]
            metric_name = "m"
            window_days = 0
            tolerance = { kind = "absolute_delta", max_delta = 1.0 }
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(zero_window),
            Err(ConfigError::InvalidWindow { window_days: 0, .. })
        ));

        let negative = r#"
            [[metrics]]
            metric_name = "m"
            window_days = 3
            tolerance = { kind = "absolute_delta", max_delta = -1.0 }
        "#;
        assert!(matches!(
            RuleSet::from_toml_str(negative),
            Err(ConfigError::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn test_duplicate_and_empty() {
        let rule = MetricRule::new("m", 7, ToleranceSpec::AbsoluteDelta { max_delta: 1.0 });
        assert!(matches!(
            RuleSet::new(vec![rule.clone(), rule]),
            Err(ConfigError::DuplicateMetric(name)) if name == "m"
        ));
        assert!(matches!(RuleSet::new(vec![]), Err(ConfigError::NoRules)));
        assert!(matches!(RuleSet::from_toml_str(""), Err(ConfigError::NoRules)));
    }

    #[test]
    fn test_syntax_error() {
        assert!(matches!(
            RuleSet::from_toml_str("[[metrics]\nmetric_name ="),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_serializes_with_kind_tag() {
        let json = serde_json::to_value(ToleranceSpec::RelativeDelta { max_fraction: 0.25 }).unwrap();
        assert_eq!(json["kind"], "relative_delta");
        assert_eq!(json["max_fraction"], 0.25);
    }
}
