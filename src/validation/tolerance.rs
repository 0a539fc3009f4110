//! Deviation measurement per tolerance kind.

use super::baseline::Baseline;
use super::config::ToleranceSpec;

/// Denominator floor for relative and std-dev deviations
pub const EPSILON: f64 = 1e-9;

/// Outcome of comparing a current value against its baseline
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToleranceCheck {
    pub deviation: f64,
    pub threshold: f64,
    pub passed: bool,
}

impl ToleranceSpec {
    /// Measure how far `current` sits from `baseline` and judge it against the
    /// threshold. Passes at equality.
    pub fn check(&self, current: f64, baseline: &Baseline) -> ToleranceCheck {
        let delta = (current - baseline.mean).abs();

        let deviation = match *self {
            ToleranceSpec::AbsoluteDelta { .. } => delta,
            ToleranceSpec::RelativeDelta { .. } => delta / baseline.mean.abs().max(EPSILON),
            ToleranceSpec::StdDevBound { .. } => {
                if baseline.std_dev == 0.0 {
                    // Flat history: any movement at all is unbounded
                    if delta == 0.0 {
                        0.0
                    } else {
                        f64::INFINITY
                    }
                } else {
                    delta / baseline.std_dev.max(EPSILON)
                }
            }
        };

        let threshold = self.threshold();
        ToleranceCheck {
            deviation,
            threshold,
            passed: deviation <= threshold,
        }
    }
}
