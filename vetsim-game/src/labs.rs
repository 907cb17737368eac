//! Mock diagnostic result generation.
//!
//! A content fixture, not a clinical model: each run has a fixed 30% chance
//! of coming back abnormal regardless of the case, and values are drawn
//! against the test's reference intervals. The case is accepted for
//! interface symmetry but never consulted.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;
use std::collections::BTreeMap;

use crate::catalog::{Case, DiagnosticTest};
use crate::records::{DiagnosticTestResult, MeasurementValue};

/// Fixed probability that a generated result is flagged abnormal.
pub const ABNORMAL_CHANCE: f64 = 0.30;

const NORMAL_FINDING: &str = "No significant findings.";

/// Seam between the engine and whatever produces test results.
pub trait ResultGenerator {
    fn generate(&mut self, test: &DiagnosticTest, case: &Case) -> DiagnosticTestResult;
}

/// The default generator, seedable for reproducible runs.
#[derive(Debug, Clone)]
pub struct MockResultGenerator {
    rng: ChaCha20Rng,
}

impl MockResultGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: ChaCha20Rng::from_entropy(),
        }
    }

    #[must_use]
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: ChaCha20Rng::seed_from_u64(seed),
        }
    }

    fn draw_value(&mut self, low: f64, high: f64, abnormal: bool) -> f64 {
        if abnormal {
            let span = (high - low).max(1.0);
            let offset = span * self.rng.gen_range(0.1..0.6);
            let value = if self.rng.gen_bool(0.5) {
                high + offset
            } else {
                low - offset
            };
            (value * 10.0).round() / 10.0
        } else {
            let value = if high > low {
                self.rng.gen_range(low..=high)
            } else {
                low
            };
            // Rounding must not push a value flagged normal out of range.
            ((value * 10.0).round() / 10.0).clamp(low, high)
        }
    }
}

impl Default for MockResultGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultGenerator for MockResultGenerator {
    fn generate(&mut self, test: &DiagnosticTest, _case: &Case) -> DiagnosticTestResult {
        let abnormal = self.rng.gen_bool(ABNORMAL_CHANCE);
        let mut values = BTreeMap::new();
        for spec in &test.measurements {
            let value = self.draw_value(spec.normal_low, spec.normal_high, abnormal);
            values.insert(spec.label.clone(), MeasurementValue::Number(value));
        }
        if test.measurements.is_empty() {
            let finding = if abnormal {
                test.abnormal_summary
                    .clone()
                    .unwrap_or_else(|| "Abnormal findings present.".to_string())
            } else {
                NORMAL_FINDING.to_string()
            };
            values.insert("finding".to_string(), MeasurementValue::Text(finding));
        }
        let interpretation = if abnormal {
            Some(test.abnormal_summary.clone().unwrap_or_else(|| {
                format!("{}: values outside the reference interval.", test.name)
            }))
        } else {
            None
        };
        DiagnosticTestResult {
            test_id: test.id.clone(),
            values,
            abnormal,
            interpretation,
        }
    }
}
