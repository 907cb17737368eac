//! Read-only clinical case and diagnostic test catalog.
//!
//! Content is static: loaded once (embedded JSON or caller-provided) and
//! cached for the process lifetime. A catalog that fails to parse degrades to
//! an empty catalog rather than aborting.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

const DEFAULT_CATALOG_DATA: &str = include_str!("../data/catalog.json");

/// Case difficulty label, used for breakdown statistics.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    #[default]
    Medium,
    Hard,
}

impl Difficulty {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Medium => "medium",
            Self::Hard => "hard",
        }
    }
}

impl fmt::Display for Difficulty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Difficulty {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "medium" => Ok(Self::Medium),
            "hard" => Ok(Self::Hard),
            _ => Err(()),
        }
    }
}

impl From<Difficulty> for String {
    fn from(value: Difficulty) -> Self {
        value.as_str().to_string()
    }
}

/// A single analyte reported by a diagnostic test, with its reference
/// interval. The mock result generator draws values against these bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementSpec {
    pub label: String,
    #[serde(default)]
    pub unit: String,
    pub normal_low: f64,
    pub normal_high: f64,
}

/// A diagnostic test the learner can order during a case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTest {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
    /// Price in cents to avoid floating-point issues
    pub cost_cents: i64,
    /// In-game time the test consumes
    pub duration_minutes: u32,
    #[serde(default)]
    pub measurements: Vec<MeasurementSpec>,
    /// Canned interpretation text attached to abnormal results
    #[serde(default)]
    pub abnormal_summary: Option<String>,
}

/// A diagnosis offered in a case's multiple-choice list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiagnosisOption {
    pub id: String,
    pub name: String,
}

/// A treatment offered in a case's treatment-plan list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Treatment {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub desc: String,
}

/// A fixed clinical scenario presented to the learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Case {
    pub id: String,
    pub name: String,
    pub signalment: String,
    pub presenting_complaint: String,
    pub owner_report: String,
    #[serde(default)]
    pub difficulty: Difficulty,
    /// Diagnostic budget in cents
    pub budget_cents: i64,
    pub correct_diagnosis: String,
    pub diagnoses: Vec<DiagnosisOption>,
    pub treatments: Vec<Treatment>,
    pub correct_treatments: Vec<String>,
}

/// Container for all case and test content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct CaseCatalog {
    #[serde(default)]
    pub cases: Vec<Case>,
    #[serde(default)]
    pub tests: Vec<DiagnosticTest>,
}

impl CaseCatalog {
    /// Create an empty catalog (useful for tests)
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Load catalog data from a JSON string
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON cannot be parsed into valid catalog data.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Parse the embedded content file, degrading to an empty catalog on error.
    #[must_use]
    pub fn load_from_static() -> Self {
        match Self::from_json(DEFAULT_CATALOG_DATA) {
            Ok(catalog) => catalog,
            Err(e) => {
                log::warn!("embedded catalog failed to parse, using empty catalog: {e}");
                Self::empty()
            }
        }
    }

    /// The embedded catalog, parsed once and cached for the process lifetime.
    #[must_use]
    pub fn builtin() -> &'static Self {
        static CATALOG: OnceLock<CaseCatalog> = OnceLock::new();
        CATALOG.get_or_init(Self::load_from_static)
    }

    #[must_use]
    pub fn case_by_id(&self, id: &str) -> Option<&Case> {
        self.cases.iter().find(|case| case.id == id)
    }

    #[must_use]
    pub fn test_by_id(&self, id: &str) -> Option<&DiagnosticTest> {
        self.tests.iter().find(|test| test.id == id)
    }

    /// Pick a random case, optionally restricted to one difficulty.
    #[must_use]
    pub fn random_case<R>(&self, difficulty: Option<Difficulty>, rng: &mut R) -> Option<&Case>
    where
        R: Rng + ?Sized,
    {
        let pool: Vec<&Case> = self
            .cases
            .iter()
            .filter(|case| difficulty.is_none_or(|d| case.difficulty == d))
            .collect();
        if pool.is_empty() {
            return None;
        }
        let choice = rng.gen_range(0..pool.len());
        Some(pool[choice])
    }
}

impl Case {
    #[must_use]
    pub fn diagnosis_by_id(&self, id: &str) -> Option<&DiagnosisOption> {
        self.diagnoses.iter().find(|dx| dx.id == id)
    }

    #[must_use]
    pub fn treatment_by_id(&self, id: &str) -> Option<&Treatment> {
        self.treatments.iter().find(|tx| tx.id == id)
    }
}
