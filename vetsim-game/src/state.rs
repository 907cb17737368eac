//! Game progression state machine for one play-through.
//!
//! Phases run forward only: intake, diagnosis, treatment, results. The
//! engine is the sole owner of its transient state; the presentation layer
//! reads it through accessors and mutates it only through the operations
//! here. Abandoning a case simply drops the value, leaving no persisted
//! trace.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use crate::catalog::{Case, DiagnosticTest};
use crate::labs::ResultGenerator;
use crate::records::{DiagnosticTestResult, GameSession, new_session_id};

const DIAGNOSIS_POINTS: i32 = 100;
const TREATMENT_MATCH_POINTS: i32 = 25;
const TIME_BONUS_MAX: i32 = 100;
const TIME_BONUS_DIVISOR: u32 = 10;
const SCORE_CAP: i32 = 100;

/// One of the four linear stages of a play-through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum GamePhase {
    #[default]
    Intake,
    Diagnosis,
    Treatment,
    Results,
}

impl GamePhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "intake",
            Self::Diagnosis => "diagnosis",
            Self::Treatment => "treatment",
            Self::Results => "results",
        }
    }

    /// The next phase along the fixed sequence, clamped at `Results`.
    #[must_use]
    pub const fn next(self) -> Self {
        match self {
            Self::Intake => Self::Diagnosis,
            Self::Diagnosis => Self::Treatment,
            Self::Treatment | Self::Results => Self::Results,
        }
    }
}

impl fmt::Display for GamePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GamePhase {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "intake" => Ok(Self::Intake),
            "diagnosis" => Ok(Self::Diagnosis),
            "treatment" => Ok(Self::Treatment),
            "results" => Ok(Self::Results),
            _ => Err(()),
        }
    }
}

/// Compute the score for a finished play-through.
///
/// Treatments outside the correct set are never penalized; only matches
/// count, and the total is clamped at 100. That asymmetry is intentional.
#[must_use]
pub fn compute_score(
    case: &Case,
    diagnosis: Option<&str>,
    treatments: &[String],
    elapsed_minutes: u32,
) -> i32 {
    let diagnosis_points = if diagnosis == Some(case.correct_diagnosis.as_str()) {
        DIAGNOSIS_POINTS
    } else {
        0
    };
    let matched = treatments
        .iter()
        .filter(|tx| case.correct_treatments.contains(*tx))
        .count();
    let matched = i32::try_from(matched).unwrap_or(i32::MAX);
    let treatment_points = TREATMENT_MATCH_POINTS.saturating_mul(matched);
    let elapsed_penalty = i32::try_from(elapsed_minutes / TIME_BONUS_DIVISOR).unwrap_or(i32::MAX);
    let time_bonus = TIME_BONUS_MAX.saturating_sub(elapsed_penalty).max(0);
    diagnosis_points
        .saturating_add(treatment_points)
        .saturating_add(time_bonus)
        .min(SCORE_CAP)
}

/// Transient state for the case currently being played.
///
/// Owned exclusively by the engine operations below; discarded, not reset,
/// when the learner exits to the menu.
#[derive(Debug, Clone, Default)]
pub struct GameProgression {
    case: Option<Case>,
    completed_tests: Vec<DiagnosticTestResult>,
    selected_diagnosis: Option<String>,
    selected_treatments: SmallVec<[String; 4]>,
    elapsed_minutes: u32,
    spent_cents: i64,
    score: i32,
    phase: GamePhase,
    started_at: Option<DateTime<Utc>>,
}

impl GameProgression {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset all transient state and bind a new case, entering intake.
    ///
    /// Has no side effect outside this value; persistence happens only at
    /// game completion, driven by the caller.
    pub fn start_new_case(&mut self, case: Case) {
        *self = Self {
            case: Some(case),
            started_at: Some(Utc::now()),
            ..Self::default()
        };
    }

    /// Run one diagnostic test, appending its result and accumulating the
    /// test's time and cost. Silently a no-op when no case is bound.
    ///
    /// Re-running an already-completed test and overrunning the case budget
    /// are both allowed here; restricting them is presentation-layer policy.
    pub fn run_diagnostic_test<G>(
        &mut self,
        test: &DiagnosticTest,
        generator: &mut G,
    ) -> Option<&DiagnosticTestResult>
    where
        G: ResultGenerator + ?Sized,
    {
        let case = self.case.as_ref()?;
        let result = generator.generate(test, case);
        self.completed_tests.push(result);
        self.elapsed_minutes = self.elapsed_minutes.saturating_add(test.duration_minutes);
        self.spent_cents = self.spent_cents.saturating_add(test.cost_cents);
        self.completed_tests.last()
    }

    /// Record the chosen diagnosis and advance to the treatment phase.
    /// No-op when no case is bound or the results phase has been reached;
    /// phases never move backward.
    pub fn submit_diagnosis(&mut self, diagnosis_id: impl Into<String>) {
        if self.case.is_none() || self.phase == GamePhase::Results {
            return;
        }
        self.selected_diagnosis = Some(diagnosis_id.into());
        self.phase = GamePhase::Treatment;
    }

    /// Record the chosen treatment set, compute the final score and enter
    /// the results phase. Requires a bound case and a previously submitted
    /// diagnosis; otherwise a no-op. Once the results phase is reached the
    /// play-through is final and further submissions are ignored.
    pub fn submit_treatments<I, S>(&mut self, treatments: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let Some(case) = self.case.as_ref() else {
            return;
        };
        if self.selected_diagnosis.is_none() || self.phase == GamePhase::Results {
            return;
        }
        self.selected_treatments.clear();
        for treatment in treatments {
            let treatment = treatment.into();
            if !self.selected_treatments.contains(&treatment) {
                self.selected_treatments.push(treatment);
            }
        }
        self.score = compute_score(
            case,
            self.selected_diagnosis.as_deref(),
            &self.selected_treatments,
            self.elapsed_minutes,
        );
        self.phase = GamePhase::Results;
    }

    /// Advance exactly one step along the phase sequence; calling this in
    /// the results phase is a no-op, not an error.
    pub fn next_phase(&mut self) {
        self.phase = self.phase.next();
    }

    #[must_use]
    pub fn case(&self) -> Option<&Case> {
        self.case.as_ref()
    }

    #[must_use]
    pub const fn phase(&self) -> GamePhase {
        self.phase
    }

    #[must_use]
    pub fn completed_tests(&self) -> &[DiagnosticTestResult] {
        &self.completed_tests
    }

    #[must_use]
    pub fn selected_diagnosis(&self) -> Option<&str> {
        self.selected_diagnosis.as_deref()
    }

    #[must_use]
    pub fn selected_treatments(&self) -> &[String] {
        &self.selected_treatments
    }

    #[must_use]
    pub const fn elapsed_minutes(&self) -> u32 {
        self.elapsed_minutes
    }

    #[must_use]
    pub const fn spent_cents(&self) -> i64 {
        self.spent_cents
    }

    /// Remaining diagnostic budget; negative once overrun.
    #[must_use]
    pub fn budget_remaining_cents(&self) -> Option<i64> {
        self.case
            .as_ref()
            .map(|case| case.budget_cents - self.spent_cents)
    }

    /// The computed score, valid only once the results phase is reached.
    #[must_use]
    pub const fn score(&self) -> Option<i32> {
        match self.phase {
            GamePhase::Results => Some(self.score),
            _ => None,
        }
    }

    /// Snapshot the finished play-through as an immutable session record.
    /// Returns `None` unless the results phase was reached.
    #[must_use]
    pub fn to_session<R>(&self, rng: &mut R) -> Option<GameSession>
    where
        R: Rng + ?Sized,
    {
        if self.phase != GamePhase::Results {
            return None;
        }
        let case = self.case.as_ref()?;
        let chosen_diagnosis = self.selected_diagnosis.clone()?;
        let ended_at = Utc::now();
        Some(GameSession {
            id: new_session_id(ended_at, rng),
            case_id: case.id.clone(),
            started_at: self.started_at.unwrap_or(ended_at),
            ended_at,
            elapsed_minutes: self.elapsed_minutes,
            chosen_diagnosis,
            correct_diagnosis: case.correct_diagnosis.clone(),
            chosen_treatments: self.selected_treatments.to_vec(),
            correct_treatments: case.correct_treatments.clone(),
            tests_performed: self
                .completed_tests
                .iter()
                .map(|result| result.test_id.clone())
                .collect(),
            difficulty: case.difficulty,
            score: self.score,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CaseCatalog, Difficulty};
    use crate::labs::MockResultGenerator;
    use rand::SeedableRng;
    use rand_chacha::ChaCha20Rng;

    fn parvo_case() -> Case {
        CaseCatalog::builtin()
            .case_by_id("pup_parvo")
            .expect("builtin catalog has the parvo case")
            .clone()
    }

    fn cbc_test() -> DiagnosticTest {
        CaseCatalog::builtin()
            .test_by_id("cbc")
            .expect("builtin catalog has a CBC")
            .clone()
    }

    #[test]
    fn score_full_marks_hit_the_cap() {
        let case = parvo_case();
        let treatments = vec!["tx_iv_fluids".to_string(), "tx_antiemetic".to_string()];
        assert_eq!(compute_score(&case, Some("dx_parvo"), &treatments, 0), 100);
    }

    #[test]
    fn score_everything_wrong_and_slow_is_zero() {
        let case = parvo_case();
        assert_eq!(compute_score(&case, Some("dx_garbage"), &[], 1000), 0);
    }

    #[test]
    fn score_clamp_is_exercised_with_partial_treatments() {
        let case = parvo_case();
        let treatments = vec!["tx_iv_fluids".to_string()];
        // 100 + 25 + 95 clamps to 100
        assert_eq!(compute_score(&case, Some("dx_parvo"), &treatments, 50), 100);
    }

    #[test]
    fn wrong_treatments_are_not_penalized() {
        let case = parvo_case();
        let right = vec!["tx_iv_fluids".to_string()];
        let padded = vec![
            "tx_iv_fluids".to_string(),
            "tx_steroids".to_string(),
            "tx_bland_diet".to_string(),
        ];
        assert_eq!(
            compute_score(&case, Some("dx_parvo"), &right, 800),
            compute_score(&case, Some("dx_parvo"), &padded, 800)
        );
    }

    #[test]
    fn phase_advance_clamps_at_results() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        assert_eq!(progression.phase(), GamePhase::Intake);
        for _ in 0..10 {
            progression.next_phase();
        }
        assert_eq!(progression.phase(), GamePhase::Results);
    }

    #[test]
    fn run_test_without_case_is_a_no_op() {
        let mut progression = GameProgression::new();
        let mut generator = MockResultGenerator::with_seed(1);
        assert!(
            progression
                .run_diagnostic_test(&cbc_test(), &mut generator)
                .is_none()
        );
        assert!(progression.completed_tests().is_empty());
        assert_eq!(progression.elapsed_minutes(), 0);
    }

    #[test]
    fn duplicate_test_runs_are_permitted_and_both_recorded() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        let test = cbc_test();
        let mut generator = MockResultGenerator::with_seed(2);
        progression.run_diagnostic_test(&test, &mut generator);
        progression.run_diagnostic_test(&test, &mut generator);

        // No duplicate-run enforcement at the engine level by design.
        assert_eq!(progression.completed_tests().len(), 2);
        assert_eq!(progression.elapsed_minutes(), test.duration_minutes * 2);
        assert_eq!(progression.spent_cents(), test.cost_cents * 2);
    }

    #[test]
    fn budget_overrun_is_permitted_at_the_engine_level() {
        let mut progression = GameProgression::new();
        let mut case = parvo_case();
        case.budget_cents = 1000;
        progression.start_new_case(case);
        let test = cbc_test();
        let mut generator = MockResultGenerator::with_seed(3);
        progression.run_diagnostic_test(&test, &mut generator);

        let remaining = progression.budget_remaining_cents().unwrap();
        assert!(remaining < 0, "engine lets the budget go negative");
        assert_eq!(progression.completed_tests().len(), 1);
    }

    #[test]
    fn treatments_without_diagnosis_are_ignored() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        progression.submit_treatments(["tx_iv_fluids"]);
        assert_eq!(progression.phase(), GamePhase::Intake);
        assert!(progression.score().is_none());
    }

    #[test]
    fn finished_games_ignore_further_submissions() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        progression.submit_diagnosis("dx_garbage");
        progression.submit_treatments(["tx_steroids"]);
        assert_eq!(progression.phase(), GamePhase::Results);
        let settled = progression.score();

        // A learner who has seen the results cannot re-roll a better
        // answer into the same play-through.
        progression.submit_diagnosis("dx_parvo");
        assert_eq!(progression.phase(), GamePhase::Results);
        progression.submit_treatments(["tx_iv_fluids", "tx_antiemetic"]);
        assert_eq!(progression.phase(), GamePhase::Results);
        assert_eq!(progression.score(), settled);
        assert_eq!(progression.selected_diagnosis(), Some("dx_garbage"));
        assert_eq!(progression.selected_treatments(), ["tx_steroids".to_string()]);
    }

    #[test]
    fn full_flow_scores_and_snapshots_a_session() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        let mut generator = MockResultGenerator::with_seed(4);
        progression.run_diagnostic_test(&cbc_test(), &mut generator);
        progression.submit_diagnosis("dx_parvo");
        assert_eq!(progression.phase(), GamePhase::Treatment);
        progression.submit_treatments(["tx_iv_fluids", "tx_antiemetic", "tx_iv_fluids"]);
        assert_eq!(progression.phase(), GamePhase::Results);

        // Duplicate selections collapse to a set before scoring.
        assert_eq!(progression.selected_treatments().len(), 2);
        let score = progression.score().expect("score valid in results phase");
        assert_eq!(score, 100);

        let mut rng = ChaCha20Rng::seed_from_u64(5);
        let session = progression.to_session(&mut rng).unwrap();
        assert_eq!(session.case_id, "pup_parvo");
        assert_eq!(session.correct_diagnosis, "dx_parvo");
        assert_eq!(session.tests_performed, vec!["cbc".to_string()]);
        assert_eq!(session.difficulty, Difficulty::Medium);
        assert_eq!(session.score, 100);
        assert!(session.shape_ok());
    }

    #[test]
    fn to_session_requires_results_phase() {
        let mut progression = GameProgression::new();
        progression.start_new_case(parvo_case());
        progression.submit_diagnosis("dx_parvo");
        let mut rng = ChaCha20Rng::seed_from_u64(6);
        assert!(progression.to_session(&mut rng).is_none());
    }

    #[test]
    fn starting_a_new_case_resets_everything() {
        let mut progression = GameProgression::new();
        let mut generator = MockResultGenerator::with_seed(7);

        // Arbitrary operation soup, including misuse, before the reset.
        progression.start_new_case(parvo_case());
        progression.run_diagnostic_test(&cbc_test(), &mut generator);
        progression.run_diagnostic_test(&cbc_test(), &mut generator);
        progression.submit_diagnosis("dx_hge");
        progression.submit_treatments(["tx_steroids"]);
        progression.next_phase();
        progression.next_phase();

        let fresh = CaseCatalog::builtin()
            .case_by_id("dog_gdv")
            .unwrap()
            .clone();
        progression.start_new_case(fresh);

        assert_eq!(progression.phase(), GamePhase::Intake);
        assert!(progression.completed_tests().is_empty());
        assert!(progression.selected_diagnosis().is_none());
        assert!(progression.selected_treatments().is_empty());
        assert_eq!(progression.elapsed_minutes(), 0);
        assert_eq!(progression.spent_cents(), 0);
        assert!(progression.score().is_none());
        assert_eq!(progression.case().unwrap().id, "dog_gdv");
    }
}
