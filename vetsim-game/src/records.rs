//! Persisted record types: user profile, historical sessions and per-case
//! completion aggregates.
//!
//! These are the exact shapes written to the persistent store. Deserialization
//! is the schema check: a stored blob that does not parse into one of these
//! types is a malformed record and is dropped at the storage boundary.

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::catalog::Difficulty;

/// Fixed singleton identity for the local learner profile.
pub const PLAYER_ID: &str = "local-player";

/// One value reported for a measurement label, numeric or free-text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MeasurementValue {
    Number(f64),
    Text(String),
}

/// The outcome of running one diagnostic test during a case.
///
/// Produced once per run and never mutated. The engine does not prevent
/// running the same test twice; each run produces its own result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticTestResult {
    pub test_id: String,
    /// Measurement label to reported value
    pub values: BTreeMap<String, MeasurementValue>,
    pub abnormal: bool,
    #[serde(default)]
    pub interpretation: Option<String>,
}

/// Singleton aggregate profile for the local learner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserProfile {
    pub player_id: String,
    #[serde(default)]
    pub completed_cases: BTreeSet<String>,
    /// Best score per case id
    #[serde(default)]
    pub case_best_scores: BTreeMap<String, i32>,
    #[serde(default)]
    pub total_score: i64,
    #[serde(default)]
    pub games_played: u32,
    #[serde(default)]
    pub best_score: i32,
    #[serde(default)]
    pub average_score: f64,
    /// Completed-game count per difficulty label
    #[serde(default)]
    pub difficulty_completions: BTreeMap<Difficulty, u32>,
    /// Stamped by the store on every save, never trusted from the caller
    #[serde(default)]
    pub last_played: Option<DateTime<Utc>>,
}

impl Default for UserProfile {
    fn default() -> Self {
        Self {
            player_id: PLAYER_ID.to_string(),
            completed_cases: BTreeSet::new(),
            case_best_scores: BTreeMap::new(),
            total_score: 0,
            games_played: 0,
            best_score: 0,
            average_score: 0.0,
            difficulty_completions: BTreeMap::new(),
            last_played: None,
        }
    }
}

impl UserProfile {
    /// Fold one finished session into the aggregate counters.
    ///
    /// This is the single read-modify-write mutation point for the profile;
    /// it keeps `average_score == total_score / games_played`, keeps
    /// `best_score` at the running maximum and never duplicates a completed
    /// case id.
    pub fn record_completion(&mut self, session: &GameSession) {
        self.games_played = self.games_played.saturating_add(1);
        self.total_score = self.total_score.saturating_add(i64::from(session.score));
        #[allow(clippy::cast_precision_loss)]
        {
            self.average_score = self.total_score as f64 / f64::from(self.games_played);
        }
        self.best_score = self.best_score.max(session.score);
        self.completed_cases.insert(session.case_id.clone());
        self.case_best_scores
            .entry(session.case_id.clone())
            .and_modify(|best| *best = (*best).max(session.score))
            .or_insert(session.score);
        *self
            .difficulty_completions
            .entry(session.difficulty)
            .or_insert(0) += 1;
    }
}

/// One completed play-through, recorded permanently once scored.
///
/// The case's correct answers are snapshotted at session time so historical
/// records stay meaningful even if catalog content changes later.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameSession {
    pub id: String,
    pub case_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub elapsed_minutes: u32,
    pub chosen_diagnosis: String,
    pub correct_diagnosis: String,
    pub chosen_treatments: Vec<String>,
    pub correct_treatments: Vec<String>,
    /// Test ids in the order they were run
    pub tests_performed: Vec<String>,
    pub difficulty: Difficulty,
    /// Final score in [0, 100]
    pub score: i32,
}

impl GameSession {
    /// Shape check applied on top of typed deserialization when reading the
    /// session log. Typed parsing already rejects missing or non-numeric
    /// fields; this catches records that parsed but carry empty identities.
    #[must_use]
    pub fn shape_ok(&self) -> bool {
        !self.id.is_empty() && !self.case_id.is_empty() && (0..=100).contains(&self.score)
    }
}

/// Per-case aggregate of every attempt ever made at that case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseCompletionRecord {
    pub case_id: String,
    pub completed: bool,
    pub completed_at: DateTime<Utc>,
    pub best_score: i32,
    pub attempts: u32,
    pub difficulty: Difficulty,
    /// Every score achieved, oldest first; `attempts == scores.len()`
    pub scores: Vec<i32>,
}

impl CaseCompletionRecord {
    /// Record for a first completion of a case.
    #[must_use]
    pub fn first(case_id: &str, score: i32, difficulty: Difficulty, now: DateTime<Utc>) -> Self {
        Self {
            case_id: case_id.to_string(),
            completed: true,
            completed_at: now,
            best_score: score,
            attempts: 1,
            difficulty,
            scores: vec![score],
        }
    }

    /// Fold a repeat attempt into the record.
    pub fn record_attempt(&mut self, score: i32, now: DateTime<Utc>) {
        self.attempts = self.attempts.saturating_add(1);
        self.scores.push(score);
        self.best_score = self.best_score.max(score);
        self.completed = true;
        self.completed_at = now;
    }
}

/// Generate a session identity: millisecond timestamp plus random hex suffix.
#[must_use]
pub fn new_session_id<R>(now: DateTime<Utc>, rng: &mut R) -> String
where
    R: Rng + ?Sized,
{
    let entropy: u32 = rng.r#gen();
    format!("{}-{entropy:08x}", now.timestamp_millis())
}
