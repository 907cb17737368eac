//! Read-side statistics projection over the persistent store.
//!
//! Statistics are advisory: any failure reading the store degrades to the
//! all-zero summary so a broken history can never block navigation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::catalog::Difficulty;
use crate::records::GameSession;
use crate::store::{PersistentStore, StorageBackend};

/// How far back the aggregator scans the session log.
pub const RECENT_SESSION_SCAN: usize = 100;
/// How many recent sessions the summary carries for display.
pub const RECENT_SESSION_DISPLAY: usize = 5;

/// Derived summary of the learner's history.
///
/// `games_played` is derived from the session log, not from the profile's
/// own counter; the two can drift if a profile update and a session append
/// do not both land. The log is treated as the source of truth here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct StatisticsSummary {
    pub games_played: u32,
    pub cases_completed: u32,
    pub average_score: f64,
    pub best_score: i32,
    pub difficulty_breakdown: BTreeMap<Difficulty, u32>,
    pub recent_sessions: Vec<GameSession>,
}

/// Compute the summary from the store's raw collections. Never fails.
#[must_use]
pub fn compute_statistics<B: StorageBackend>(store: &PersistentStore<B>) -> StatisticsSummary {
    let sessions = match store.list_recent_game_sessions(RECENT_SESSION_SCAN) {
        Ok(sessions) => sessions,
        Err(e) => {
            log::warn!("statistics degraded to empty summary: {e}");
            return StatisticsSummary::default();
        }
    };
    let completed = match store.list_completed_case_ids() {
        Ok(ids) => ids,
        Err(e) => {
            log::warn!("statistics degraded to empty summary: {e}");
            return StatisticsSummary::default();
        }
    };

    // The store already drops malformed records; this guards against any
    // out-of-range score that slipped through an older write path.
    let valid: Vec<GameSession> = sessions
        .into_iter()
        .filter(GameSession::shape_ok)
        .collect();

    let games_played = u32::try_from(valid.len()).unwrap_or(u32::MAX);
    let best_score = valid.iter().map(|s| s.score).max().unwrap_or(0);
    let average_score = if valid.is_empty() {
        0.0
    } else {
        #[allow(clippy::cast_precision_loss)]
        {
            valid.iter().map(|s| f64::from(s.score)).sum::<f64>() / valid.len() as f64
        }
    };

    let mut difficulty_breakdown = BTreeMap::new();
    for session in &valid {
        *difficulty_breakdown.entry(session.difficulty).or_insert(0) += 1;
    }

    let mut recent_sessions = valid;
    recent_sessions.truncate(RECENT_SESSION_DISPLAY);

    StatisticsSummary {
        games_played,
        cases_completed: u32::try_from(completed.len()).unwrap_or(u32::MAX),
        average_score,
        best_score,
        difficulty_breakdown,
        recent_sessions,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryBackend;
    use chrono::Utc;

    fn open_store() -> PersistentStore<MemoryBackend> {
        let store = PersistentStore::new(MemoryBackend::new());
        store.initialize().unwrap();
        store
    }

    fn session(id: &str, score: i32, difficulty: Difficulty, minute: i64) -> GameSession {
        let now = Utc::now();
        GameSession {
            id: id.to_string(),
            case_id: "cat_hyperthyroid".to_string(),
            started_at: now,
            ended_at: now + chrono::Duration::minutes(minute),
            elapsed_minutes: 25,
            chosen_diagnosis: "dx_hyperthyroid".to_string(),
            correct_diagnosis: "dx_hyperthyroid".to_string(),
            chosen_treatments: vec![],
            correct_treatments: vec![],
            tests_performed: vec![],
            difficulty,
            score,
        }
    }

    #[test]
    fn empty_store_yields_all_zero_summary() {
        let store = open_store();
        let summary = compute_statistics(&store);
        assert_eq!(summary, StatisticsSummary::default());
        assert_eq!(summary.games_played, 0);
        assert_eq!(summary.cases_completed, 0);
        assert!((summary.average_score - 0.0).abs() < f64::EPSILON);
        assert_eq!(summary.best_score, 0);
        assert!(summary.difficulty_breakdown.is_empty());
        assert!(summary.recent_sessions.is_empty());
    }

    #[test]
    fn uninitialized_store_degrades_to_empty_summary() {
        let store = PersistentStore::new(MemoryBackend::new());
        assert_eq!(compute_statistics(&store), StatisticsSummary::default());
    }

    #[test]
    fn summary_aggregates_sessions_and_completions() {
        let store = open_store();
        store
            .append_game_session(&session("s-1", 80, Difficulty::Medium, 0))
            .unwrap();
        store
            .append_game_session(&session("s-2", 100, Difficulty::Hard, 1))
            .unwrap();
        store
            .append_game_session(&session("s-3", 60, Difficulty::Medium, 2))
            .unwrap();
        store
            .upsert_case_completion("cat_hyperthyroid", 100, Difficulty::Medium)
            .unwrap();

        let summary = compute_statistics(&store);
        assert_eq!(summary.games_played, 3);
        assert_eq!(summary.cases_completed, 1);
        assert_eq!(summary.best_score, 100);
        assert!((summary.average_score - 80.0).abs() < f64::EPSILON);
        assert_eq!(summary.difficulty_breakdown[&Difficulty::Medium], 2);
        assert_eq!(summary.difficulty_breakdown[&Difficulty::Hard], 1);
        assert_eq!(summary.recent_sessions.len(), 3);
        assert_eq!(summary.recent_sessions[0].id, "s-3");
    }

    #[test]
    fn recent_sessions_are_capped_for_display() {
        let store = open_store();
        for idx in 0..8_i64 {
            store
                .append_game_session(&session(
                    &format!("s-{idx}"),
                    50,
                    Difficulty::Medium,
                    idx,
                ))
                .unwrap();
        }
        let summary = compute_statistics(&store);
        assert_eq!(summary.games_played, 8);
        assert_eq!(summary.recent_sessions.len(), RECENT_SESSION_DISPLAY);
        assert_eq!(summary.recent_sessions[0].id, "s-7");
    }
}
