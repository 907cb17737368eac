//! VetSim Game Engine
//!
//! Platform-agnostic core logic for the VetSim veterinary diagnosis trainer.
//! This crate provides the game progression state machine, the persistent
//! store and the statistics projection without UI or platform-specific
//! dependencies; a presentation layer drives it through the operations
//! exposed here.

pub mod catalog;
pub mod labs;
pub mod records;
pub mod state;
pub mod stats;
pub mod store;

// Re-export commonly used types
pub use catalog::{
    Case, CaseCatalog, DiagnosisOption, DiagnosticTest, Difficulty, MeasurementSpec, Treatment,
};
pub use labs::{ABNORMAL_CHANCE, MockResultGenerator, ResultGenerator};
pub use records::{
    CaseCompletionRecord, DiagnosticTestResult, GameSession, MeasurementValue, PLAYER_ID,
    UserProfile, new_session_id,
};
pub use state::{GamePhase, GameProgression, compute_score};
pub use stats::{
    RECENT_SESSION_DISPLAY, RECENT_SESSION_SCAN, StatisticsSummary, compute_statistics,
};
pub use store::{
    JsonFileBackend, MemoryBackend, PersistentStore, StorageBackend, StoreError,
};

use std::sync::OnceLock;

/// Trait for abstracting catalog loading operations
/// Platform-specific implementations should provide this
pub trait CatalogSource {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Load the case and test catalog from the platform-specific source
    ///
    /// # Errors
    ///
    /// Returns an error if the catalog cannot be loaded.
    fn load_catalog(&self) -> Result<CaseCatalog, Self::Error>;
}

/// Catalog source backed by the content file embedded in this crate.
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinCatalog;

impl CatalogSource for BuiltinCatalog {
    type Error = std::convert::Infallible;

    fn load_catalog(&self) -> Result<CaseCatalog, Self::Error> {
        Ok(CaseCatalog::builtin().clone())
    }
}

/// Main engine tying the catalog, the persistent store and the play-through
/// lifecycle together for a presentation layer.
pub struct GameEngine<C, B>
where
    C: CatalogSource,
    B: StorageBackend,
{
    catalog_source: C,
    store: PersistentStore<B>,
    catalog: OnceLock<CaseCatalog>,
}

impl<C, B> GameEngine<C, B>
where
    C: CatalogSource,
    B: StorageBackend,
{
    /// Create a new game engine with the provided catalog source and storage
    /// backend.
    #[must_use]
    pub fn new(catalog_source: C, backend: B) -> Self {
        Self {
            catalog_source,
            store: PersistentStore::new(backend),
            catalog: OnceLock::new(),
        }
    }

    /// Open the persistent store. A failure here disables history and
    /// statistics but the in-memory play-through flow keeps working.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be opened.
    pub fn initialize(&self) -> Result<(), StoreError> {
        self.store.initialize()
    }

    #[must_use]
    pub fn store(&self) -> &PersistentStore<B> {
        &self.store
    }

    /// The catalog, loaded lazily and cached for the engine's lifetime.
    /// A source failure degrades to an empty catalog.
    pub fn catalog(&self) -> &CaseCatalog {
        self.catalog.get_or_init(|| {
            self.catalog_source.load_catalog().unwrap_or_else(|e| {
                log::warn!("failed to load case catalog, using empty catalog: {e}");
                CaseCatalog::empty()
            })
        })
    }

    /// Bind the identified case into a fresh progression, entering intake.
    #[must_use]
    pub fn start_case(&self, case_id: &str) -> Option<GameProgression> {
        let case = self.catalog().case_by_id(case_id)?.clone();
        let mut progression = GameProgression::new();
        progression.start_new_case(case);
        Some(progression)
    }

    /// Persist a finished play-through: append the session record, fold it
    /// into the profile and upsert the per-case completion record.
    ///
    /// The three writes are not transactional; if a later one fails the
    /// earlier ones stand, and the statistics view reconciles from the
    /// session log.
    ///
    /// # Errors
    ///
    /// Returns an error if the progression has not reached the results phase
    /// or any of the storage writes fail.
    pub fn record_completion(
        &self,
        progression: &GameProgression,
    ) -> Result<GameSession, anyhow::Error> {
        let session = progression
            .to_session(&mut rand::thread_rng())
            .ok_or_else(|| anyhow::anyhow!("game is not in the results phase"))?;
        self.store.append_game_session(&session)?;

        let mut profile = self.store.get_user_profile()?;
        profile.record_completion(&session);
        self.store.save_user_profile(&profile)?;

        self.store
            .upsert_case_completion(&session.case_id, session.score, session.difficulty)?;
        Ok(session)
    }
}
