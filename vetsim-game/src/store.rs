//! Durable local storage for profile, session history and case completions.
//!
//! The store is an explicitly constructed object with an explicit lifecycle:
//! build it over a [`StorageBackend`], call [`PersistentStore::initialize`]
//! once (safe to repeat), pass it by reference to whatever owns the
//! statistics view and the session-save path. Read paths tolerate malformed
//! records by dropping them; write paths surface tagged errors.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use crate::catalog::Difficulty;
use crate::records::{CaseCompletionRecord, GameSession, UserProfile};

const PROFILE_KEY: &str = "vetsim.profile";
const SESSION_PREFIX: &str = "vetsim.session.";
const COMPLETION_PREFIX: &str = "vetsim.case.";
const PROBE_KEY: &str = "vetsim.probe";

/// Tagged storage-error taxonomy.
///
/// Callers are expected to degrade gracefully on read paths (treat the
/// profile as still-default, show empty history) rather than crash; write
/// failures are surfaced.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no local persistence mechanism is available")]
    UnsupportedEnvironment,
    #[error("failed to initialize storage: {0}")]
    InitializationFailure(String),
    #[error("store has not been initialized")]
    NotInitialized,
    #[error("storage I/O failure: {0}")]
    Io(String),
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("a session with id {0} is already stored")]
    DuplicateIdentity(String),
    #[error("failed to encode record: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Flat string key/value storage with prefix scan, the shape of the host
/// mechanisms this store runs on (web local storage, a JSON file on disk).
pub trait StorageBackend {
    /// Whether the mechanism exists at all in this environment.
    fn available(&self) -> bool {
        true
    }

    /// # Errors
    ///
    /// Returns an error if the backend cannot be read.
    fn read(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// # Errors
    ///
    /// Returns an error if the value cannot be written.
    fn write(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns an error if the key cannot be removed.
    fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// # Errors
    ///
    /// Returns an error if keys cannot be enumerated.
    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError>;
}

/// In-memory backend. No durability; used for tests and for degraded play
/// when no durable mechanism exists.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
}

impl MemoryBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, String>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl StorageBackend for MemoryBackend {
    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries().get(key).cloned())
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.entries().insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.entries().remove(key);
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .entries()
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Durable backend holding all keys in one JSON document on disk.
///
/// The document is loaded lazily and written through on every mutation, so a
/// crash loses at most the mutation in flight.
#[derive(Debug)]
pub struct JsonFileBackend {
    path: PathBuf,
    cache: Mutex<Option<BTreeMap<String, String>>>,
}

impl JsonFileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            cache: Mutex::new(None),
        }
    }

    fn with_entries<T>(
        &self,
        f: impl FnOnce(&mut BTreeMap<String, String>) -> (T, bool),
    ) -> Result<T, StoreError> {
        let mut cache = self.cache.lock().unwrap_or_else(PoisonError::into_inner);
        if cache.is_none() {
            *cache = Some(self.load_document()?);
        }
        let entries = cache
            .as_mut()
            .ok_or_else(|| StoreError::Io("backend cache unavailable".to_string()))?;
        let (result, dirty) = f(entries);
        if dirty {
            self.flush_document(entries)?;
        }
        Ok(result)
    }

    fn load_document(&self) -> Result<BTreeMap<String, String>, StoreError> {
        match fs::read_to_string(&self.path) {
            Ok(raw) => {
                serde_json::from_str(&raw).map_err(|e| StoreError::InitializationFailure(format!(
                    "storage document {} is corrupt: {e}",
                    self.path.display()
                )))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(BTreeMap::new()),
            Err(e) => Err(StoreError::Io(e.to_string())),
        }
    }

    fn flush_document(&self, entries: &BTreeMap<String, String>) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.is_dir()
        {
            fs::create_dir_all(parent).map_err(|e| StoreError::Io(e.to_string()))?;
        }
        let raw = serde_json::to_string(entries)?;
        fs::write(&self.path, raw).map_err(|e| match e.kind() {
            std::io::ErrorKind::StorageFull => StoreError::QuotaExceeded,
            _ => StoreError::Io(e.to_string()),
        })
    }
}

impl StorageBackend for JsonFileBackend {
    /// A read-only capability query: reports whether the parent directory
    /// exists without touching the filesystem. Missing directories are
    /// created lazily when a write flushes the document.
    fn available(&self) -> bool {
        match self.path.parent() {
            None => true,
            Some(parent) if parent == Path::new("") => true,
            Some(parent) => parent.is_dir(),
        }
    }

    fn read(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.with_entries(|entries| (entries.get(key).cloned(), false))
    }

    fn write(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            entries.insert(key.to_string(), value.to_string());
            ((), true)
        })
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.with_entries(|entries| {
            let removed = entries.remove(key).is_some();
            ((), removed)
        })
    }

    fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        self.with_entries(|entries| {
            (
                entries
                    .keys()
                    .filter(|key| key.starts_with(prefix))
                    .cloned()
                    .collect(),
                false,
            )
        })
    }
}

/// Durable store for the three record collections: the singleton profile,
/// the append-only session log and the per-case completion records.
#[derive(Debug)]
pub struct PersistentStore<B: StorageBackend> {
    backend: B,
    initialized: AtomicBool,
    /// Serializes the completion read-modify-write so rapid repeated
    /// submissions for the same case cannot lose updates.
    upsert_lock: Mutex<()>,
}

impl<B: StorageBackend> PersistentStore<B> {
    #[must_use]
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            initialized: AtomicBool::new(false),
            upsert_lock: Mutex::new(()),
        }
    }

    /// Open the store. Idempotent; later calls are no-ops once open.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::UnsupportedEnvironment`] when no persistence
    /// mechanism exists, and [`StoreError::InitializationFailure`] when the
    /// mechanism exists but a probe round-trip fails.
    pub fn initialize(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            return Ok(());
        }
        if !self.backend.available() {
            return Err(StoreError::UnsupportedEnvironment);
        }
        self.backend
            .write(PROBE_KEY, "1")
            .and_then(|()| self.backend.remove(PROBE_KEY))
            .map_err(|e| StoreError::InitializationFailure(e.to_string()))?;
        self.initialized.store(true, Ordering::Release);
        Ok(())
    }

    fn ensure_initialized(&self) -> Result<(), StoreError> {
        if self.initialized.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    fn read_record<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(raw) = self.backend.read(key)? else {
            return Ok(None);
        };
        match serde_json::from_str(&raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                log::warn!("dropping malformed record at {key}: {e}");
                Ok(None)
            }
        }
    }

    fn write_record<T: Serialize>(&self, key: &str, record: &T) -> Result<(), StoreError> {
        let raw = serde_json::to_string(record)?;
        self.backend.write(key, &raw)
    }

    /// The stored profile, or a default zero-valued profile if none exists
    /// yet (or the stored one is malformed). Never fails with "not found".
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or the backend cannot be
    /// read.
    pub fn get_user_profile(&self) -> Result<UserProfile, StoreError> {
        self.ensure_initialized()?;
        Ok(self.read_record(PROFILE_KEY)?.unwrap_or_default())
    }

    /// Overwrite the singleton profile, stamping a fresh `last_played`
    /// timestamp store-side.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or the write fails.
    pub fn save_user_profile(&self, profile: &UserProfile) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        let mut stamped = profile.clone();
        stamped.last_played = Some(Utc::now());
        self.write_record(PROFILE_KEY, &stamped)
    }

    /// Insert-only append to the session log.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::DuplicateIdentity`] if the session id already
    /// exists; that indicates an identity-generation bug upstream and is
    /// never swallowed here.
    pub fn append_game_session(&self, session: &GameSession) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        let key = format!("{SESSION_PREFIX}{}", session.id);
        if self.backend.read(&key)?.is_some() {
            log::warn!("refusing to overwrite session {}", session.id);
            return Err(StoreError::DuplicateIdentity(session.id.clone()));
        }
        self.write_record(&key, session)
    }

    /// The most recent sessions, newest first. Records that fail the shape
    /// check are dropped, never fatal: partial data must not take down
    /// statistics.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or keys cannot be
    /// enumerated.
    pub fn list_recent_game_sessions(&self, limit: usize) -> Result<Vec<GameSession>, StoreError> {
        self.ensure_initialized()?;
        let mut sessions: Vec<GameSession> = Vec::new();
        for key in self.backend.keys_with_prefix(SESSION_PREFIX)? {
            let Some(session) = self.read_record::<GameSession>(&key)? else {
                continue;
            };
            if session.shape_ok() {
                sessions.push(session);
            } else {
                log::warn!("dropping session record with bad shape at {key}");
            }
        }
        sessions.sort_by(|a, b| b.ended_at.cmp(&a.ended_at));
        sessions.truncate(limit);
        Ok(sessions)
    }

    /// Read-then-write upsert of the per-case completion aggregate.
    ///
    /// First completion creates the record with `attempts == 1`; repeats
    /// increment `attempts`, append the score and raise `best_score`. The
    /// read-modify-write is serialized so concurrent calls for the same case
    /// cannot lose updates.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or the write fails.
    pub fn upsert_case_completion(
        &self,
        case_id: &str,
        score: i32,
        difficulty: Difficulty,
    ) -> Result<CaseCompletionRecord, StoreError> {
        self.ensure_initialized()?;
        let _guard = self
            .upsert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let key = format!("{COMPLETION_PREFIX}{case_id}");
        let now = Utc::now();
        let record = match self.read_record::<CaseCompletionRecord>(&key)? {
            Some(mut existing) => {
                existing.record_attempt(score, now);
                existing
            }
            None => CaseCompletionRecord::first(case_id, score, difficulty, now),
        };
        self.write_record(&key, &record)?;
        Ok(record)
    }

    /// The stored completion aggregate for one case, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or the backend cannot be
    /// read.
    pub fn case_completion(
        &self,
        case_id: &str,
    ) -> Result<Option<CaseCompletionRecord>, StoreError> {
        self.ensure_initialized()?;
        self.read_record(&format!("{COMPLETION_PREFIX}{case_id}"))
    }

    /// Ids of every case with a completed record. Malformed entries are
    /// dropped.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or keys cannot be
    /// enumerated.
    pub fn list_completed_case_ids(&self) -> Result<BTreeSet<String>, StoreError> {
        self.ensure_initialized()?;
        let mut ids = BTreeSet::new();
        for key in self.backend.keys_with_prefix(COMPLETION_PREFIX)? {
            let Some(record) = self.read_record::<CaseCompletionRecord>(&key)? else {
                continue;
            };
            if record.completed {
                ids.insert(record.case_id);
            }
        }
        Ok(ids)
    }

    /// Empty all three collections.
    ///
    /// Keys are gathered before any removal and the first removal failure
    /// propagates. The underlying mechanisms cannot guarantee atomicity
    /// across collections, so a failed call may leave a partial clear; it is
    /// never reported as success.
    ///
    /// # Errors
    ///
    /// Returns an error if the store is not open or any removal fails.
    pub fn clear_all(&self) -> Result<(), StoreError> {
        self.ensure_initialized()?;
        let _guard = self
            .upsert_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let mut keys = vec![PROFILE_KEY.to_string()];
        keys.extend(self.backend.keys_with_prefix(SESSION_PREFIX)?);
        keys.extend(self.backend.keys_with_prefix(COMPLETION_PREFIX)?);
        for key in keys {
            self.backend.remove(&key)?;
        }
        Ok(())
    }
}
