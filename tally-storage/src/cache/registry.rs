//! Factory and lifecycle owner of all caches of a run.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use tally_core::{EngineConfig, EngineError, RegistryError, TallyResult};
use tracing::{debug, warn};

use super::codec::CacheValue;
use super::engine::{StorageEngine, ENGINE_LOG_TARGET};
use super::store::CompositeKeyStore;
use crate::temp_folder::TempFolder;

/// Name requested from the temp folder for the working directory.
const WORK_DIR_NAME: &str = "caches";

#[derive(Debug)]
struct RegistryState {
    cache_names: HashSet<String>,
    /// `None` once the directory has been handed back.
    work_dir: Option<PathBuf>,
}

/// Creates named caches on one scratch volume and tears the volume down.
///
/// Built once per batch run and passed by reference to every component that
/// needs a cache. The engine is opened by [`CacheRegistry::new`]; there is no
/// separate start step.
///
/// # Lifecycle
///
/// ```text
/// new ──► create_cache* ──► stop
///  │                          │
///  └─ working dir + volume    └─ close volume, delete working dir
/// ```
#[derive(Debug)]
pub struct CacheRegistry {
    engine: StorageEngine,
    state: Mutex<RegistryState>,
}

impl CacheRegistry {
    /// Obtain a working directory from `temp_folder` and open the volume in it.
    ///
    /// # Errors
    ///
    /// - `ConfigError` if `config` does not validate
    /// - `EngineError::InitFailed` if the directory or volume cannot be
    ///   created; the run cannot proceed without it
    pub fn new(temp_folder: &dyn TempFolder, config: EngineConfig) -> TallyResult<Self> {
        config.validate()?;

        let work_dir = temp_folder
            .new_dir(WORK_DIR_NAME)
            .map_err(|e| EngineError::InitFailed {
                reason: format!("cannot create working directory: {}", e),
            })?;

        let engine = match StorageEngine::open(&work_dir, &config) {
            Ok(engine) => engine,
            Err(e) => {
                remove_work_dir(&work_dir);
                return Err(e.into());
            }
        };

        Ok(Self {
            engine,
            state: Mutex::new(RegistryState {
                cache_names: HashSet::new(),
                work_dir: Some(work_dir),
            }),
        })
    }

    /// Create the cache `name`.
    ///
    /// This is the only way to obtain a cache, and each name can be created
    /// once per registry.
    ///
    /// # Errors
    ///
    /// - `EngineError::Closed` after [`CacheRegistry::stop`]
    /// - `RegistryError::DuplicateCache` if `name` was already created
    pub fn create_cache<V: CacheValue>(&self, name: &str) -> TallyResult<CompositeKeyStore<V>> {
        let mut state = self
            .state
            .lock()
            .map_err(|_| EngineError::LockPoisoned)?;

        if !self.engine.is_open() {
            return Err(EngineError::Closed.into());
        }
        if state.cache_names.contains(name) {
            return Err(RegistryError::DuplicateCache {
                name: name.to_string(),
            }
            .into());
        }

        let db = self.engine.open_database(name)?;
        state.cache_names.insert(name.to_string());
        debug!(cache = name, "Cache created");

        Ok(CompositeKeyStore::new(name, db, self.engine.clone()))
    }

    /// No-op: the engine is already running once the registry exists.
    pub fn start(&self) {}

    /// Close the volume, forget all cache names and delete the working
    /// directory.
    ///
    /// Teardown always runs to the end. Deleting the directory is
    /// best-effort and a missing directory is fine. Calling `stop` again is
    /// a no-op.
    ///
    /// # Errors
    ///
    /// Returns the engine error if the volume could not be flushed or closed
    /// cleanly; the directory is deleted regardless.
    pub fn stop(&self) -> TallyResult<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let closed = self.engine.close();
        if let Err(e) = &closed {
            warn!(target: ENGINE_LOG_TARGET, error = %e, "Failed to close caches cleanly");
        }

        state.cache_names.clear();
        if let Some(work_dir) = state.work_dir.take() {
            remove_work_dir(&work_dir);
        }

        closed.map_err(Into::into)
    }

    pub fn is_open(&self) -> bool {
        self.engine.is_open()
    }

    /// Names of the caches created so far, sorted.
    pub fn cache_names(&self) -> Vec<String> {
        let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = state.cache_names.iter().cloned().collect();
        names.sort();
        names
    }

    /// The working directory, or `None` after `stop`.
    pub fn work_dir(&self) -> Option<PathBuf> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .work_dir
            .clone()
    }

    pub fn engine(&self) -> &StorageEngine {
        &self.engine
    }
}

impl Drop for CacheRegistry {
    fn drop(&mut self) {
        // Close failures are already logged by `stop`.
        let _ = self.stop();
    }
}

fn remove_work_dir(path: &Path) {
    match std::fs::remove_dir_all(path) {
        Ok(()) => debug!(target: ENGINE_LOG_TARGET, path = %path.display(), "Working directory removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(
            target: ENGINE_LOG_TARGET,
            path = %path.display(),
            error = %e,
            "Failed to remove working directory"
        ),
    }
}
