//! The storage engine: one temporary LMDB volume per run.
//!
//! The volume lives in `<work_dir>/volume`. The engine is a cheap `Clone`
//! handle; every clone shares the same environment slot, so closing through
//! any handle closes it for all stores.

use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use heed::types::Bytes;
use heed::{Database, Env, EnvFlags, EnvOpenOptions};
use tally_core::{EngineConfig, EngineError};
use tracing::{debug, info};

/// Tracing target for all engine diagnostics.
pub const ENGINE_LOG_TARGET: &str = "tally::engine";

const VOLUME_DIR: &str = "volume";

/// Map sizes are rounded up to this, which covers every OS page size LMDB
/// runs on.
const MAP_SIZE_ALIGN: usize = 64 * 1024;

struct EngineInner {
    /// `None` once the engine has been closed.
    env: RwLock<Option<Env>>,
    work_dir: PathBuf,
    config: EngineConfig,
}

/// Owner of the shared LMDB environment.
#[derive(Clone)]
pub struct StorageEngine {
    inner: Arc<EngineInner>,
}

impl StorageEngine {
    /// Open a fresh volume under `work_dir`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::InitFailed` if the volume directory cannot be
    /// created or the LMDB environment cannot be opened. Callers treat this
    /// as fatal for the run.
    pub fn open(work_dir: impl AsRef<Path>, config: &EngineConfig) -> Result<Self, EngineError> {
        let work_dir = work_dir.as_ref().to_path_buf();
        let volume_dir = work_dir.join(VOLUME_DIR);

        std::fs::create_dir_all(&volume_dir).map_err(|e| EngineError::InitFailed {
            reason: format!("cannot create {}: {}", volume_dir.display(), e),
        })?;

        let map_size = config.map_size_bytes.next_multiple_of(MAP_SIZE_ALIGN);
        let mut options = EnvOpenOptions::new();
        options.map_size(map_size).max_dbs(config.max_caches);
        // Nothing in the volume outlives the run.
        unsafe {
            options.flags(EnvFlags::NO_SYNC);
        }

        let env = unsafe { options.open(&volume_dir) }.map_err(|e| EngineError::InitFailed {
            reason: format!("cannot open volume at {}: {}", volume_dir.display(), e),
        })?;

        info!(
            target: ENGINE_LOG_TARGET,
            path = %volume_dir.display(),
            map_size,
            max_caches = config.max_caches,
            page_size = config.page_size,
            "Storage volume opened"
        );

        Ok(Self {
            inner: Arc::new(EngineInner {
                env: RwLock::new(Some(env)),
                work_dir,
                config: config.clone(),
            }),
        })
    }

    /// Flush and release the volume.
    ///
    /// Blocks until in-flight operations drop their environment handle.
    /// Closing an already closed engine is a no-op.
    pub fn close(&self) -> Result<(), EngineError> {
        let env = self
            .inner
            .env
            .write()
            .map_err(|_| EngineError::LockPoisoned)?
            .take();

        let Some(env) = env else {
            debug!(target: ENGINE_LOG_TARGET, "Storage engine already closed");
            return Ok(());
        };

        let synced = env.force_sync().map_err(txn_err);
        env.prepare_for_closing().wait();

        info!(
            target: ENGINE_LOG_TARGET,
            path = %self.inner.work_dir.display(),
            "Storage volume closed"
        );
        synced
    }

    pub fn is_open(&self) -> bool {
        self.inner
            .env
            .read()
            .map(|env| env.is_some())
            .unwrap_or(false)
    }

    /// Working directory holding the volume.
    pub fn work_dir(&self) -> &Path {
        &self.inner.work_dir
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// A handle on the live environment, or `EngineError::Closed`.
    pub(crate) fn env(&self) -> Result<Env, EngineError> {
        self.inner
            .env
            .read()
            .map_err(|_| EngineError::LockPoisoned)?
            .clone()
            .ok_or(EngineError::Closed)
    }

    /// Create (or reopen) the named database backing one cache.
    pub(crate) fn open_database(&self, name: &str) -> Result<Database<Bytes, Bytes>, EngineError> {
        let env = self.env()?;
        let mut wtxn = env.write_txn().map_err(txn_err)?;

        let db: Database<Bytes, Bytes> = env
            .create_database(&mut wtxn, Some(name))
            .map_err(txn_err)?;

        wtxn.commit().map_err(txn_err)?;
        Ok(db)
    }
}

impl std::fmt::Debug for StorageEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageEngine")
            .field("work_dir", &self.inner.work_dir)
            .field("open", &self.is_open())
            .finish()
    }
}

/// Map a heed error to a transaction failure.
pub(crate) fn txn_err(e: heed::Error) -> EngineError {
    EngineError::TransactionFailed {
        reason: e.to_string(),
    }
}
