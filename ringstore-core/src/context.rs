//! Wiring of the store, preferences and engines for one data directory

use crate::config::{Config, ConfigError};
use crate::core_cache::{CONSOLIDATE_SECRET, KEY_IMPORT, MIGRATE_SECRET};
use crate::core_consolidate::{ConsolidationEngine, ConsolidationGuard};
use crate::core_import::{ImportService, KeyringImporter, StoreImporter};
use crate::core_keyring::RingType;
use crate::core_migrate::MigrationEngine;
use crate::core_store::{
    KeyringStore, PreferenceFlags, Preferences, RingFilter, SqliteKeyringStore, StoreError,
};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ContextError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Failed to prepare cache directory: {0}")]
    CacheDir(#[from] std::io::Error),
}

pub type ContextResult<T> = Result<T, ContextError>;

/// Row counts and persisted flags, as shown by `ringstore status`
#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub public_rows: usize,
    pub secret_rows: usize,
    pub usable_secret_rows: usize,
    pub flags: PreferenceFlags,
    pub pending_import: bool,
    pub pending_migration_cache: bool,
    pub pending_consolidation_cache: bool,
}

/// Everything the binaries need, built once from a [`Config`]
pub struct RingstoreContext {
    config: Config,
    store: Arc<dyn KeyringStore>,
    prefs: Arc<Preferences>,
    importer: Arc<dyn KeyringImporter>,
}

impl RingstoreContext {
    /// Open the SQLite store under the configured data directory
    pub fn open(config: &Config) -> ContextResult<Self> {
        config.validate()?;
        let store = SqliteKeyringStore::open(config.database_path(), config.store.pool_size)?;
        info!(path = %config.database_path().display(), "Opened keyring database");
        Self::with_store(config, Arc::new(store))
    }

    /// Build around an existing store (tests, tooling)
    pub fn with_store(config: &Config, store: Arc<dyn KeyringStore>) -> ContextResult<Self> {
        std::fs::create_dir_all(config.cache_dir())?;
        let prefs = Arc::new(Preferences::load(config.preferences_path())?);
        debug!(cache_dir = %config.cache_dir().display(), "Context ready");
        Ok(Self {
            config: config.clone(),
            importer: Arc::new(StoreImporter::new(store.clone())),
            store,
            prefs,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn KeyringStore> {
        &self.store
    }

    pub fn preferences(&self) -> &Arc<Preferences> {
        &self.prefs
    }

    /// Consolidation engine sharing the process-wide guard
    pub fn consolidation(&self) -> ConsolidationEngine {
        ConsolidationEngine::new(
            self.store.clone(),
            self.importer.clone(),
            self.prefs.clone(),
            self.config.cache_dir(),
        )
        .with_guard(ConsolidationGuard::process_wide())
    }

    pub fn migration(&self) -> MigrationEngine {
        MigrationEngine::new(
            self.store.clone(),
            self.prefs.clone(),
            self.config.cache_dir(),
            self.config.kdf_params(),
        )
    }

    pub fn import_service(&self) -> ImportService {
        ImportService::new(self.importer.clone(), self.config.import.max_workers)
    }

    pub fn status(&self) -> ContextResult<StoreStatus> {
        let cache_dir = self.config.cache_dir();
        let exists = |name: &str| cache_dir.join(name).exists();
        Ok(StoreStatus {
            public_rows: self.store.count(RingType::Public, RingFilter::All)?,
            secret_rows: self.store.count(RingType::Secret, RingFilter::All)?,
            usable_secret_rows: self.store.count(RingType::Secret, RingFilter::HasAnySecret)?,
            flags: self.prefs.flags()?,
            pending_import: exists(KEY_IMPORT),
            pending_migration_cache: exists(MIGRATE_SECRET),
            pending_consolidation_cache: exists(CONSOLIDATE_SECRET),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_ops::NoopProgress;
    use crate::core_store::MemoryKeyringStore;
    use crate::test_utils::{fast_encryptor, foreign_public, SecretKeyringBuilder};
    use tempfile::TempDir;

    #[test]
    fn test_open_creates_database_and_cache_dir() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(temp_dir.path());

        let context = RingstoreContext::open(&config).unwrap();
        assert!(config.database_path().exists());
        assert!(config.cache_dir().is_dir());

        let status = context.status().unwrap();
        assert_eq!(status.public_rows, 0);
        assert!(!status.flags.cached_consolidate);
        assert!(!status.pending_import);
    }

    #[test]
    fn test_status_counts_rows() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::with_data_dir(temp_dir.path());
        let fixture = SecretKeyringBuilder::new(0xA1).subkey(1, "p").build(&fast_encryptor());
        let mut records = fixture.records().to_vec();
        records.push(foreign_public(0xB2));
        let store = Arc::new(MemoryKeyringStore::with_records(records));

        let context = RingstoreContext::with_store(&config, store).unwrap();
        let status = context.status().unwrap();
        assert_eq!(status.public_rows, 2);
        assert_eq!(status.secret_rows, 1);
        assert_eq!(status.usable_secret_rows, 1);

        let engine = context.consolidation();
        assert!(engine.resume_if_interrupted(&NoopProgress).is_none());
    }
}
