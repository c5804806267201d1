/*
    engine.rs - Two phase consolidation

    Phase 1 saves own public, secret and foreign public keyrings into three
    snapshot caches. Nothing in the store changes during phase 1, so any
    failure there just aborts.

    Phase 2 is the critical section: the cached-consolidate flag is set
    first, then the store is wiped and refilled from the caches. The flag
    is only cleared once all three categories are back, so a crash anywhere
    in between leaves enough on disk to run phase 2 again.
*/

use super::guard::ConsolidationGuard;
use crate::core_cache::{
    CacheError, CacheResult, SnapshotCache, CONSOLIDATE_FOREIGN_PUBLIC, CONSOLIDATE_OWN_PUBLIC,
    CONSOLIDATE_SECRET,
};
use crate::core_import::{ImportService, KeyringImporter};
use crate::core_keyring::{KeyringRecord, RingType};
use crate::core_ops::{
    LogType, OperationLog, OperationResult, ProgressMessage, ProgressReporter, ProgressScaler,
    ResultPayload,
};
use crate::core_store::{KeyringStore, Preferences, RingFilter, StoreError};
use crate::metrics::{
    record_counter, Timer, CONSOLIDATE_DURATION, CONSOLIDATE_FAILURES, CONSOLIDATE_RECOVERIES,
    CONSOLIDATE_REJECTED, CONSOLIDATE_RUNS,
};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use thiserror::Error;
use tracing::{error, info, info_span, warn};

/// Secret keyrings are read from their cache and bulk inserted, either side can fail
#[derive(Error, Debug)]
enum SecretReimportError {
    #[error("Secret cache: {0}")]
    Cache(#[from] CacheError),

    #[error("Store: {0}")]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConsolidationPhase {
    Idle,
    SnapshottingOwnPublic,
    SnapshottingSecret,
    SnapshottingForeignPublic,
    CriticalRebuild,
    ReimportOwnPublic,
    ReimportSecret,
    ReimportForeignPublic,
    Error,
}

/// One category saved in phase 1
struct SnapshotStep {
    phase: ConsolidationPhase,
    message: ProgressMessage,
    ring_type: RingType,
    filter: RingFilter,
    cache_name: &'static str,
    save_log: LogType,
    io_error: LogType,
    progress: usize,
}

const SNAPSHOT_STEPS: [SnapshotStep; 3] = [
    SnapshotStep {
        phase: ConsolidationPhase::SnapshottingOwnPublic,
        message: ProgressMessage::SavingOwnPublic,
        ring_type: RingType::Public,
        filter: RingFilter::HasAnySecret,
        cache_name: CONSOLIDATE_OWN_PUBLIC,
        save_log: LogType::ConSaveOwnPublic,
        io_error: LogType::ConErrorIoOwnPublic,
        progress: 0,
    },
    SnapshotStep {
        phase: ConsolidationPhase::SnapshottingSecret,
        message: ProgressMessage::SavingSecret,
        ring_type: RingType::Secret,
        filter: RingFilter::All,
        cache_name: CONSOLIDATE_SECRET,
        save_log: LogType::ConSaveSecret,
        io_error: LogType::ConErrorIoSecret,
        progress: 3,
    },
    SnapshotStep {
        phase: ConsolidationPhase::SnapshottingForeignPublic,
        message: ProgressMessage::SavingForeignPublic,
        ring_type: RingType::Public,
        filter: RingFilter::NoSecret,
        cache_name: CONSOLIDATE_FOREIGN_PUBLIC,
        save_log: LogType::ConSaveForeignPublic,
        io_error: LogType::ConErrorIoForeignPublic,
        progress: 6,
    },
];

pub struct ConsolidationEngine {
    store: Arc<dyn KeyringStore>,
    import: ImportService,
    prefs: Arc<Preferences>,
    cache_dir: PathBuf,
    guard: Arc<ConsolidationGuard>,
    phase: Mutex<ConsolidationPhase>,
}

impl ConsolidationEngine {
    pub fn new(
        store: Arc<dyn KeyringStore>,
        importer: Arc<dyn KeyringImporter>,
        prefs: Arc<Preferences>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            import: ImportService::new(importer, 1),
            prefs,
            cache_dir: cache_dir.into(),
            guard: ConsolidationGuard::process_wide(),
            phase: Mutex::new(ConsolidationPhase::Idle),
        }
    }

    /// Use `guard` instead of the process-wide one
    pub fn with_guard(mut self, guard: Arc<ConsolidationGuard>) -> Self {
        self.guard = guard;
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    pub fn phase(&self) -> ConsolidationPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_phase(&self, phase: ConsolidationPhase) {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner) = phase;
    }

    fn cache(&self, name: &str) -> SnapshotCache<KeyringRecord> {
        SnapshotCache::new(&self.cache_dir, name)
    }

    /// Full consolidation: snapshot, then rebuild.
    ///
    /// If a previous rebuild was interrupted the existing caches are used
    /// instead of taking new snapshots of the incomplete store.
    pub fn consolidate(&self, progress: &dyn ProgressReporter) -> OperationResult {
        let _span = info_span!("consolidate").entered();
        record_counter(CONSOLIDATE_RUNS, 1);
        let timer = Timer::new(CONSOLIDATE_DURATION);

        let mut log = OperationLog::new();
        log.add(LogType::ConStart, 0);
        let indent = 1;

        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Consolidation requested while another one is running");
            record_counter(CONSOLIDATE_REJECTED, 1);
            log.add(LogType::ConRecursive, indent);
            log.add(LogType::ConErrorConcurrent, indent);
            return OperationResult::error(log, ResultPayload::None);
        };

        progress.set_progress(Some(ProgressMessage::Consolidating), 0, 100);
        // The rebuild can never be cancelled
        progress.set_prevent_cancel();

        let interrupted = match self.prefs.cached_consolidate() {
            Ok(flag) => flag,
            Err(e) => {
                error!("Failed to read consolidation state: {}", e);
                log.add(LogType::ConErrorDb, indent);
                return self.fail(log);
            }
        };

        let result = if interrupted {
            info!("Previous consolidation was interrupted, reusing its caches");
            log.add(LogType::ConRecover, indent);
            self.rebuild(&mut log, indent + 1, progress)
        } else {
            self.snapshot(&mut log, indent, progress)
                .and_then(|()| self.enter_critical(&mut log, indent))
                .and_then(|()| self.rebuild(&mut log, indent, progress))
        };

        timer.stop();
        match result {
            Ok(payload) => OperationResult::ok(log, payload),
            Err(()) => self.fail(log),
        }
    }

    /// Phase 2 alone, from the caches of an interrupted consolidation
    pub fn recover(&self, progress: &dyn ProgressReporter) -> OperationResult {
        let _span = info_span!("consolidate_recover").entered();
        let mut log = OperationLog::new();

        let Some(_permit) = self.guard.try_acquire() else {
            warn!("Recovery requested while a consolidation is running");
            record_counter(CONSOLIDATE_REJECTED, 1);
            log.add(LogType::ConErrorConcurrent, 0);
            return OperationResult::error(log, ResultPayload::None);
        };

        log.add(LogType::ConRecover, 0);
        progress.set_prevent_cancel();

        match self.prefs.cached_consolidate() {
            Ok(true) => {}
            Ok(false) => {
                log.add(LogType::ConErrorBadState, 1);
                return OperationResult::error(log, ResultPayload::None);
            }
            Err(e) => {
                error!("Failed to read consolidation state: {}", e);
                log.add(LogType::ConErrorDb, 1);
                return self.fail(log);
            }
        }

        record_counter(CONSOLIDATE_RECOVERIES, 1);
        let timer = Timer::new(CONSOLIDATE_DURATION);
        let result = self.rebuild(&mut log, 1, progress);
        timer.stop();
        match result {
            Ok(payload) => OperationResult::ok(log, payload),
            Err(()) => self.fail(log),
        }
    }

    /// Startup hook: run [`ConsolidationEngine::recover`] only if a rebuild was cut short
    pub fn resume_if_interrupted(&self, progress: &dyn ProgressReporter) -> Option<OperationResult> {
        match self.prefs.cached_consolidate() {
            Ok(true) => {
                warn!("Found interrupted consolidation, resuming");
                Some(self.recover(progress))
            }
            Ok(false) => None,
            Err(e) => {
                error!("Failed to read consolidation state: {}", e);
                None
            }
        }
    }

    fn fail(&self, log: OperationLog) -> OperationResult {
        self.set_phase(ConsolidationPhase::Error);
        record_counter(CONSOLIDATE_FAILURES, 1);
        OperationResult::error(log, ResultPayload::None)
    }

    fn snapshot(
        &self,
        log: &mut OperationLog,
        indent: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<(), ()> {
        for step in &SNAPSHOT_STEPS {
            self.set_phase(step.phase);
            progress.set_progress(Some(step.message), step.progress, 100);

            let records = self.store.query(step.ring_type, step.filter).map_err(|e| {
                error!(cache = step.cache_name, "Failed to query keyrings: {}", e);
                log.add(LogType::ConErrorDb, indent);
            })?;

            log.add_with(step.save_log, indent, [records.len()]);
            self.cache(step.cache_name)
                .write_cache(records.len(), &records)
                .map_err(|e| {
                    error!(cache = step.cache_name, "Failed to write snapshot cache: {}", e);
                    log.add(step.io_error, indent);
                })?;
        }
        Ok(())
    }

    fn enter_critical(&self, log: &mut OperationLog, indent: usize) -> Result<(), ()> {
        log.add(LogType::ConCriticalIn, indent);
        self.prefs.set_cached_consolidate(true).map_err(|e| {
            error!("Failed to persist consolidation state: {}", e);
            log.add(LogType::ConErrorDb, indent);
        })
    }

    fn rebuild(
        &self,
        log: &mut OperationLog,
        indent: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<ResultPayload, ()> {
        self.set_phase(ConsolidationPhase::CriticalRebuild);

        let updated = self.store.last_updated().map_err(|e| {
            error!("Failed to back up update timestamps: {}", e);
            log.add(LogType::ConErrorDb, indent);
        })?;
        log.add_with(LogType::ConBackupUpdated, indent, [updated.len()]);

        log.add(LogType::ConDbClear, indent);
        progress.set_progress(Some(ProgressMessage::ClearingDatabase), 8, 100);
        let removed = self.store.bulk_delete().map_err(|e| {
            error!("Failed to clear keyring database: {}", e);
            log.add(LogType::ConErrorDb, indent);
        })?;
        info!(removed, "Cleared keyring database");

        // own public keyrings
        self.set_phase(ConsolidationPhase::ReimportOwnPublic);
        let own_public = self
            .reimport_public(
                CONSOLIDATE_OWN_PUBLIC,
                ProgressMessage::ImportingOwnPublic,
                (10, 20),
                LogType::ConReimportOwnPublic,
                log,
                indent,
                progress,
            )
            .map_err(|e| {
                error!("Failed to reimport own public keyrings: {}", e);
                log.add(LogType::ConErrorOwnPublic, indent);
            })?;

        // secret keyrings, inserted with their subkey metadata
        self.set_phase(ConsolidationPhase::ReimportSecret);
        let secret = self.reimport_secret(log, indent, progress).map_err(|e| {
            error!("Failed to reimport secret keyrings: {}", e);
            log.add(LogType::ConErrorSecret, indent);
        })?;

        // foreign public keyrings
        self.set_phase(ConsolidationPhase::ReimportForeignPublic);
        let foreign_public = self
            .reimport_public(
                CONSOLIDATE_FOREIGN_PUBLIC,
                ProgressMessage::ImportingForeignPublic,
                (25, 99),
                LogType::ConReimportForeignPublic,
                log,
                indent,
                progress,
            )
            .map_err(|e| {
                error!("Failed to reimport foreign public keyrings: {}", e);
                log.add(LogType::ConErrorForeignPublic, indent);
            })?;

        let restored = self.store.restore_last_updated(&updated).map_err(|e| {
            error!("Failed to restore update timestamps: {}", e);
            log.add(LogType::ConErrorDb, indent);
        })?;
        log.add_with(LogType::ConRestoreUpdated, indent, [restored]);

        log.add(LogType::ConCriticalOut, indent);
        self.prefs.set_cached_consolidate(false).map_err(|e| {
            error!("Failed to clear consolidation state: {}", e);
            log.add(LogType::ConErrorDb, indent);
        })?;

        self.delete_caches(log, indent);

        progress.set_progress(None, 100, 100);
        log.add(LogType::ConSuccess, indent);
        self.set_phase(ConsolidationPhase::Idle);
        info!(own_public, secret, foreign_public, "Consolidation finished");

        Ok(ResultPayload::Consolidate {
            own_public,
            secret,
            foreign_public,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn reimport_public(
        &self,
        cache_name: &str,
        message: ProgressMessage,
        (from, to): (usize, usize),
        start_log: LogType,
        log: &mut OperationLog,
        indent: usize,
        progress: &dyn ProgressReporter,
    ) -> CacheResult<usize> {
        let reader = self.cache(cache_name).read_cache(false)?;
        let count = reader.size();
        log.add_with(start_log, indent, [count]);

        if count == 0 {
            log.add(LogType::ConReimportPublicSkip, indent + 1);
            return Ok(0);
        }

        progress.set_progress(Some(message), from, 100);
        let scaler = ProgressScaler::new(progress, from, to, 100);
        let result = self.import.serial_import(reader, count, &scaler, None)?;
        if result.bad_keys > 0 {
            warn!(cache = cache_name, bad = result.bad_keys, "Some keyrings failed to reimport");
        }
        log.add_nested(&result.log, indent + 1);
        Ok(count)
    }

    fn reimport_secret(
        &self,
        log: &mut OperationLog,
        indent: usize,
        progress: &dyn ProgressReporter,
    ) -> Result<usize, SecretReimportError> {
        let reader = self.cache(CONSOLIDATE_SECRET).read_cache(false)?;
        let count = reader.size();
        log.add_with(LogType::ConReimportSecret, indent, [count]);

        if count == 0 {
            log.add(LogType::ConReimportSecretSkip, indent + 1);
            return Ok(0);
        }

        progress.set_progress(Some(ProgressMessage::ImportingSecret), 22, 100);
        let records = reader.collect::<CacheResult<Vec<KeyringRecord>>>()?;
        Ok(self.store.bulk_insert(&records)?)
    }

    fn delete_caches(&self, log: &mut OperationLog, indent: usize) {
        let caches = [
            (CONSOLIDATE_OWN_PUBLIC, LogType::ConDeleteOwnPublic, LogType::ConWarnDeleteOwnPublic),
            (CONSOLIDATE_SECRET, LogType::ConDeleteSecret, LogType::ConWarnDeleteSecret),
            (
                CONSOLIDATE_FOREIGN_PUBLIC,
                LogType::ConDeleteForeignPublic,
                LogType::ConWarnDeleteForeignPublic,
            ),
        ];
        for (name, deleted, failed) in caches {
            log.add(deleted, indent);
            if let Err(e) = self.cache(name).delete() {
                warn!(cache = name, "Failed to delete snapshot cache: {}", e);
                log.add(failed, indent + 1);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_import::StoreImporter;
    use crate::core_ops::{NoopProgress, ResultStatus};
    use crate::core_store::MemoryKeyringStore;
    use tempfile::TempDir;

    fn engine(
        temp_dir: &TempDir,
        store: Arc<MemoryKeyringStore>,
    ) -> (ConsolidationEngine, Arc<Preferences>) {
        let prefs = Arc::new(Preferences::load(temp_dir.path().join("prefs.json")).unwrap());
        let engine = ConsolidationEngine::new(
            store.clone(),
            Arc::new(StoreImporter::new(store)),
            prefs.clone(),
            temp_dir.path().join("cache"),
        )
        .with_guard(ConsolidationGuard::new());
        (engine, prefs)
    }

    #[test]
    fn test_empty_store_consolidates() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, prefs) = engine(&temp_dir, Arc::new(MemoryKeyringStore::new()));

        let result = engine.consolidate(&NoopProgress);
        assert!(result.is_ok(), "{}", result.log);
        assert!(result.log.contains(LogType::ConReimportPublicSkip));
        assert!(result.log.contains(LogType::ConReimportSecretSkip));
        assert!(!prefs.cached_consolidate().unwrap());
        assert_eq!(engine.phase(), ConsolidationPhase::Idle);
    }

    #[test]
    fn test_recover_without_flag_is_bad_state() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _prefs) = engine(&temp_dir, Arc::new(MemoryKeyringStore::new()));

        let result = engine.recover(&NoopProgress);
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.log.contains(LogType::ConErrorBadState));
        assert!(engine.resume_if_interrupted(&NoopProgress).is_none());
    }

    #[test]
    fn test_secret_reimport_keeps_error_source() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _prefs) = engine(&temp_dir, Arc::new(MemoryKeyringStore::new()));
        let mut log = OperationLog::new();

        let err = engine.reimport_secret(&mut log, 0, &NoopProgress).unwrap_err();
        assert!(matches!(err, SecretReimportError::Cache(CacheError::NotFound(_))));
        assert!(!log.contains(LogType::ConReimportSecret));
    }

    #[test]
    fn test_held_guard_rejects() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryKeyringStore::with_records([KeyringRecord::public(
            1,
            b"k".to_vec(),
        )]));
        let guard = ConsolidationGuard::new();
        let (engine, _prefs) = engine(&temp_dir, store.clone());
        let engine = engine.with_guard(guard.clone());

        let _held = guard.try_acquire().unwrap();
        let result = engine.consolidate(&NoopProgress);
        assert_eq!(result.status, ResultStatus::Error);
        assert!(result.log.contains(LogType::ConErrorConcurrent));
        assert_eq!(store.total_rows().unwrap(), 1);
        assert!(!engine.cache_dir().join(CONSOLIDATE_OWN_PUBLIC).exists());
    }
}
