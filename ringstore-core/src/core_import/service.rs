/*
    service.rs - Serial and parallel keyring import

    Serial import walks a record source in order. Parallel import runs one
    task per distinct master key id on the blocking pool; a task is only
    submitted once a worker permit is free, so the submitter waits instead
    of queueing unbounded work. Records sharing a master key id stay in one
    task so their relative order is kept.
*/

use super::{ImportAccumulator, KeyringImporter};
use crate::core_cache::{CacheResult, SnapshotCache, KEY_IMPORT};
use crate::core_keyring::{KeyringRecord, MasterKeyId};
use crate::core_ops::{
    CancelToken, ImportKeyResult, ImportStatus, LogType, OperationLog, ProgressMessage,
    ProgressReporter,
};
use crate::metrics::{Timer, IMPORT_DURATION};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

pub struct ImportService {
    importer: Arc<dyn KeyringImporter>,
    max_workers: usize,
}

impl ImportService {
    pub fn new(importer: Arc<dyn KeyringImporter>, max_workers: usize) -> Self {
        Self {
            importer,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Import records one by one, checking `cancel` between keyrings.
    ///
    /// A failing source aborts the import with the source's error; failures
    /// of individual keyrings are counted as bad keys.
    pub fn serial_import<I>(
        &self,
        records: I,
        count: usize,
        progress: &dyn ProgressReporter,
        cancel: Option<&CancelToken>,
    ) -> CacheResult<ImportKeyResult>
    where
        I: IntoIterator<Item = CacheResult<KeyringRecord>>,
    {
        let timer = Timer::new(IMPORT_DURATION);
        let accumulator = ImportAccumulator::new(count);
        progress.set_progress(Some(ProgressMessage::Importing), 0, count);

        let mut cancelled = false;
        for (position, record) in records.into_iter().enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(imported = position, total = count, "Import cancelled");
                cancelled = true;
                break;
            }
            let result = self.importer.import_keyring(&record?);
            let done = accumulator.accumulate(result);
            progress.set_progress(None, done, count);
        }

        timer.stop();
        Ok(finish(count, accumulator.consolidated_result(), cancelled))
    }

    /// Import on the blocking pool, at most `max_workers` keyrings at a time
    pub async fn parallel_import(
        &self,
        records: Vec<KeyringRecord>,
        progress: Arc<dyn ProgressReporter>,
        cancel: CancelToken,
    ) -> ImportKeyResult {
        let timer = Timer::new(IMPORT_DURATION);
        let total = records.len();
        let accumulator = Arc::new(ImportAccumulator::new(total));
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        progress.set_progress(Some(ProgressMessage::Importing), 0, total);

        let mut handles = Vec::new();
        for group in group_by_master_key(records) {
            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => {
                    error!("Import worker pool closed: {}", e);
                    break;
                }
            };

            let importer = self.importer.clone();
            let accumulator = accumulator.clone();
            let progress = progress.clone();
            let cancel = cancel.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let _permit = permit;
                for record in group {
                    let result = if cancel.is_cancelled() {
                        cancelled_result()
                    } else {
                        importer.import_keyring(&record)
                    };
                    let done = accumulator.accumulate(result);
                    progress.set_progress(None, done, accumulator.total_keys());
                }
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Import worker failed: {}", e);
            }
        }

        if !accumulator.is_finished() {
            warn!(
                imported = accumulator.imported_keys(),
                total, "Parallel import ended before every keyring was processed"
            );
        }

        timer.stop();
        finish(total, accumulator.consolidated_result(), cancel.is_cancelled())
    }

    /// Import the queued `key_import.pcl` cache and delete it afterwards
    pub fn import_from_cache(
        &self,
        cache_dir: &Path,
        progress: &dyn ProgressReporter,
        cancel: Option<&CancelToken>,
    ) -> CacheResult<ImportKeyResult> {
        let cache = SnapshotCache::<KeyringRecord>::new(cache_dir, KEY_IMPORT);
        let reader = cache.read_cache(false)?;
        let count = reader.size();
        let result = self.serial_import(reader, count, progress, cancel)?;
        if !result.is_cancelled() {
            cache.delete()?;
        }
        Ok(result)
    }

    /// Queue records in `key_import.pcl` for a later [`ImportService::import_from_cache`]
    pub fn queue_for_import(cache_dir: &Path, records: &[KeyringRecord]) -> CacheResult<usize> {
        SnapshotCache::<KeyringRecord>::new(cache_dir, KEY_IMPORT).write_cache(records.len(), records)
    }
}

fn cancelled_result() -> ImportKeyResult {
    ImportKeyResult {
        status: ImportStatus::CANCELLED,
        ..Default::default()
    }
}

/// Wrap the merged per-keyring logs with start and end entries
fn finish(count: usize, mut merged: ImportKeyResult, cancelled: bool) -> ImportKeyResult {
    let mut log = OperationLog::new();
    log.add_with(LogType::ImStart, 0, [count]);
    log.add_nested(&merged.log, 1);
    if cancelled {
        log.add(LogType::ImCancelled, 0);
        merged.status |= ImportStatus::CANCELLED;
    } else {
        log.add(LogType::ImSuccess, 0);
    }
    merged.log = log;
    merged
}

/// Group records by master key id, groups and members in first-seen order
fn group_by_master_key(records: Vec<KeyringRecord>) -> Vec<Vec<KeyringRecord>> {
    let mut index: HashMap<MasterKeyId, usize> = HashMap::new();
    let mut groups: Vec<Vec<KeyringRecord>> = Vec::new();
    for record in records {
        match index.get(&record.master_key_id) {
            Some(&slot) => groups[slot].push(record),
            None => {
                index.insert(record.master_key_id, groups.len());
                groups.push(vec![record]);
            }
        }
    }
    groups
}
