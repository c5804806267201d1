//! Serial, parallel and cached imports into a SQLite store

use ringstore_core::core_import::{ImportService, KeyringImporter, StoreImporter};
use ringstore_core::core_keyring::{KeyringRecord, RingType};
use ringstore_core::core_ops::{
    CancelToken, ImportStatus, LogType, NoopProgress, ProgressReporter,
};
use ringstore_core::core_store::{KeyringStore, RingFilter, SqliteKeyringStore};
use ringstore_core::test_utils::{
    assert_logged, fast_encryptor, foreign_public, RecordingProgress, SecretKeyringBuilder,
};
use std::sync::Arc;
use tempfile::TempDir;

fn sqlite_store(temp_dir: &TempDir) -> Arc<SqliteKeyringStore> {
    Arc::new(SqliteKeyringStore::open(temp_dir.path().join("keyrings.db"), 8).unwrap())
}

fn service(store: Arc<SqliteKeyringStore>, workers: usize) -> ImportService {
    let importer: Arc<dyn KeyringImporter> = Arc::new(StoreImporter::new(store));
    ImportService::new(importer, workers)
}

fn foreign_batch(count: u64) -> Vec<KeyringRecord> {
    (1..=count).map(|id| foreign_public(0x1000 + id)).collect()
}

#[tokio::test]
async fn test_parallel_import_then_reimport() {
    let temp_dir = TempDir::new().unwrap();
    let store = sqlite_store(&temp_dir);
    let service = service(store.clone(), 8);
    let records = foreign_batch(40);

    let progress = Arc::new(RecordingProgress::new());
    let reporter: Arc<dyn ProgressReporter> = progress.clone();
    let first = service
        .parallel_import(records.clone(), reporter, CancelToken::new())
        .await;

    assert_eq!(first.new_keys, 40);
    assert_eq!(first.bad_keys, 0);
    assert!(first.status.contains(ImportStatus::OK_NEWKEYS));
    assert_eq!(first.imported_master_key_ids.len(), 40);
    assert_logged(&first.log, LogType::ImSuccess);
    assert_eq!(store.count(RingType::Public, RingFilter::All).unwrap(), 40);
    assert_eq!(progress.updates().iter().map(|u| u.1).max(), Some(40));

    let second = service
        .parallel_import(records, Arc::new(NoopProgress), CancelToken::new())
        .await;
    assert_eq!(second.new_keys, 0);
    assert_eq!(second.updated_keys, 40);
    assert!(second.status.contains(ImportStatus::OK_UPDATED));
    assert_eq!(store.count(RingType::Public, RingFilter::All).unwrap(), 40);
}

#[tokio::test]
async fn test_cancelled_parallel_import_imports_nothing() {
    let temp_dir = TempDir::new().unwrap();
    let store = sqlite_store(&temp_dir);
    let service = service(store.clone(), 4);
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = service
        .parallel_import(foreign_batch(10), Arc::new(NoopProgress), cancel)
        .await;

    assert!(result.is_cancelled());
    assert_logged(&result.log, LogType::ImCancelled);
    assert_eq!(store.total_rows().unwrap(), 0);
}

#[test]
fn test_queued_import_with_secret_keyrings() {
    let temp_dir = TempDir::new().unwrap();
    let store = sqlite_store(&temp_dir);
    let service = service(store.clone(), 2);
    let cache_dir = temp_dir.path().join("cache");

    let own = SecretKeyringBuilder::new(0xA1)
        .subkey(1, "p1")
        .stripped_subkey(2)
        .build(&fast_encryptor());
    let mut records = own.records().to_vec();
    records.push(foreign_public(0xF1));
    records.push(KeyringRecord::public(0xBAD, Vec::new()));

    assert_eq!(ImportService::queue_for_import(&cache_dir, &records).unwrap(), 4);
    let result = service
        .import_from_cache(&cache_dir, &NoopProgress, None)
        .unwrap();

    assert_eq!(result.new_keys, 3);
    assert_eq!(result.secret_keys, 1);
    assert_eq!(result.bad_keys, 1);
    assert!(result.status.contains(ImportStatus::WITH_ERRORS));
    assert_logged(&result.log, LogType::ImErrorEmpty);

    let stored = store.get(0xA1, RingType::Secret).unwrap().expect("secret row");
    assert_eq!(stored, own.secret);
    assert!(!cache_dir.join("key_import.pcl").exists());
}
