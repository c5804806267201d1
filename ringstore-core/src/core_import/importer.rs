/*
    importer.rs - Single keyring import

    The packet level work (parsing, canonicalization, merging with the
    existing ring) belongs to the OpenPGP layer behind KeyringImporter.
    StoreImporter is the plain implementation: it writes the record as is.
*/

use crate::core_keyring::{format_key_id, KeyringRecord, RingType};
use crate::core_ops::{ImportKeyResult, ImportStatus, LogType, OperationLog};
use crate::core_store::KeyringStore;
use crate::metrics::{record_counter, IMPORT_BAD, IMPORT_NEW, IMPORT_UPDATED};
use std::sync::Arc;
use tracing::{debug, warn};

/// Imports one keyring into the live store
pub trait KeyringImporter: Send + Sync {
    fn import_keyring(&self, record: &KeyringRecord) -> ImportKeyResult;
}

pub struct StoreImporter {
    store: Arc<dyn KeyringStore>,
}

impl StoreImporter {
    pub fn new(store: Arc<dyn KeyringStore>) -> Self {
        Self { store }
    }
}

impl KeyringImporter for StoreImporter {
    fn import_keyring(&self, record: &KeyringRecord) -> ImportKeyResult {
        let key_id = format_key_id(record.master_key_id);
        let mut result = ImportKeyResult::default();
        let mut log = OperationLog::new();
        log.add_with(LogType::ImKeyring, 0, [&key_id]);

        if record.ring_data.is_empty() {
            log.add_with(LogType::ImErrorEmpty, 1, [&key_id]);
            result.bad_keys = 1;
        } else {
            match self.store.upsert(record) {
                Ok(inserted) => {
                    let log_type = if inserted {
                        result.new_keys = 1;
                        LogType::ImInserted
                    } else {
                        result.updated_keys = 1;
                        LogType::ImUpdated
                    };
                    log.add_with(log_type, 1, [record.ring_type.as_str(), key_id.as_str()]);

                    if record.ring_type == RingType::Secret && record.has_any_secret {
                        result.secret_keys = 1;
                        log.add_with(LogType::ImSecret, 1, [&key_id]);
                    }
                    result.imported_master_key_ids.push(record.master_key_id);
                    debug!(key_id = %key_id, ring_type = %record.ring_type, inserted, "Imported keyring");
                }
                Err(e) => {
                    warn!(key_id = %key_id, "Failed to import keyring: {}", e);
                    log.add_with(LogType::ImErrorDb, 1, [&key_id]);
                    result.bad_keys = 1;
                }
            }
        }

        record_counter(IMPORT_NEW, result.new_keys as u64);
        record_counter(IMPORT_UPDATED, result.updated_keys as u64);
        record_counter(IMPORT_BAD, result.bad_keys as u64);

        result.log = log;
        result.status = result.derive_status(ImportStatus::empty());
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_store::{MemoryKeyringStore, RingFilter};

    #[test]
    fn test_insert_then_update() {
        let store = Arc::new(MemoryKeyringStore::new());
        let importer = StoreImporter::new(store.clone());

        let first = importer.import_keyring(&KeyringRecord::public(7, b"v1".to_vec()));
        assert_eq!(first.new_keys, 1);
        assert_eq!(first.imported_master_key_ids, vec![7]);
        assert!(first.status.contains(ImportStatus::OK_NEWKEYS));

        let second = importer.import_keyring(&KeyringRecord::public(7, b"v2".to_vec()));
        assert_eq!(second.updated_keys, 1);
        assert!(second.status.contains(ImportStatus::OK_UPDATED));

        let stored = store.get(7, RingType::Public).unwrap().unwrap();
        assert_eq!(stored.ring_data, b"v2");
        assert_eq!(store.count(RingType::Public, RingFilter::All).unwrap(), 1);
    }

    #[test]
    fn test_empty_ring_is_bad() {
        let store = Arc::new(MemoryKeyringStore::new());
        let importer = StoreImporter::new(store.clone());

        let result = importer.import_keyring(&KeyringRecord::public(9, Vec::new()));
        assert_eq!(result.bad_keys, 1);
        assert!(result.is_error());
        assert!(result.log.contains(LogType::ImErrorEmpty));
        assert!(store.get(9, RingType::Public).unwrap().is_none());
    }
}
