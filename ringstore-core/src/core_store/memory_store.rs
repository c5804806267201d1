//! In-memory keyring store

use super::{handle_poison, KeyringStore, RingFilter, StoreResult};
use crate::core_keyring::{KeyringRecord, MasterKeyId, RingType, UpdatedKey};
use std::collections::BTreeMap;
use std::sync::RwLock;

/// Keyring store backed by ordered maps; used by tests and tooling
#[derive(Default)]
pub struct MemoryKeyringStore {
    rings: RwLock<BTreeMap<(RingType, MasterKeyId), KeyringRecord>>,
    updated: RwLock<BTreeMap<MasterKeyId, UpdatedKey>>,
}

impl MemoryKeyringStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store pre-populated with `records`
    pub fn with_records(records: impl IntoIterator<Item = KeyringRecord>) -> Self {
        let store = Self::new();
        if let Ok(mut rings) = store.rings.write() {
            for record in records {
                rings.insert((record.ring_type, record.master_key_id), record);
            }
        }
        store
    }
}

impl KeyringStore for MemoryKeyringStore {
    fn query(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<Vec<KeyringRecord>> {
        let rings = self.rings.read().map_err(handle_poison)?;
        Ok(rings
            .range((ring_type, MasterKeyId::MIN)..=(ring_type, MasterKeyId::MAX))
            .map(|(_, record)| record)
            .filter(|record| filter.matches(record))
            .cloned()
            .collect())
    }

    fn get(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
    ) -> StoreResult<Option<KeyringRecord>> {
        let rings = self.rings.read().map_err(handle_poison)?;
        Ok(rings.get(&(ring_type, master_key_id)).cloned())
    }

    fn upsert(&self, record: &KeyringRecord) -> StoreResult<bool> {
        let mut rings = self.rings.write().map_err(handle_poison)?;
        Ok(rings
            .insert((record.ring_type, record.master_key_id), record.clone())
            .is_none())
    }

    fn bulk_insert(&self, records: &[KeyringRecord]) -> StoreResult<usize> {
        let mut rings = self.rings.write().map_err(handle_poison)?;
        for record in records {
            rings.insert((record.ring_type, record.master_key_id), record.clone());
        }
        Ok(records.len())
    }

    fn bulk_delete(&self) -> StoreResult<usize> {
        let mut rings = self.rings.write().map_err(handle_poison)?;
        let mut updated = self.updated.write().map_err(handle_poison)?;
        let removed = rings.len();
        rings.clear();
        updated.clear();
        Ok(removed)
    }

    fn update_ring_data(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
        ring_data: &[u8],
    ) -> StoreResult<usize> {
        let mut rings = self.rings.write().map_err(handle_poison)?;
        match rings.get_mut(&(ring_type, master_key_id)) {
            Some(record) => {
                record.ring_data = ring_data.to_vec();
                Ok(1)
            }
            None => Ok(0),
        }
    }

    fn last_updated(&self) -> StoreResult<Vec<UpdatedKey>> {
        let updated = self.updated.read().map_err(handle_poison)?;
        Ok(updated.values().cloned().collect())
    }

    fn set_last_updated(&self, entry: &UpdatedKey) -> StoreResult<()> {
        let mut updated = self.updated.write().map_err(handle_poison)?;
        updated.insert(entry.master_key_id, entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MemoryKeyringStore {
        MemoryKeyringStore::with_records(vec![
            KeyringRecord::public(3, b"p3".to_vec()),
            KeyringRecord::public(1, b"p1".to_vec()).with_has_any_secret(true),
            KeyringRecord::secret(1, b"s1".to_vec(), vec![]).with_has_any_secret(true),
        ])
    }

    #[test]
    fn test_query_filters_and_orders() {
        let store = sample();
        let ids: Vec<_> = store
            .query(RingType::Public, RingFilter::All)
            .unwrap()
            .iter()
            .map(|r| r.master_key_id)
            .collect();
        assert_eq!(ids, vec![1, 3]);

        assert_eq!(store.count(RingType::Public, RingFilter::HasAnySecret).unwrap(), 1);
        assert_eq!(store.count(RingType::Public, RingFilter::NoSecret).unwrap(), 1);
        assert_eq!(store.count(RingType::Secret, RingFilter::All).unwrap(), 1);
        assert_eq!(store.total_rows().unwrap(), 3);
    }

    #[test]
    fn test_update_missing_row_affects_nothing() {
        let store = sample();
        assert_eq!(store.update_ring_data(1, RingType::Secret, b"new").unwrap(), 1);
        assert_eq!(store.update_ring_data(9, RingType::Secret, b"new").unwrap(), 0);
        assert_eq!(store.get(1, RingType::Secret).unwrap().unwrap().ring_data, b"new");
    }

    #[test]
    fn test_bulk_delete_clears_auxiliary_rows() {
        let store = sample();
        store
            .set_last_updated(&UpdatedKey {
                master_key_id: 1,
                last_updated: Some(100),
                seen_on_keyservers: Some(true),
            })
            .unwrap();

        assert_eq!(store.bulk_delete().unwrap(), 3);
        assert_eq!(store.total_rows().unwrap(), 0);
        assert!(store.last_updated().unwrap().is_empty());
    }

    #[test]
    fn test_upsert_reports_new_rows() {
        let store = MemoryKeyringStore::new();
        let record = KeyringRecord::public(7, vec![1]);
        assert!(store.upsert(&record).unwrap());
        assert!(!store.upsert(&record).unwrap());
    }
}
