//! Live keyring store
//!
//! The store is the system of record the engines read from and rebuild.
//! [`KeyringStore`] is the seam; two backends ship with the crate:
//! an in-memory map and a pooled SQLite database.

mod errors;
mod memory_store;
mod preferences;
mod sql_store;

pub use errors::{StoreError, StoreResult};
pub use memory_store::MemoryKeyringStore;
pub use preferences::{MasterKeyParams, PreferenceFlags, Preferences};
pub use sql_store::SqliteKeyringStore;

pub(crate) use errors::handle_poison;

use crate::core_keyring::{KeyringRecord, MasterKeyId, RingType, UpdatedKey};

/// Row selection on top of the ring type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RingFilter {
    All,
    /// Rows flagged as having usable secret material
    HasAnySecret,
    /// Rows without usable secret material
    NoSecret,
}

impl RingFilter {
    pub fn matches(&self, record: &KeyringRecord) -> bool {
        match self {
            RingFilter::All => true,
            RingFilter::HasAnySecret => record.has_any_secret,
            RingFilter::NoSecret => !record.has_any_secret,
        }
    }
}

/// Storage primitives the engines need.
///
/// Implementations are blocking; callers run them on worker threads.
/// Query results are ordered by master key id.
pub trait KeyringStore: Send + Sync {
    fn query(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<Vec<KeyringRecord>>;

    fn count(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<usize> {
        Ok(self.query(ring_type, filter)?.len())
    }

    fn get(&self, master_key_id: MasterKeyId, ring_type: RingType)
        -> StoreResult<Option<KeyringRecord>>;

    /// Insert or replace one row. Returns true if the row did not exist.
    fn upsert(&self, record: &KeyringRecord) -> StoreResult<bool>;

    /// Insert rows in one transaction, replacing existing ones
    fn bulk_insert(&self, records: &[KeyringRecord]) -> StoreResult<usize>;

    /// Remove every keyring row and all auxiliary rows. Returns keyring rows removed.
    fn bulk_delete(&self) -> StoreResult<usize>;

    /// Overwrite the blob of one row. Returns the number of rows changed.
    fn update_ring_data(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
        ring_data: &[u8],
    ) -> StoreResult<usize>;

    fn last_updated(&self) -> StoreResult<Vec<UpdatedKey>>;

    fn set_last_updated(&self, entry: &UpdatedKey) -> StoreResult<()>;

    /// Write back rows captured by [`KeyringStore::last_updated`]
    fn restore_last_updated(&self, entries: &[UpdatedKey]) -> StoreResult<usize> {
        for entry in entries {
            self.set_last_updated(entry)?;
        }
        Ok(entries.len())
    }

    /// Total keyring rows of both types
    fn total_rows(&self) -> StoreResult<usize> {
        Ok(self.count(RingType::Public, RingFilter::All)?
            + self.count(RingType::Secret, RingFilter::All)?)
    }
}
