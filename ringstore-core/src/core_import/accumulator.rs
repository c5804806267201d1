//! Merges single-keyring import results
//!
//! Workers call [`ImportAccumulator::accumulate`] concurrently; every field
//! is updated under one lock so the counter and the merged totals never
//! disagree.

use crate::core_keyring::MasterKeyId;
use crate::core_ops::{ImportKeyResult, ImportStatus, OperationLog};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct AccumulatorState {
    imported_keys: usize,
    new_keys: usize,
    updated_keys: usize,
    bad_keys: usize,
    secret_keys: usize,
    log: OperationLog,
    master_key_ids: Vec<MasterKeyId>,
    seen_ids: HashSet<MasterKeyId>,
    cancelled: bool,
}

pub struct ImportAccumulator {
    total_keys: usize,
    state: Mutex<AccumulatorState>,
}

impl ImportAccumulator {
    pub fn new(total_keys: usize) -> Self {
        Self {
            total_keys,
            state: Mutex::new(AccumulatorState::default()),
        }
    }

    fn state(&self) -> MutexGuard<'_, AccumulatorState> {
        // Counters stay meaningful even if a worker panicked mid-update.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn total_keys(&self) -> usize {
        self.total_keys
    }

    pub fn imported_keys(&self) -> usize {
        self.state().imported_keys
    }

    /// Fold in one result. Returns the number of results seen so far.
    pub fn accumulate(&self, result: ImportKeyResult) -> usize {
        let mut state = self.state();
        state.imported_keys += 1;
        state.new_keys += result.new_keys;
        state.updated_keys += result.updated_keys;
        state.bad_keys += result.bad_keys;
        state.secret_keys += result.secret_keys;
        state.log.append(result.log);
        for id in result.imported_master_key_ids {
            if state.seen_ids.insert(id) {
                state.master_key_ids.push(id);
            }
        }
        state.cancelled |= result.status.contains(ImportStatus::CANCELLED);
        state.imported_keys
    }

    pub fn is_finished(&self) -> bool {
        self.state().imported_keys == self.total_keys
    }

    /// Merged result of everything accumulated so far
    pub fn consolidated_result(&self) -> ImportKeyResult {
        let state = self.state();
        let mut result = ImportKeyResult {
            status: ImportStatus::empty(),
            log: state.log.clone(),
            new_keys: state.new_keys,
            updated_keys: state.updated_keys,
            bad_keys: state.bad_keys,
            secret_keys: state.secret_keys,
            imported_master_key_ids: state.master_key_ids.clone(),
        };
        let base = if state.cancelled {
            ImportStatus::CANCELLED
        } else {
            ImportStatus::empty()
        };
        result.status = result.derive_status(base);
        result
    }
}
