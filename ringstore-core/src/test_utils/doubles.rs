//! Test doubles for the engine collaborators

use crate::core_crypto::Passphrase;
use crate::core_keyring::{KeyringRecord, MasterKeyId, RingType, SubKeyId, UpdatedKey};
use crate::core_migrate::{PassphrasePrompt, PassphraseRequest, PromptResponse};
use crate::core_ops::{ProgressMessage, ProgressReporter};
use crate::core_store::{KeyringStore, RingFilter, StoreError, StoreResult};
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::{Arc, Mutex, PoisonError};

/// What a [`ScriptedPrompt`] was asked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub master_key_id: MasterKeyId,
    pub sub_key_id: SubKeyId,
    pub passphrase_to_try: Option<Passphrase>,
    pub attempt: u32,
}

/// Prompt that answers from a fixed script, then cancels
#[derive(Debug, Default)]
pub struct ScriptedPrompt {
    responses: VecDeque<PromptResponse>,
    accept_trial: bool,
    pub seen: Vec<SeenRequest>,
}

impl ScriptedPrompt {
    pub fn new<I, P>(passphrases: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Passphrase>,
    {
        Self {
            responses: passphrases
                .into_iter()
                .map(|p| PromptResponse::Passphrase(p.into()))
                .collect(),
            ..Self::default()
        }
    }

    /// Answer with the offered pre-fill whenever there is one, without
    /// consuming a scripted response
    pub fn accepting_trial(mut self) -> Self {
        self.accept_trial = true;
        self
    }

    pub fn then_cancel(mut self) -> Self {
        self.responses.push_back(PromptResponse::Cancelled);
        self
    }

    pub fn remaining(&self) -> usize {
        self.responses.len()
    }
}

impl PassphrasePrompt for ScriptedPrompt {
    fn request(&mut self, request: &PassphraseRequest<'_>) -> PromptResponse {
        self.seen.push(SeenRequest {
            master_key_id: request.master_key_id,
            sub_key_id: request.sub_key_id,
            passphrase_to_try: request.passphrase_to_try.cloned(),
            attempt: request.attempt,
        });
        if self.accept_trial {
            if let Some(trial) = request.passphrase_to_try {
                return PromptResponse::Passphrase(trial.clone());
            }
        }
        self.responses.pop_front().unwrap_or(PromptResponse::Cancelled)
    }
}

/// Progress reporter that keeps every update
#[derive(Debug, Default)]
pub struct RecordingProgress {
    updates: Mutex<Vec<(Option<ProgressMessage>, usize, usize)>>,
    prevent_cancel: AtomicBool,
}

impl RecordingProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn updates(&self) -> Vec<(Option<ProgressMessage>, usize, usize)> {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn messages(&self) -> Vec<ProgressMessage> {
        self.updates().into_iter().filter_map(|(m, _, _)| m).collect()
    }

    pub fn cancel_prevented(&self) -> bool {
        self.prevent_cancel.load(Ordering::SeqCst)
    }
}

impl ProgressReporter for RecordingProgress {
    fn set_progress(&self, message: Option<ProgressMessage>, current: usize, max: usize) {
        self.updates
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((message, current, max));
    }

    fn set_prevent_cancel(&self) {
        self.prevent_cancel.store(true, Ordering::SeqCst);
    }
}

/// Hand-off used to hold a store call until the test releases it
pub struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

/// Test-side ends of a [`Gate`]
pub struct GateControl {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

impl Gate {
    pub fn pair() -> (Arc<Gate>, GateControl) {
        let (entered_tx, entered_rx) = std::sync::mpsc::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel();
        let gate = Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        };
        (
            Arc::new(gate),
            GateControl {
                entered: entered_rx,
                release: release_tx,
            },
        )
    }

    fn pass(&self) {
        let _ = self
            .entered
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .send(());
        let _ = self
            .release
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
    }
}

/// Store wrapper that injects failures into an inner store
pub struct FaultyStore {
    inner: Arc<dyn KeyringStore>,
    vanished: Mutex<HashSet<MasterKeyId>>,
    updates_before_failure: Option<usize>,
    updates: AtomicUsize,
    fail_bulk_insert: AtomicBool,
    bulk_delete_gate: Option<Arc<Gate>>,
}

impl FaultyStore {
    pub fn new(inner: Arc<dyn KeyringStore>) -> Self {
        Self {
            inner,
            vanished: Mutex::new(HashSet::new()),
            updates_before_failure: None,
            updates: AtomicUsize::new(0),
            fail_bulk_insert: AtomicBool::new(false),
            bulk_delete_gate: None,
        }
    }

    /// `update_ring_data` for this key reports zero rows changed
    pub fn vanish(self, master_key_id: MasterKeyId) -> Self {
        self.vanished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(master_key_id);
        self
    }

    /// Let `n` blob updates through, then fail every further one
    pub fn fail_updates_after(mut self, n: usize) -> Self {
        self.updates_before_failure = Some(n);
        self
    }

    /// Next `bulk_insert` fails; later ones pass
    pub fn fail_next_bulk_insert(self) -> Self {
        self.fail_bulk_insert.store(true, Ordering::SeqCst);
        self
    }

    pub fn gate_bulk_delete(mut self, gate: Arc<Gate>) -> Self {
        self.bulk_delete_gate = Some(gate);
        self
    }
}

impl KeyringStore for FaultyStore {
    fn query(&self, ring_type: RingType, filter: RingFilter) -> StoreResult<Vec<KeyringRecord>> {
        self.inner.query(ring_type, filter)
    }

    fn get(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
    ) -> StoreResult<Option<KeyringRecord>> {
        self.inner.get(master_key_id, ring_type)
    }

    fn upsert(&self, record: &KeyringRecord) -> StoreResult<bool> {
        self.inner.upsert(record)
    }

    fn bulk_insert(&self, records: &[KeyringRecord]) -> StoreResult<usize> {
        if self.fail_bulk_insert.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Database("injected bulk insert failure".to_string()));
        }
        self.inner.bulk_insert(records)
    }

    fn bulk_delete(&self) -> StoreResult<usize> {
        if let Some(gate) = &self.bulk_delete_gate {
            gate.pass();
        }
        self.inner.bulk_delete()
    }

    fn update_ring_data(
        &self,
        master_key_id: MasterKeyId,
        ring_type: RingType,
        ring_data: &[u8],
    ) -> StoreResult<usize> {
        if self
            .vanished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&master_key_id)
        {
            return Ok(0);
        }
        if let Some(limit) = self.updates_before_failure {
            if self.updates.fetch_add(1, Ordering::SeqCst) >= limit {
                return Err(StoreError::Database("injected update failure".to_string()));
            }
        }
        self.inner.update_ring_data(master_key_id, ring_type, ring_data)
    }

    fn last_updated(&self) -> StoreResult<Vec<UpdatedKey>> {
        self.inner.last_updated()
    }

    fn set_last_updated(&self, entry: &UpdatedKey) -> StoreResult<()> {
        self.inner.set_last_updated(entry)
    }
}
