/*
    engine.rs - Secret keyring migration

    Forward migration runs in three steps:
    1. create_secret_keyring_cache: snapshot every secret keyring with
       usable material into migrate_secret.pcl, set "partially migrated"
    2. collect_passphrases: walk the snapshot and resolve a passphrase for
       every sealed subkey, verifying each one against the cached blob
    3. migrate: unseal each cached keyring and reseal it under the master
       key, overwriting one row at a time

    revert puts the cached blobs back verbatim. migrate_back reverses a
    finished migration using the live rows.
*/

use super::prompt::{PassphrasePrompt, PassphraseRequest, PromptResponse};
use crate::core_cache::{SnapshotCache, MIGRATE_SECRET};
use crate::core_crypto::{ByteArrayEncryptor, EncryptorError, KdfParams, MasterKey, Passphrase};
use crate::core_keyring::{
    format_key_id, ContainerError, KeyringPassphrases, KeyringRecord, MasterKeyId,
    ProtectionScheme, RingType, SecretKeyType, SecretRingContainer, SecretRingMaterial, SubKeyId,
};
use crate::core_ops::{
    CancelToken, LogType, OperationLog, OperationResult, ProgressMessage, ProgressReporter,
    ResultPayload, ResultStatus,
};
use crate::core_store::{KeyringStore, Preferences, RingFilter, StoreError};
use crate::metrics::{
    record_counter, Timer, MIGRATE_DB_EXCEPTIONS, MIGRATE_DURATION, MIGRATE_FAILURES,
    MIGRATE_ROWS,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, info_span, warn};

/// Why a single keyring could not be rewritten
#[derive(Debug, Error)]
enum RowError {
    #[error("passphrase rejected")]
    BadPassphrase,

    #[error(transparent)]
    Container(ContainerError),

    #[error("no master passphrase is set")]
    NoMasterKey,

    #[error("unknown keyring encoding")]
    UnknownEncoding,

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<ContainerError> for RowError {
    fn from(err: ContainerError) -> Self {
        match err {
            ContainerError::Encryptor(EncryptorError::IncorrectPassphrase)
            | ContainerError::MissingPassphrase(_) => RowError::BadPassphrase,
            other => RowError::Container(other),
        }
    }
}

impl From<EncryptorError> for RowError {
    fn from(err: EncryptorError) -> Self {
        RowError::from(ContainerError::from(err))
    }
}

/// Outcome of [`MigrationEngine::collect_passphrases`]
#[derive(Debug)]
pub struct PassphraseCollection {
    pub status: ResultStatus,
    pub log: OperationLog,
    /// One entry per cached keyring, in cache order
    pub passphrases: Vec<KeyringPassphrases>,
}

impl PassphraseCollection {
    pub fn is_complete(&self) -> bool {
        self.status == ResultStatus::Ok
    }
}

pub struct MigrationEngine {
    store: Arc<dyn KeyringStore>,
    prefs: Arc<Preferences>,
    cache_dir: PathBuf,
    encryptor: ByteArrayEncryptor,
}

impl MigrationEngine {
    pub fn new(
        store: Arc<dyn KeyringStore>,
        prefs: Arc<Preferences>,
        cache_dir: impl Into<PathBuf>,
        kdf: KdfParams,
    ) -> Self {
        Self {
            store,
            prefs,
            cache_dir: cache_dir.into(),
            encryptor: ByteArrayEncryptor::new(kdf),
        }
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn cache(&self) -> SnapshotCache<KeyringRecord> {
        SnapshotCache::new(&self.cache_dir, MIGRATE_SECRET)
    }

    /// A pre-migration snapshot is on disk
    pub fn has_cache(&self) -> bool {
        self.cache().exists()
    }

    /// Master key for `passphrase`, creating the salt on first use
    fn derive_master_key(&self, passphrase: &Passphrase) -> Result<MasterKey, RowError> {
        let params = self
            .prefs
            .master_key_params_or_init(self.encryptor.params())?;
        let salt = params.salt()?;
        Ok(MasterKey::derive(passphrase, &salt, params.kdf)?)
    }

    /// Master key for `passphrase` from the stored salt; fails if none was ever set
    fn existing_master_key(&self, passphrase: &Passphrase) -> Result<MasterKey, RowError> {
        let params = self
            .prefs
            .flags()?
            .master_key
            .ok_or(RowError::NoMasterKey)?;
        let salt = params.salt()?;
        Ok(MasterKey::derive(passphrase, &salt, params.kdf)?)
    }

    /// Snapshot all secret keyrings that carry secret material
    pub fn create_secret_keyring_cache(&self, progress: &dyn ProgressReporter) -> OperationResult {
        let _span = info_span!("create_secret_cache").entered();
        let mut log = OperationLog::new();
        log.add(LogType::CcStart, 0);
        progress.set_prevent_cancel();
        progress.set_progress(Some(ProgressMessage::CachingSecret), 0, 100);

        let records = match self.store.query(RingType::Secret, RingFilter::HasAnySecret) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to query secret keyrings: {}", e);
                log.add(LogType::CcErrorDb, 1);
                return OperationResult::error(log, ResultPayload::None);
            }
        };

        log.add_with(LogType::CcCacheSecret, 1, [records.len()]);
        if let Err(e) = self.cache().write_cache(records.len(), &records) {
            error!("Failed to write secret keyring cache: {}", e);
            log.add(LogType::CcErrorIo, 1);
            return OperationResult::error(log, ResultPayload::None);
        }

        if let Err(e) = self.prefs.set_partially_migrated(true) {
            error!("Failed to persist migration state: {}", e);
            log.add(LogType::CcErrorIo, 1);
            return OperationResult::error(log, ResultPayload::None);
        }

        progress.set_progress(None, 100, 100);
        log.add(LogType::CcSuccess, 0);
        info!(count = records.len(), "Cached secret keyrings for migration");
        OperationResult::ok(
            log,
            ResultPayload::SecretCache {
                count: records.len(),
            },
        )
    }

    /// Resolve a passphrase for every sealed subkey in the snapshot.
    ///
    /// Subkeys of one keyring are requested in rank order. Once earlier
    /// subkeys of the keyring agree on one passphrase it is offered to the
    /// prompt as a pre-fill for the next one.
    pub fn collect_passphrases(
        &self,
        prompt: &mut dyn PassphrasePrompt,
        master_passphrase: &Passphrase,
    ) -> PassphraseCollection {
        let _span = info_span!("collect_passphrases").entered();
        let mut log = OperationLog::new();
        let mut collected = Vec::new();

        let reader = match self.cache().read_cache(false) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to open secret keyring cache: {}", e);
                log.add(LogType::PcErrorDecodeCache, 0);
                return collection(ResultStatus::Error, log, collected);
            }
        };
        log.add_with(LogType::PcStart, 0, [reader.size()]);

        for item in reader {
            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    error!("Failed to read secret keyring cache: {}", e);
                    log.add(LogType::PcErrorDecodeCache, 1);
                    return collection(ResultStatus::Error, log, collected);
                }
            };
            let container = match SecretRingContainer::decode(&record.ring_data) {
                Ok(container) => container,
                Err(e) => {
                    error!(key_id = %format_key_id(record.master_key_id), "Cached keyring is unreadable: {}", e);
                    log.add(LogType::PcErrorDecodeCache, 1);
                    return collection(ResultStatus::Error, log, collected);
                }
            };

            log.add_with(LogType::PcKeyring, 1, [format_key_id(record.master_key_id)]);
            let mut entry = KeyringPassphrases::new(record.master_key_id, master_passphrase.clone());

            for (sub_key_id, secret_type) in subkeys_to_resolve(&record, &container) {
                let sub_id = format_key_id(sub_key_id);
                if !container.locked_key_ids().any(|id| id == sub_key_id) {
                    entry.skip(sub_key_id);
                    log.add_with(LogType::PcSkipSubkey, 2, [&sub_id]);
                    continue;
                }

                if secret_type == SecretKeyType::PassphraseEmpty {
                    let empty = Passphrase::empty();
                    if container
                        .check_passphrase(sub_key_id, &empty, &self.encryptor)
                        .is_ok()
                    {
                        entry.insert(sub_key_id, empty);
                        continue;
                    }
                }

                let trial = entry.single_subkey_passphrase().cloned();
                let mut attempt = 1;
                loop {
                    let request = PassphraseRequest {
                        master_key_id: record.master_key_id,
                        sub_key_id,
                        ring_data: &record.ring_data,
                        passphrase_to_try: if attempt == 1 { trial.as_ref() } else { None },
                        attempt,
                    };
                    let passphrase = match prompt.request(&request) {
                        PromptResponse::Passphrase(passphrase) => passphrase,
                        PromptResponse::Cancelled => {
                            info!(sub_key_id = %sub_id, "Passphrase entry cancelled");
                            log.add(LogType::PcCancelled, 1);
                            return collection(ResultStatus::Cancelled, log, collected);
                        }
                    };

                    match container.check_passphrase(sub_key_id, &passphrase, &self.encryptor) {
                        Ok(()) => {
                            if trial.as_ref() == Some(&passphrase) {
                                log.add_with(LogType::PcTrialAccepted, 2, [&sub_id]);
                            }
                            entry.insert(sub_key_id, passphrase);
                            break;
                        }
                        Err(ContainerError::Encryptor(EncryptorError::IncorrectPassphrase)) => {
                            debug!(sub_key_id = %sub_id, attempt, "Wrong passphrase");
                            log.add_with(LogType::PcBadPassphrase, 2, [&sub_id]);
                            attempt += 1;
                        }
                        Err(e) => {
                            error!(sub_key_id = %sub_id, "Cannot check passphrase: {}", e);
                            log.add(LogType::PcErrorDecodeCache, 2);
                            return collection(ResultStatus::Error, log, collected);
                        }
                    }
                }
            }

            collected.push(entry);
        }

        log.add(LogType::PcSuccess, 0);
        collection(ResultStatus::Ok, log, collected)
    }

    /// Reseal every cached keyring under the key derived from `master_passphrase`.
    ///
    /// Rows are overwritten one at a time and stay rewritten if the batch
    /// stops early. A row that no longer exists is logged and skipped.
    pub fn migrate(
        &self,
        progress: &dyn ProgressReporter,
        passphrases: &[KeyringPassphrases],
        master_passphrase: &Passphrase,
        cancel: Option<&CancelToken>,
    ) -> OperationResult {
        let _span = info_span!("migrate").entered();
        let timer = Timer::new(MIGRATE_DURATION);
        let mut log = OperationLog::new();
        log.add(LogType::MiStart, 0);
        let mut rewritten = 0;
        let mut db_exceptions = 0;

        let fail = |mut log: OperationLog, entry: LogType, key_id: Option<&str>, rewritten, db_exceptions| {
            match key_id {
                Some(id) => log.add_with(entry, 1, [id]),
                None => log.add(entry, 1),
            }
            record_counter(MIGRATE_FAILURES, 1);
            OperationResult::error(
                log,
                ResultPayload::Migrate {
                    rewritten,
                    db_exceptions,
                },
            )
        };

        let key = match self.derive_master_key(master_passphrase) {
            Ok(key) => key,
            Err(e) => {
                error!("Failed to derive master key: {}", e);
                let entry = match e {
                    RowError::Store(_) => LogType::MiErrorDb,
                    _ => LogType::MiErrorEncryptDecrypt,
                };
                return fail(log, entry, None, 0, 0);
            }
        };

        let reader = match self.cache().read_cache(false) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to open secret keyring cache: {}", e);
                return fail(log, LogType::MiErrorDecodeCache, None, 0, 0);
            }
        };
        let total = reader.size();
        log.add_with(LogType::MiReimportSecret, 1, [total]);
        progress.set_progress(Some(ProgressMessage::Migrating), 0, total);

        let by_id: HashMap<MasterKeyId, &KeyringPassphrases> =
            passphrases.iter().map(|p| (p.master_key_id, p)).collect();

        for (position, item) in reader.enumerate() {
            if cancel.is_some_and(|c| c.is_cancelled()) {
                info!(rewritten, total, "Migration cancelled");
                log.add(LogType::MiCancelled, 1);
                return OperationResult::cancelled(
                    log,
                    ResultPayload::Migrate {
                        rewritten,
                        db_exceptions,
                    },
                );
            }

            let record = match item {
                Ok(record) => record,
                Err(e) => {
                    error!("Failed to read secret keyring cache: {}", e);
                    return fail(log, LogType::MiErrorDecodeCache, None, rewritten, db_exceptions);
                }
            };
            let key_id = format_key_id(record.master_key_id);

            let fallback;
            let keyring_passphrases = match by_id.get(&record.master_key_id) {
                Some(p) => *p,
                None => {
                    fallback = KeyringPassphrases::new(record.master_key_id, master_passphrase.clone());
                    &fallback
                }
            };

            let outcome = self
                .reseal_with_master_key(&record, keyring_passphrases, &key)
                .and_then(|blob| {
                    Ok(self
                        .store
                        .update_ring_data(record.master_key_id, RingType::Secret, &blob)?)
                });

            match outcome {
                Ok(0) => {
                    warn!(key_id = %key_id, "Keyring vanished from the store during migration");
                    log.add_with(LogType::MiDbException, 2, [&key_id]);
                    record_counter(MIGRATE_DB_EXCEPTIONS, 1);
                    db_exceptions += 1;
                }
                Ok(_) => {
                    log.add_with(LogType::MiKeyring, 2, [&key_id]);
                    record_counter(MIGRATE_ROWS, 1);
                    rewritten += 1;
                }
                Err(e) => {
                    error!(key_id = %key_id, "Migration of keyring failed: {}", e);
                    let entry = match e {
                        RowError::BadPassphrase => LogType::MiBadPassphrase,
                        RowError::Container(_)
                        | RowError::NoMasterKey
                        | RowError::UnknownEncoding => LogType::MiErrorEncryptDecrypt,
                        RowError::Store(_) => LogType::MiErrorDb,
                    };
                    return fail(log, entry, Some(&key_id), rewritten, db_exceptions);
                }
            }
            progress.set_progress(None, position + 1, total);
        }

        if let Err(e) = self.cache().delete() {
            warn!("Failed to delete secret keyring cache: {}", e);
        }

        let flags = self.prefs.update(|f| {
            f.has_master_passphrase = true;
            f.using_encrypted_keyrings = true;
            f.app_lock_ready = true;
            f.partially_migrated = false;
        });
        if let Err(e) = flags {
            error!("Failed to persist migration flags: {}", e);
            return fail(log, LogType::MiErrorDb, None, rewritten, db_exceptions);
        }

        timer.stop();
        log.add(LogType::MiSuccess, 0);
        info!(rewritten, db_exceptions, "Migration finished");
        OperationResult::ok(
            log,
            ResultPayload::Migrate {
                rewritten,
                db_exceptions,
            },
        )
    }

    fn reseal_with_master_key(
        &self,
        record: &KeyringRecord,
        passphrases: &KeyringPassphrases,
        key: &MasterKey,
    ) -> Result<Vec<u8>, RowError> {
        let container = SecretRingContainer::decode(&record.ring_data)?;
        let material = container.unlock(passphrases, &self.encryptor)?;
        Ok(material.seal_with_master_key(key, &self.encryptor)?)
    }

    /// Put the cached pre-migration blobs back, without any re-encryption
    pub fn revert(&self, progress: &dyn ProgressReporter) -> OperationResult {
        let _span = info_span!("revert_migration").entered();
        let mut log = OperationLog::new();
        log.add(LogType::RwStart, 0);
        let mut restored = 0;
        let mut db_exceptions = 0;

        let reader = match self.cache().read_cache(false) {
            Ok(reader) => reader,
            Err(e) => {
                error!("Failed to open secret keyring cache: {}", e);
                log.add(LogType::RwErrorIo, 1);
                return OperationResult::error(
                    log,
                    ResultPayload::Revert {
                        restored,
                        db_exceptions,
                    },
                );
            }
        };
        let total = reader.size();
        log.add_with(LogType::RwReimportSecret, 1, [total]);
        progress.set_progress(Some(ProgressMessage::Reverting), 0, total);

        for (position, item) in reader.enumerate() {
            let written = item.map_err(|e| e.to_string()).and_then(|record| {
                self.store
                    .update_ring_data(record.master_key_id, RingType::Secret, &record.ring_data)
                    .map(|rows| (record.master_key_id, rows))
                    .map_err(|e| e.to_string())
            });

            match written {
                Ok((master_key_id, 0)) => {
                    let key_id = format_key_id(master_key_id);
                    warn!(key_id = %key_id, "Keyring missing while reverting");
                    log.add_with(LogType::RwDbException, 2, [key_id]);
                    db_exceptions += 1;
                }
                Ok(_) => restored += 1,
                Err(e) => {
                    error!("Revert failed: {}", e);
                    log.add(LogType::RwErrorIo, 1);
                    return OperationResult::error(
                        log,
                        ResultPayload::Revert {
                            restored,
                            db_exceptions,
                        },
                    );
                }
            }
            progress.set_progress(None, position + 1, total);
        }

        if let Err(e) = self.cache().delete() {
            warn!("Failed to delete secret keyring cache: {}", e);
        }
        if let Err(e) = self.prefs.set_partially_migrated(false) {
            error!("Failed to clear migration state: {}", e);
            log.add(LogType::RwErrorIo, 1);
            return OperationResult::error(
                log,
                ResultPayload::Revert {
                    restored,
                    db_exceptions,
                },
            );
        }

        log.add(LogType::RwSuccess, 0);
        info!(restored, db_exceptions, "Migration reverted");
        OperationResult::ok(
            log,
            ResultPayload::Revert {
                restored,
                db_exceptions,
            },
        )
    }

    /// Move keyrings from the master key back to per-subkey passphrases,
    /// every subkey sealed under `new_passphrase`.
    ///
    /// Rows already in the per-key container are left alone, so an
    /// interrupted run can simply be repeated. Unlike the forward path a row
    /// that cannot be written aborts the batch.
    pub fn migrate_back(
        &self,
        progress: &dyn ProgressReporter,
        master_passphrase: &Passphrase,
        new_passphrase: &Passphrase,
    ) -> OperationResult {
        let _span = info_span!("migrate_back").entered();
        let mut log = OperationLog::new();
        log.add(LogType::PwStart, 0);
        let mut rewritten = 0;

        let fail = |mut log: OperationLog, entry: LogType, key_id: Option<&str>, rewritten| {
            match key_id {
                Some(id) => log.add_with(entry, 1, [id]),
                None => log.add(entry, 1),
            }
            record_counter(MIGRATE_FAILURES, 1);
            OperationResult::error(log, ResultPayload::ChangeWorkflow { rewritten })
        };

        let key = match self.existing_master_key(master_passphrase) {
            Ok(key) => key,
            Err(e) => {
                error!("Failed to derive master key: {}", e);
                let entry = match e {
                    RowError::Store(_) => LogType::PwErrorIo,
                    _ => LogType::PwErrorEncryptDecrypt,
                };
                return fail(log, entry, None, 0);
            }
        };

        let records = match self.store.query(RingType::Secret, RingFilter::HasAnySecret) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to query secret keyrings: {}", e);
                return fail(log, LogType::PwErrorIo, None, 0);
            }
        };
        log.add_with(LogType::PwReimportSecret, 1, [records.len()]);
        progress.set_progress(Some(ProgressMessage::Migrating), 0, records.len());

        for (position, record) in records.iter().enumerate() {
            let key_id = format_key_id(record.master_key_id);
            let outcome = match ProtectionScheme::of(&record.ring_data) {
                Some(ProtectionScheme::PerKey) => {
                    debug!(key_id = %key_id, "Keyring already uses per-key passphrases");
                    continue;
                }
                Some(ProtectionScheme::MasterKey) => self
                    .reseal_per_key(record, &key, new_passphrase)
                    .and_then(|blob| {
                        Ok(self
                            .store
                            .update_ring_data(record.master_key_id, RingType::Secret, &blob)?)
                    }),
                None => Err(RowError::UnknownEncoding),
            };

            match outcome {
                Ok(0) => {
                    warn!(key_id = %key_id, "Keyring vanished from the store");
                    return fail(log, LogType::PwDbException, Some(&key_id), rewritten);
                }
                Ok(_) => {
                    record_counter(MIGRATE_ROWS, 1);
                    rewritten += 1;
                }
                Err(e) => {
                    error!(key_id = %key_id, "Rewriting keyring failed: {}", e);
                    let entry = match e {
                        RowError::BadPassphrase => LogType::PwBadPassphrase,
                        RowError::Container(_)
                        | RowError::NoMasterKey
                        | RowError::UnknownEncoding => LogType::PwErrorEncryptDecrypt,
                        RowError::Store(_) => LogType::PwErrorIo,
                    };
                    return fail(log, entry, Some(&key_id), rewritten);
                }
            }
            progress.set_progress(None, position + 1, records.len());
        }

        let flags = self.prefs.update(|f| {
            f.has_master_passphrase = false;
            f.using_encrypted_keyrings = false;
            f.app_lock_ready = false;
            f.master_key = None;
        });
        if let Err(e) = flags {
            error!("Failed to persist workflow flags: {}", e);
            return fail(log, LogType::PwErrorIo, None, rewritten);
        }

        log.add(LogType::PwSuccess, 0);
        info!(rewritten, "Keyrings moved back to per-key passphrases");
        OperationResult::ok(log, ResultPayload::ChangeWorkflow { rewritten })
    }

    fn reseal_per_key(
        &self,
        record: &KeyringRecord,
        key: &MasterKey,
        passphrase: &Passphrase,
    ) -> Result<Vec<u8>, RowError> {
        let material = SecretRingMaterial::open_with_master_key(&record.ring_data, key, &self.encryptor)?;
        let container = SecretRingContainer::lock(&material, |_| Some(passphrase), &self.encryptor)?;
        Ok(container.encode()?)
    }
}

fn collection(
    status: ResultStatus,
    log: OperationLog,
    passphrases: Vec<KeyringPassphrases>,
) -> PassphraseCollection {
    PassphraseCollection {
        status,
        log,
        passphrases,
    }
}

/// Subkeys in rank order, then sealed subkeys the metadata does not list
fn subkeys_to_resolve(
    record: &KeyringRecord,
    container: &SecretRingContainer,
) -> Vec<(SubKeyId, SecretKeyType)> {
    let mut ids: Vec<(SubKeyId, SecretKeyType)> = record
        .subkeys_by_rank()
        .into_iter()
        .map(|s| (s.key_id, s.secret_type))
        .collect();
    for locked in container.locked_key_ids() {
        if !ids.iter().any(|(id, _)| *id == locked) {
            ids.push((locked, SecretKeyType::Passphrase));
        }
    }
    ids
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_ops::NoopProgress;
    use crate::core_store::MemoryKeyringStore;
    use crate::test_utils::{
        assert_logged, assert_status, fast_encryptor, fast_kdf, ScriptedPrompt,
        SecretKeyringBuilder,
    };
    use tempfile::TempDir;

    fn engine(temp_dir: &TempDir, store: Arc<dyn KeyringStore>) -> (MigrationEngine, Arc<Preferences>) {
        let prefs = Arc::new(Preferences::load(temp_dir.path().join("prefs.json")).unwrap());
        let engine = MigrationEngine::new(store, prefs.clone(), temp_dir.path().join("cache"), fast_kdf());
        (engine, prefs)
    }

    #[test]
    fn test_cache_sets_partially_migrated() {
        let temp_dir = TempDir::new().unwrap();
        let fixture = SecretKeyringBuilder::new(0xA1).subkey(1, "p1").build(&fast_encryptor());
        let store = Arc::new(MemoryKeyringStore::with_records(fixture.records()));
        let (engine, prefs) = engine(&temp_dir, store);

        let result = engine.create_secret_keyring_cache(&NoopProgress);
        assert_status(&result, ResultStatus::Ok);
        assert_eq!(result.payload, ResultPayload::SecretCache { count: 1 });
        assert!(engine.has_cache());
        assert!(prefs.partially_migrated().unwrap());
    }

    #[test]
    fn test_trial_passphrase_offered_for_second_subkey() {
        let temp_dir = TempDir::new().unwrap();
        let fixture = SecretKeyringBuilder::new(0xA1)
            .subkey(1, "same")
            .subkey(2, "same")
            .build(&fast_encryptor());
        let store = Arc::new(MemoryKeyringStore::with_records(fixture.records()));
        let (engine, _prefs) = engine(&temp_dir, store);
        engine.create_secret_keyring_cache(&NoopProgress);

        let mut prompt = ScriptedPrompt::new(["same"]).accepting_trial();
        let collection = engine.collect_passphrases(&mut prompt, &"M".into());

        assert!(collection.is_complete(), "{}", collection.log);
        assert_eq!(prompt.seen.len(), 2);
        assert_eq!(prompt.seen[0].passphrase_to_try, None);
        assert_eq!(prompt.seen[1].passphrase_to_try, Some(Passphrase::from("same")));
        assert_logged(&collection.log, LogType::PcTrialAccepted);
    }

    #[test]
    fn test_wrong_passphrase_is_asked_again() {
        let temp_dir = TempDir::new().unwrap();
        let fixture = SecretKeyringBuilder::new(0xA1).subkey(1, "right").build(&fast_encryptor());
        let store = Arc::new(MemoryKeyringStore::with_records(fixture.records()));
        let (engine, _prefs) = engine(&temp_dir, store);
        engine.create_secret_keyring_cache(&NoopProgress);

        let mut prompt = ScriptedPrompt::new(["wrong", "right"]);
        let collection = engine.collect_passphrases(&mut prompt, &"M".into());

        assert!(collection.is_complete());
        assert_eq!(prompt.seen[1].attempt, 2);
        assert_eq!(collection.log.count_of(LogType::PcBadPassphrase), 1);
        assert_eq!(collection.passphrases[0].get(1), Some(&Passphrase::from("right")));
    }

    #[test]
    fn test_empty_and_stripped_subkeys_need_no_prompt() {
        let temp_dir = TempDir::new().unwrap();
        let fixture = SecretKeyringBuilder::new(0xA1)
            .empty_subkey(1)
            .stripped_subkey(2)
            .build(&fast_encryptor());
        let store = Arc::new(MemoryKeyringStore::with_records(fixture.records()));
        let (engine, _prefs) = engine(&temp_dir, store);
        engine.create_secret_keyring_cache(&NoopProgress);

        let mut prompt = ScriptedPrompt::default();
        let collection = engine.collect_passphrases(&mut prompt, &"M".into());

        assert!(collection.is_complete(), "{}", collection.log);
        assert!(prompt.seen.is_empty());
        assert!(collection.passphrases[0].is_skipped(2));
        assert_logged(&collection.log, LogType::PcSkipSubkey);
    }

    #[test]
    fn test_cancelled_prompt_stops_collection() {
        let temp_dir = TempDir::new().unwrap();
        let fixture = SecretKeyringBuilder::new(0xA1).subkey(1, "p1").build(&fast_encryptor());
        let store = Arc::new(MemoryKeyringStore::with_records(fixture.records()));
        let (engine, prefs) = engine(&temp_dir, store);
        engine.create_secret_keyring_cache(&NoopProgress);

        let mut prompt = ScriptedPrompt::default().then_cancel();
        let collection = engine.collect_passphrases(&mut prompt, &"M".into());

        assert_eq!(collection.status, ResultStatus::Cancelled);
        assert_logged(&collection.log, LogType::PcCancelled);
        assert!(engine.has_cache());
        assert!(prefs.partially_migrated().unwrap());
    }

    #[test]
    fn test_migrate_without_cache_fails() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _prefs) = engine(&temp_dir, Arc::new(MemoryKeyringStore::new()));

        let result = engine.migrate(&NoopProgress, &[], &"M".into(), None);
        assert_status(&result, ResultStatus::Error);
        assert_logged(&result.log, LogType::MiErrorDecodeCache);
    }

    #[test]
    fn test_migrate_back_without_master_key() {
        let temp_dir = TempDir::new().unwrap();
        let (engine, _prefs) = engine(&temp_dir, Arc::new(MemoryKeyringStore::new()));

        let result = engine.migrate_back(&NoopProgress, &"M".into(), &"new".into());
        assert_status(&result, ResultStatus::Error);
        assert_logged(&result.log, LogType::PwErrorEncryptDecrypt);
    }

    #[test]
    fn test_row_error_classifies_container_errors() {
        assert!(matches!(
            RowError::from(EncryptorError::IncorrectPassphrase),
            RowError::BadPassphrase
        ));
        assert!(matches!(
            RowError::from(ContainerError::MissingPassphrase(7)),
            RowError::BadPassphrase
        ));
        assert!(matches!(
            RowError::from(ContainerError::Malformed("short".into())),
            RowError::Container(ContainerError::Malformed(_))
        ));
        assert!(matches!(
            engine(&TempDir::new().unwrap(), Arc::new(MemoryKeyringStore::new()))
                .0
                .existing_master_key(&"M".into()),
            Err(RowError::NoMasterKey)
        ));
    }
}
