//! Persisted application flags
//!
//! Small JSON document next to the database. Every update rewrites the
//! whole file through a temp file and rename, so a group of flags changed
//! in one [`Preferences::update`] call lands together or not at all.

use super::{handle_poison, StoreError, StoreResult};
use crate::core_crypto::{KdfParams, MasterKey, MASTER_SALT_LEN};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

/// Salt and cost used to derive the master key from the master passphrase
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterKeyParams {
    pub salt_hex: String,
    pub kdf: KdfParams,
}

impl MasterKeyParams {
    pub fn generate(kdf: KdfParams) -> Self {
        Self {
            salt_hex: hex::encode(MasterKey::generate_salt()),
            kdf,
        }
    }

    pub fn salt(&self) -> StoreResult<Vec<u8>> {
        let salt = hex::decode(&self.salt_hex)
            .map_err(|e| StoreError::CorruptedData(format!("master key salt: {}", e)))?;
        if salt.len() != MASTER_SALT_LEN {
            return Err(StoreError::CorruptedData(format!(
                "master key salt has {} bytes",
                salt.len()
            )));
        }
        Ok(salt)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreferenceFlags {
    /// A destructive rebuild started and has not been confirmed complete
    pub cached_consolidate: bool,
    /// Secret keyrings were cached for migration and may be half rewritten
    pub partially_migrated: bool,
    pub has_master_passphrase: bool,
    pub using_encrypted_keyrings: bool,
    pub app_lock_ready: bool,
    pub master_key: Option<MasterKeyParams>,
}

/// Flag file handle shared by the engines
pub struct Preferences {
    path: PathBuf,
    flags: RwLock<PreferenceFlags>,
}

impl Preferences {
    /// Load flags from `path`; a missing file yields defaults
    pub fn load(path: impl AsRef<Path>) -> StoreResult<Self> {
        let path = path.as_ref().to_path_buf();
        let flags = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => PreferenceFlags::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            path,
            flags: RwLock::new(flags),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Snapshot of the current flags
    pub fn flags(&self) -> StoreResult<PreferenceFlags> {
        Ok(self.flags.read().map_err(handle_poison)?.clone())
    }

    /// Apply `change` and persist the result in a single write.
    ///
    /// The in-memory flags only change once the file is on disk.
    pub fn update<F>(&self, change: F) -> StoreResult<PreferenceFlags>
    where
        F: FnOnce(&mut PreferenceFlags),
    {
        let mut guard = self.flags.write().map_err(handle_poison)?;
        let mut next = guard.clone();
        change(&mut next);
        if next != *guard {
            self.write_atomic(&next)?;
            debug!(path = %self.path.display(), "Persisted preference flags");
            *guard = next;
        }
        Ok(guard.clone())
    }

    fn write_atomic(&self, flags: &PreferenceFlags) -> StoreResult<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let data = serde_json::to_vec_pretty(flags)?;
        let temp_path = self.path.with_extension("tmp");
        fs::write(&temp_path, data)?;
        fs::rename(temp_path, &self.path)?;
        Ok(())
    }

    pub fn cached_consolidate(&self) -> StoreResult<bool> {
        Ok(self.flags()?.cached_consolidate)
    }

    pub fn set_cached_consolidate(&self, value: bool) -> StoreResult<()> {
        self.update(|f| f.cached_consolidate = value).map(|_| ())
    }

    pub fn partially_migrated(&self) -> StoreResult<bool> {
        Ok(self.flags()?.partially_migrated)
    }

    pub fn set_partially_migrated(&self, value: bool) -> StoreResult<()> {
        self.update(|f| f.partially_migrated = value).map(|_| ())
    }

    /// Master key parameters, generating and persisting them on first use
    pub fn master_key_params_or_init(&self, kdf: KdfParams) -> StoreResult<MasterKeyParams> {
        let flags = self.update(|f| {
            if f.master_key.is_none() {
                f.master_key = Some(MasterKeyParams::generate(kdf));
            }
        })?;
        flags
            .master_key
            .ok_or_else(|| StoreError::NotFound("master key parameters".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fast_kdf;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = Preferences::load(temp_dir.path().join("preferences.json")).unwrap();
        assert_eq!(prefs.flags().unwrap(), PreferenceFlags::default());
        assert!(!prefs.path().exists());
    }

    #[test]
    fn test_flags_survive_reload() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("preferences.json");

        let prefs = Preferences::load(&path).unwrap();
        prefs
            .update(|f| {
                f.has_master_passphrase = true;
                f.using_encrypted_keyrings = true;
                f.partially_migrated = false;
                f.app_lock_ready = true;
            })
            .unwrap();
        prefs.set_cached_consolidate(true).unwrap();

        let reloaded = Preferences::load(&path).unwrap().flags().unwrap();
        assert!(reloaded.has_master_passphrase);
        assert!(reloaded.using_encrypted_keyrings);
        assert!(reloaded.app_lock_ready);
        assert!(reloaded.cached_consolidate);
        assert!(!reloaded.partially_migrated);
        assert!(!temp_dir.path().join("preferences.tmp").exists());
    }

    #[test]
    fn test_master_key_params_are_stable() {
        let temp_dir = TempDir::new().unwrap();
        let prefs = Preferences::load(temp_dir.path().join("p.json")).unwrap();

        let first = prefs.master_key_params_or_init(fast_kdf()).unwrap();
        let second = prefs.master_key_params_or_init(KdfParams::default()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.salt().unwrap().len(), MASTER_SALT_LEN);
    }

    #[test]
    fn test_corrupt_salt_is_reported() {
        let params = MasterKeyParams {
            salt_hex: "zz".to_string(),
            kdf: fast_kdf(),
        };
        assert!(matches!(params.salt(), Err(StoreError::CorruptedData(_))));
    }
}
