//! Session master key derived from the master passphrase

use super::encryptor::KEY_LEN;
use super::{EncryptorResult, KdfParams, Passphrase};
use rand::RngCore;
use secrecy::{ExposeSecret, Secret};
use std::fmt;

/// Salt length persisted alongside the master key parameters
pub const MASTER_SALT_LEN: usize = 16;

/// AES-256 key derived once per session.
///
/// Deriving is the expensive step; callers hold on to one instance for a
/// whole migration batch instead of stretching the passphrase per keyring.
pub struct MasterKey {
    key: Secret<[u8; KEY_LEN]>,
}

impl MasterKey {
    pub fn derive(
        passphrase: &Passphrase,
        salt: &[u8],
        params: KdfParams,
    ) -> EncryptorResult<Self> {
        let derived = params.derive_key(passphrase.as_bytes(), salt)?;
        Ok(Self {
            key: Secret::new(*derived),
        })
    }

    pub fn generate_salt() -> [u8; MASTER_SALT_LEN] {
        let mut salt = [0u8; MASTER_SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        salt
    }

    pub(crate) fn bytes(&self) -> &[u8] {
        self.key.expose_secret()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fast_kdf;

    #[test]
    fn test_derivation_is_deterministic_per_salt() {
        let salt = [1u8; MASTER_SALT_LEN];
        let a = MasterKey::derive(&"pw".into(), &salt, fast_kdf()).unwrap();
        let b = MasterKey::derive(&"pw".into(), &salt, fast_kdf()).unwrap();
        let c = MasterKey::derive(&"pw".into(), &[2u8; MASTER_SALT_LEN], fast_kdf()).unwrap();

        assert_eq!(a.bytes(), b.bytes());
        assert_ne!(a.bytes(), c.bytes());
    }

    #[test]
    fn test_debug_redacts_key() {
        let key = MasterKey::derive(&"pw".into(), &[0u8; 16], fast_kdf()).unwrap();
        assert_eq!(format!("{:?}", key), "MasterKey([REDACTED])");
    }
}
