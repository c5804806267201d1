/*
    container.rs - Encodings for secret keyring blobs

    A stored secret keyring is in exactly one of these schemes:
    - PerKey: bincode container, each subkey secret sealed under its own passphrase
    - MasterKey: whole material sealed with the session master key

    Per-key container layout:
    [Magic: 4 bytes "RSPK"][Version: 1 byte][bincode SecretRingContainer]
*/

use super::{KeyringPassphrases, MasterKeyId, SubKeyId};
use crate::core_crypto::{
    is_master_key_blob, ByteArrayEncryptor, EncryptorError, MasterKey, Passphrase,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

const PER_KEY_MAGIC: &[u8; 4] = b"RSPK";
const PER_KEY_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum ContainerError {
    #[error(transparent)]
    Encryptor(#[from] EncryptorError),

    #[error("Malformed secret keyring container: {0}")]
    Malformed(String),

    #[error("No passphrase for subkey {0:#018X}")]
    MissingPassphrase(SubKeyId),

    #[error("Subkey {0:#018X} has no sealed secret in this keyring")]
    UnknownSubKey(SubKeyId),
}

impl From<bincode::Error> for ContainerError {
    fn from(err: bincode::Error) -> Self {
        ContainerError::Malformed(err.to_string())
    }
}

/// Which encryption-at-rest scheme a secret blob uses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionScheme {
    PerKey,
    MasterKey,
}

impl ProtectionScheme {
    pub fn of(blob: &[u8]) -> Option<Self> {
        if blob.starts_with(PER_KEY_MAGIC) {
            Some(ProtectionScheme::PerKey)
        } else if is_master_key_blob(blob) {
            Some(ProtectionScheme::MasterKey)
        } else {
            None
        }
    }
}

/// Plaintext secret of one subkey; wiped on drop
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SubKeyMaterial {
    pub key_id: SubKeyId,
    pub secret: Vec<u8>,
}

impl fmt::Debug for SubKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubKeyMaterial")
            .field("key_id", &self.key_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Fully unlocked secret keyring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRingMaterial {
    pub master_key_id: MasterKeyId,
    pub public_part: Vec<u8>,
    pub subkeys: Vec<SubKeyMaterial>,
}

impl SecretRingMaterial {
    fn encode(&self) -> Result<Zeroizing<Vec<u8>>, ContainerError> {
        Ok(Zeroizing::new(bincode::serialize(self)?))
    }

    fn decode(bytes: &[u8]) -> Result<Self, ContainerError> {
        Ok(bincode::deserialize(bytes)?)
    }

    pub fn seal_with_master_key(
        &self,
        key: &MasterKey,
        encryptor: &ByteArrayEncryptor,
    ) -> Result<Vec<u8>, ContainerError> {
        let plain = self.encode()?;
        Ok(encryptor.encrypt_with_master_key(&plain, key)?)
    }

    pub fn open_with_master_key(
        blob: &[u8],
        key: &MasterKey,
        encryptor: &ByteArrayEncryptor,
    ) -> Result<Self, ContainerError> {
        let plain = encryptor.decrypt_with_master_key(blob, key)?;
        Self::decode(&plain)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedSubKey {
    pub key_id: SubKeyId,
    pub sealed: Vec<u8>,
}

/// Per-key container: subkey secrets sealed one by one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretRingContainer {
    pub master_key_id: MasterKeyId,
    pub public_part: Vec<u8>,
    pub locked: Vec<LockedSubKey>,
}

impl SecretRingContainer {
    /// Seal every subkey of `material` under the passphrase `passphrase_for` returns
    pub fn lock<'a, F>(
        material: &SecretRingMaterial,
        passphrase_for: F,
        encryptor: &ByteArrayEncryptor,
    ) -> Result<Self, ContainerError>
    where
        F: Fn(SubKeyId) -> Option<&'a Passphrase>,
    {
        let mut locked = Vec::with_capacity(material.subkeys.len());
        for subkey in &material.subkeys {
            let passphrase =
                passphrase_for(subkey.key_id).ok_or(ContainerError::MissingPassphrase(subkey.key_id))?;
            locked.push(LockedSubKey {
                key_id: subkey.key_id,
                sealed: encryptor.encrypt_byte_array(&subkey.secret, passphrase)?,
            });
        }

        Ok(Self {
            master_key_id: material.master_key_id,
            public_part: material.public_part.clone(),
            locked,
        })
    }

    pub fn decode(blob: &[u8]) -> Result<Self, ContainerError> {
        if !blob.starts_with(PER_KEY_MAGIC) {
            return Err(ContainerError::Malformed("not a per-key container".to_string()));
        }
        match blob.get(4) {
            Some(&PER_KEY_VERSION) => Ok(bincode::deserialize(&blob[5..])?),
            Some(v) => Err(ContainerError::Malformed(format!("unsupported version {}", v))),
            None => Err(ContainerError::Malformed("truncated header".to_string())),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, ContainerError> {
        let body = bincode::serialize(self)?;
        let mut out = Vec::with_capacity(5 + body.len());
        out.extend_from_slice(PER_KEY_MAGIC);
        out.push(PER_KEY_VERSION);
        out.extend_from_slice(&body);
        Ok(out)
    }

    pub fn locked_key_ids(&self) -> impl Iterator<Item = SubKeyId> + '_ {
        self.locked.iter().map(|l| l.key_id)
    }

    /// Verify a passphrase against one subkey without keeping the plaintext
    pub fn check_passphrase(
        &self,
        key_id: SubKeyId,
        passphrase: &Passphrase,
        encryptor: &ByteArrayEncryptor,
    ) -> Result<(), ContainerError> {
        let locked = self
            .locked
            .iter()
            .find(|l| l.key_id == key_id)
            .ok_or(ContainerError::UnknownSubKey(key_id))?;
        encryptor.decrypt_byte_array(&locked.sealed, passphrase)?;
        Ok(())
    }

    pub fn unlock(
        &self,
        passphrases: &KeyringPassphrases,
        encryptor: &ByteArrayEncryptor,
    ) -> Result<SecretRingMaterial, ContainerError> {
        let mut subkeys = Vec::with_capacity(self.locked.len());
        for locked in &self.locked {
            let passphrase = passphrases
                .get(locked.key_id)
                .ok_or(ContainerError::MissingPassphrase(locked.key_id))?;
            let secret = encryptor.decrypt_byte_array(&locked.sealed, passphrase)?;
            subkeys.push(SubKeyMaterial {
                key_id: locked.key_id,
                secret: secret.to_vec(),
            });
        }

        Ok(SecretRingMaterial {
            master_key_id: self.master_key_id,
            public_part: self.public_part.clone(),
            subkeys,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::fast_kdf;

    fn material() -> SecretRingMaterial {
        SecretRingMaterial {
            master_key_id: 0xA1,
            public_part: b"pub".to_vec(),
            subkeys: vec![
                SubKeyMaterial { key_id: 1, secret: b"s1".to_vec() },
                SubKeyMaterial { key_id: 2, secret: b"s2".to_vec() },
            ],
        }
    }

    #[test]
    fn test_lock_unlock_per_key() {
        let enc = ByteArrayEncryptor::new(fast_kdf());
        let p1 = Passphrase::from("p1");
        let p2 = Passphrase::from("p2");

        let container = SecretRingContainer::lock(
            &material(),
            |id| if id == 1 { Some(&p1) } else { Some(&p2) },
            &enc,
        )
        .unwrap();
        let blob = container.encode().unwrap();
        assert_eq!(ProtectionScheme::of(&blob), Some(ProtectionScheme::PerKey));

        let decoded = SecretRingContainer::decode(&blob).unwrap();
        assert_eq!(decoded, container);
        assert!(decoded.check_passphrase(1, &p1, &enc).is_ok());
        assert!(matches!(
            decoded.check_passphrase(1, &p2, &enc),
            Err(ContainerError::Encryptor(EncryptorError::IncorrectPassphrase))
        ));
        assert!(matches!(
            decoded.check_passphrase(9, &p1, &enc),
            Err(ContainerError::UnknownSubKey(9))
        ));

        let mut passphrases = KeyringPassphrases::new(0xA1, "M".into());
        passphrases.insert(1, p1.clone());
        assert!(matches!(
            decoded.unlock(&passphrases, &enc),
            Err(ContainerError::MissingPassphrase(2))
        ));

        passphrases.insert(2, p2.clone());
        let unlocked = decoded.unlock(&passphrases, &enc).unwrap();
        assert_eq!(unlocked.subkeys[0].secret, b"s1");
        assert_eq!(unlocked.subkeys[1].secret, b"s2");
    }

    #[test]
    fn test_master_key_scheme() {
        let enc = ByteArrayEncryptor::new(fast_kdf());
        let key = MasterKey::derive(&"M".into(), &[3u8; 16], fast_kdf()).unwrap();

        let sealed = material().seal_with_master_key(&key, &enc).unwrap();
        assert_eq!(ProtectionScheme::of(&sealed), Some(ProtectionScheme::MasterKey));
        let opened = SecretRingMaterial::open_with_master_key(&sealed, &key, &enc).unwrap();
        assert_eq!(opened.subkeys.len(), 2);
        assert_eq!(opened.public_part, b"pub");
        assert!(SecretRingContainer::decode(&sealed).is_err());

        let other = MasterKey::derive(&"N".into(), &[3u8; 16], fast_kdf()).unwrap();
        assert!(matches!(
            SecretRingMaterial::open_with_master_key(&sealed, &other, &enc),
            Err(ContainerError::Encryptor(EncryptorError::IncorrectPassphrase))
        ));
    }

    #[test]
    fn test_unknown_blob_has_no_scheme() {
        assert_eq!(ProtectionScheme::of(b"garbage"), None);
        assert!(matches!(
            SecretRingContainer::decode(b"RSPK\x07"),
            Err(ContainerError::Malformed(_))
        ));
    }

    #[test]
    fn test_material_debug_redacts_secret() {
        let rendered = format!("{:?}", material());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("115, 49"));
    }
}
