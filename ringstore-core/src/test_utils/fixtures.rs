//! Test fixtures for keyrings and engine wiring
//!
//! Provides builder patterns and factory functions for creating test data.

use crate::core_crypto::{ByteArrayEncryptor, KdfParams, Passphrase};
use crate::core_keyring::{
    KeyCapabilities, KeyringPassphrases, KeyringRecord, MasterKeyId, SecretKeyType,
    SecretRingContainer, SecretRingMaterial, SubKeyId, SubKeyInfo, SubKeyMaterial,
};
use std::collections::BTreeMap;

/// Cheapest Argon2 parameters the KDF accepts
pub fn fast_kdf() -> KdfParams {
    KdfParams::new(8, 1, 1)
}

pub fn fast_encryptor() -> ByteArrayEncryptor {
    ByteArrayEncryptor::new(fast_kdf())
}

/// Public keyring of somebody else: no secret material anywhere
pub fn foreign_public(master_key_id: MasterKeyId) -> KeyringRecord {
    KeyringRecord::public(master_key_id, public_part(master_key_id))
}

fn public_part(master_key_id: MasterKeyId) -> Vec<u8> {
    format!("public-keyring-{:016x}", master_key_id).into_bytes()
}

/// Plaintext secret stored for `sub_key_id`
pub fn subkey_secret(sub_key_id: SubKeyId) -> Vec<u8> {
    format!("secret-{:016x}", sub_key_id).into_bytes()
}

struct SubKeySpec {
    key_id: SubKeyId,
    secret_type: SecretKeyType,
    passphrase: Option<Passphrase>,
}

/// Builder for an own keyring: public row, sealed secret row and the
/// passphrases that open it.
pub struct SecretKeyringBuilder {
    master_key_id: MasterKeyId,
    subkeys: Vec<SubKeySpec>,
}

impl SecretKeyringBuilder {
    pub fn new(master_key_id: MasterKeyId) -> Self {
        Self {
            master_key_id,
            subkeys: Vec::new(),
        }
    }

    /// Subkey sealed under `passphrase`
    pub fn subkey(mut self, key_id: SubKeyId, passphrase: &str) -> Self {
        self.subkeys.push(SubKeySpec {
            key_id,
            secret_type: SecretKeyType::Passphrase,
            passphrase: Some(Passphrase::from(passphrase)),
        });
        self
    }

    /// Subkey sealed under the empty passphrase
    pub fn empty_subkey(mut self, key_id: SubKeyId) -> Self {
        self.subkeys.push(SubKeySpec {
            key_id,
            secret_type: SecretKeyType::PassphraseEmpty,
            passphrase: Some(Passphrase::empty()),
        });
        self
    }

    /// Subkey without secret material (listed in metadata, not sealed)
    pub fn stripped_subkey(mut self, key_id: SubKeyId) -> Self {
        self.subkeys.push(SubKeySpec {
            key_id,
            secret_type: SecretKeyType::GnuDummy,
            passphrase: None,
        });
        self
    }

    pub fn build(self, encryptor: &ByteArrayEncryptor) -> KeyringFixture {
        let material = SecretRingMaterial {
            master_key_id: self.master_key_id,
            public_part: public_part(self.master_key_id),
            subkeys: self
                .subkeys
                .iter()
                .filter(|s| s.passphrase.is_some())
                .map(|s| SubKeyMaterial {
                    key_id: s.key_id,
                    secret: subkey_secret(s.key_id),
                })
                .collect(),
        };

        let by_id: BTreeMap<SubKeyId, &Passphrase> = self
            .subkeys
            .iter()
            .filter_map(|s| s.passphrase.as_ref().map(|p| (s.key_id, p)))
            .collect();
        let container = SecretRingContainer::lock(&material, |id| by_id.get(&id).copied(), encryptor)
            .expect("lock fixture keyring");
        let blob = container.encode().expect("encode fixture keyring");

        let infos: Vec<SubKeyInfo> = self
            .subkeys
            .iter()
            .enumerate()
            .map(|(rank, s)| {
                let capabilities = if rank == 0 {
                    KeyCapabilities::certify_sign()
                } else {
                    KeyCapabilities::encrypt_only()
                };
                SubKeyInfo::new(s.key_id, rank as u32, capabilities, s.secret_type)
            })
            .collect();

        let secret = KeyringRecord::secret(self.master_key_id, blob, infos.clone());
        let public = KeyringRecord::public(self.master_key_id, material.public_part.clone())
            .with_has_any_secret(secret.has_any_secret)
            .with_subkeys(infos);

        let mut passphrases = BTreeMap::new();
        for spec in &self.subkeys {
            if let Some(passphrase) = &spec.passphrase {
                passphrases.insert(spec.key_id, passphrase.clone());
            }
        }

        KeyringFixture {
            master_key_id: self.master_key_id,
            public,
            secret,
            material,
            passphrases,
        }
    }
}

/// Keyring built by [`SecretKeyringBuilder`]
pub struct KeyringFixture {
    pub master_key_id: MasterKeyId,
    pub public: KeyringRecord,
    pub secret: KeyringRecord,
    pub material: SecretRingMaterial,
    pub passphrases: BTreeMap<SubKeyId, Passphrase>,
}

impl KeyringFixture {
    /// The passphrases a prompt would collect, bound to `master`
    pub fn keyring_passphrases(&self, master: &Passphrase) -> KeyringPassphrases {
        let mut out = KeyringPassphrases::new(self.master_key_id, master.clone());
        for (id, passphrase) in &self.passphrases {
            out.insert(*id, passphrase.clone());
        }
        out
    }

    pub fn records(&self) -> [KeyringRecord; 2] {
        [self.public.clone(), self.secret.clone()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_keyring::{ProtectionScheme, RingType};

    #[test]
    fn test_builder_seals_only_material_subkeys() {
        let enc = fast_encryptor();
        let fixture = SecretKeyringBuilder::new(0xA1)
            .subkey(1, "p1")
            .stripped_subkey(2)
            .empty_subkey(3)
            .build(&enc);

        assert_eq!(fixture.secret.ring_type, RingType::Secret);
        assert!(fixture.secret.has_any_secret);
        assert!(fixture.public.has_any_secret);
        assert_eq!(
            ProtectionScheme::of(&fixture.secret.ring_data),
            Some(ProtectionScheme::PerKey)
        );

        let container = SecretRingContainer::decode(&fixture.secret.ring_data).unwrap();
        assert_eq!(container.locked_key_ids().collect::<Vec<_>>(), vec![1, 3]);
        assert!(container
            .check_passphrase(3, &Passphrase::empty(), &enc)
            .is_ok());

        let unlocked = container
            .unlock(&fixture.keyring_passphrases(&"M".into()), &enc)
            .unwrap();
        assert_eq!(unlocked.subkeys[0].secret, subkey_secret(1));
    }

    #[test]
    fn test_foreign_public_has_no_secret() {
        let record = foreign_public(7);
        assert_eq!(record.ring_type, RingType::Public);
        assert!(!record.has_any_secret);
    }
}
