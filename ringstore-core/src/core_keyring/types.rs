//! Core keyring record types

use serde::{Deserialize, Serialize};
use std::fmt;

/// 64-bit OpenPGP key id of a primary key
pub type MasterKeyId = u64;

/// 64-bit OpenPGP key id of a subkey (the primary key is also a subkey, rank 0)
pub type SubKeyId = u64;

/// Uppercase hex rendering used in logs, e.g. `0x00000000DEADBEEF`
pub fn format_key_id(id: u64) -> String {
    format!("0x{:016X}", id)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RingType {
    Public,
    Secret,
}

impl RingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RingType::Public => "public",
            RingType::Secret => "secret",
        }
    }

    /// Column value in the SQL store
    pub fn code(&self) -> i64 {
        match self {
            RingType::Public => 0,
            RingType::Secret => 1,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(RingType::Public),
            1 => Some(RingType::Secret),
            _ => None,
        }
    }
}

impl fmt::Display for RingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Availability of a subkey's secret material
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecretKeyType {
    /// No secret part at all
    Unavailable,
    /// Stripped secret (GNU dummy S2K)
    GnuDummy,
    /// Protected by a non-empty passphrase
    Passphrase,
    /// Protected by the empty passphrase
    PassphraseEmpty,
    /// Secret lives on a smart card
    DivertToCard,
}

impl SecretKeyType {
    /// Whether unlocking this subkey needs a passphrase
    pub fn is_passphrase_protected(&self) -> bool {
        matches!(self, SecretKeyType::Passphrase | SecretKeyType::PassphraseEmpty)
    }

    pub fn code(&self) -> i64 {
        match self {
            SecretKeyType::Unavailable => 0,
            SecretKeyType::GnuDummy => 1,
            SecretKeyType::Passphrase => 2,
            SecretKeyType::PassphraseEmpty => 3,
            SecretKeyType::DivertToCard => 4,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(SecretKeyType::Unavailable),
            1 => Some(SecretKeyType::GnuDummy),
            2 => Some(SecretKeyType::Passphrase),
            3 => Some(SecretKeyType::PassphraseEmpty),
            4 => Some(SecretKeyType::DivertToCard),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyCapabilities {
    pub certify: bool,
    pub sign: bool,
    pub encrypt: bool,
    pub authenticate: bool,
}

impl KeyCapabilities {
    pub fn certify_sign() -> Self {
        Self {
            certify: true,
            sign: true,
            ..Default::default()
        }
    }

    pub fn encrypt_only() -> Self {
        Self {
            encrypt: true,
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubKeyInfo {
    pub key_id: SubKeyId,
    pub rank: u32,
    pub capabilities: KeyCapabilities,
    pub secret_type: SecretKeyType,
}

impl SubKeyInfo {
    pub fn new(key_id: SubKeyId, rank: u32, capabilities: KeyCapabilities, secret_type: SecretKeyType) -> Self {
        Self {
            key_id,
            rank,
            capabilities,
            secret_type,
        }
    }
}

/// One row of the live store, also the unit persisted in snapshot caches.
///
/// `(master_key_id, ring_type)` identifies the row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyringRecord {
    pub master_key_id: MasterKeyId,
    pub ring_type: RingType,
    pub ring_data: Vec<u8>,
    /// For public rows: a secret ring with usable material exists for this key
    pub has_any_secret: bool,
    pub subkeys: Vec<SubKeyInfo>,
}

impl KeyringRecord {
    pub fn public(master_key_id: MasterKeyId, ring_data: Vec<u8>) -> Self {
        Self {
            master_key_id,
            ring_type: RingType::Public,
            ring_data,
            has_any_secret: false,
            subkeys: Vec::new(),
        }
    }

    pub fn secret(master_key_id: MasterKeyId, ring_data: Vec<u8>, subkeys: Vec<SubKeyInfo>) -> Self {
        let has_any_secret = subkeys.iter().any(|s| {
            matches!(
                s.secret_type,
                SecretKeyType::Passphrase | SecretKeyType::PassphraseEmpty | SecretKeyType::DivertToCard
            )
        });
        Self {
            master_key_id,
            ring_type: RingType::Secret,
            ring_data,
            has_any_secret,
            subkeys,
        }
    }

    pub fn with_has_any_secret(mut self, has_any_secret: bool) -> Self {
        self.has_any_secret = has_any_secret;
        self
    }

    pub fn with_subkeys(mut self, subkeys: Vec<SubKeyInfo>) -> Self {
        self.subkeys = subkeys;
        self
    }

    /// Subkeys sorted by rank, the order passphrases are requested in
    pub fn subkeys_by_rank(&self) -> Vec<&SubKeyInfo> {
        let mut keys: Vec<_> = self.subkeys.iter().collect();
        keys.sort_by_key(|s| s.rank);
        keys
    }
}

/// Auxiliary per-key bookkeeping preserved across a rebuild
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatedKey {
    pub master_key_id: MasterKeyId,
    /// Unix seconds of the last keyserver refresh
    pub last_updated: Option<i64>,
    pub seen_on_keyservers: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_key_id() {
        assert_eq!(format_key_id(0xDEADBEEF), "0x00000000DEADBEEF");
    }

    #[test]
    fn test_codes_round_trip() {
        for rt in [RingType::Public, RingType::Secret] {
            assert_eq!(RingType::from_code(rt.code()), Some(rt));
        }
        for st in [
            SecretKeyType::Unavailable,
            SecretKeyType::GnuDummy,
            SecretKeyType::Passphrase,
            SecretKeyType::PassphraseEmpty,
            SecretKeyType::DivertToCard,
        ] {
            assert_eq!(SecretKeyType::from_code(st.code()), Some(st));
        }
        assert_eq!(RingType::from_code(7), None);
    }

    #[test]
    fn test_secret_record_derives_has_any_secret() {
        let stripped = KeyringRecord::secret(
            1,
            vec![],
            vec![SubKeyInfo::new(1, 0, KeyCapabilities::certify_sign(), SecretKeyType::GnuDummy)],
        );
        assert!(!stripped.has_any_secret);

        let usable = KeyringRecord::secret(
            2,
            vec![],
            vec![
                SubKeyInfo::new(2, 0, KeyCapabilities::certify_sign(), SecretKeyType::GnuDummy),
                SubKeyInfo::new(3, 1, KeyCapabilities::encrypt_only(), SecretKeyType::Passphrase),
            ],
        );
        assert!(usable.has_any_secret);
    }

    #[test]
    fn test_subkeys_by_rank() {
        let record = KeyringRecord::public(1, vec![]).with_subkeys(vec![
            SubKeyInfo::new(30, 2, KeyCapabilities::default(), SecretKeyType::Unavailable),
            SubKeyInfo::new(10, 0, KeyCapabilities::default(), SecretKeyType::Unavailable),
            SubKeyInfo::new(20, 1, KeyCapabilities::default(), SecretKeyType::Unavailable),
        ]);
        let ids: Vec<_> = record.subkeys_by_rank().iter().map(|s| s.key_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }
}
