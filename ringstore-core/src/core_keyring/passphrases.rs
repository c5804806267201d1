//! Passphrases gathered for one keyring during migration

use super::{MasterKeyId, SubKeyId};
use crate::core_crypto::Passphrase;
use std::collections::{BTreeMap, BTreeSet};

/// Subkey passphrases for one keyring, plus the master passphrase the
/// keyring is being moved under.
#[derive(Debug, Clone)]
pub struct KeyringPassphrases {
    pub master_key_id: MasterKeyId,
    master_passphrase: Passphrase,
    subkey_passphrases: BTreeMap<SubKeyId, Passphrase>,
    skipped: BTreeSet<SubKeyId>,
}

impl KeyringPassphrases {
    pub fn new(master_key_id: MasterKeyId, master_passphrase: Passphrase) -> Self {
        Self {
            master_key_id,
            master_passphrase,
            subkey_passphrases: BTreeMap::new(),
            skipped: BTreeSet::new(),
        }
    }

    pub fn master_passphrase(&self) -> &Passphrase {
        &self.master_passphrase
    }

    pub fn insert(&mut self, sub_key_id: SubKeyId, passphrase: Passphrase) {
        self.skipped.remove(&sub_key_id);
        self.subkey_passphrases.insert(sub_key_id, passphrase);
    }

    /// Record a subkey that has no passphrase to collect (stripped, or on a card)
    pub fn skip(&mut self, sub_key_id: SubKeyId) {
        if !self.subkey_passphrases.contains_key(&sub_key_id) {
            self.skipped.insert(sub_key_id);
        }
    }

    pub fn get(&self, sub_key_id: SubKeyId) -> Option<&Passphrase> {
        self.subkey_passphrases.get(&sub_key_id)
    }

    pub fn is_skipped(&self, sub_key_id: SubKeyId) -> bool {
        self.skipped.contains(&sub_key_id)
    }

    pub fn subkey_passphrases(&self) -> &BTreeMap<SubKeyId, Passphrase> {
        &self.subkey_passphrases
    }

    pub fn skipped(&self) -> impl Iterator<Item = SubKeyId> + '_ {
        self.skipped.iter().copied()
    }

    /// True if at least one passphrase is known and all known ones are equal
    pub fn subkeys_have_same_passphrase(&self) -> bool {
        let mut values = self.subkey_passphrases.values();
        match values.next() {
            Some(first) => values.all(|p| p == first),
            None => false,
        }
    }

    /// The shared passphrase, if [`Self::subkeys_have_same_passphrase`]
    pub fn single_subkey_passphrase(&self) -> Option<&Passphrase> {
        if self.subkeys_have_same_passphrase() {
            self.subkey_passphrases.values().next()
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_passphrase_detection() {
        let mut kp = KeyringPassphrases::new(1, "M".into());
        assert!(!kp.subkeys_have_same_passphrase());
        assert!(kp.single_subkey_passphrase().is_none());

        kp.insert(10, "p1".into());
        kp.insert(11, "p1".into());
        assert!(kp.subkeys_have_same_passphrase());
        assert_eq!(kp.single_subkey_passphrase(), Some(&Passphrase::from("p1")));

        kp.insert(12, "p2".into());
        assert!(!kp.subkeys_have_same_passphrase());
        assert!(kp.single_subkey_passphrase().is_none());
    }

    #[test]
    fn test_skip_is_overridden_by_passphrase() {
        let mut kp = KeyringPassphrases::new(1, "M".into());
        kp.skip(5);
        assert!(kp.is_skipped(5));

        kp.insert(5, "late".into());
        assert!(!kp.is_skipped(5));
        assert_eq!(kp.get(5), Some(&Passphrase::from("late")));

        kp.skip(5);
        assert!(!kp.is_skipped(5));
        assert_eq!(kp.master_passphrase(), &Passphrase::from("M"));
    }
}
