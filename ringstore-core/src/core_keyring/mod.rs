//! Keyring data model
//!
//! Keyrings are opaque OpenPGP blobs plus the metadata the store indexes:
//! owner key id, ring type, subkey capabilities and secret availability.

mod container;
mod passphrases;
mod types;

pub use container::{
    ContainerError, LockedSubKey, ProtectionScheme, SecretRingContainer, SecretRingMaterial,
    SubKeyMaterial,
};
pub use passphrases::KeyringPassphrases;
pub use types::{
    format_key_id, KeyCapabilities, KeyringRecord, MasterKeyId, RingType, SecretKeyType,
    SubKeyId, SubKeyInfo, UpdatedKey,
};
