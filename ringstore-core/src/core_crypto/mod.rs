//! Symmetric protection of stored keyring blobs
//!
//! Two key sources exist: a passphrase stretched per blob with Argon2id, and
//! a master key derived once per session from the master passphrase.
//! Both seal with AES-256-GCM.

mod encryptor;
mod master_key;
mod passphrase;

pub use encryptor::{
    is_master_key_blob, is_passphrase_blob, ByteArrayEncryptor, EncryptorError, EncryptorResult,
    KdfParams, MASTER_KEY_MAGIC, PASSPHRASE_MAGIC,
};
pub use master_key::{MasterKey, MASTER_SALT_LEN};
pub use passphrase::Passphrase;
