//! Byte-array encryptor for keyring blobs
//!
//! Passphrase blob format:
//! ```text
//! [Magic: 8 bytes "RSPB0001"]
//! [Version: 1 byte]
//! [Argon2 m_cost, t_cost, p_cost: 3 x u32 LE]
//! [Salt: 16 bytes]
//! [Nonce: 12 bytes]
//! [Ciphertext + AEAD tag: variable]
//! ```
//!
//! Master key blob format:
//! ```text
//! [Magic: 8 bytes "RSMK0001"]
//! [Version: 1 byte]
//! [Nonce: 12 bytes]
//! [Ciphertext + AEAD tag: variable]
//! ```

use super::{MasterKey, Passphrase};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::{Algorithm, Argon2, Params, Version};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use zeroize::Zeroizing;

/// Magic header for passphrase protected blobs
pub const PASSPHRASE_MAGIC: &[u8; 8] = b"RSPB0001";

/// Magic header for master key protected blobs
pub const MASTER_KEY_MAGIC: &[u8; 8] = b"RSMK0001";

const FORMAT_VERSION: u8 = 1;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;
pub(crate) const KEY_LEN: usize = 32;

/// magic(8) + version(1) + kdf params(12) + salt(16) + nonce(12) = 49 bytes
const PASSPHRASE_HEADER_SIZE: usize = 8 + 1 + 12 + SALT_LEN + NONCE_LEN;

/// magic(8) + version(1) + nonce(12) = 21 bytes
const MASTER_HEADER_SIZE: usize = 8 + 1 + NONCE_LEN;

#[derive(Debug, Error)]
pub enum EncryptorError {
    /// The AEAD tag did not verify under the derived key
    #[error("Incorrect passphrase")]
    IncorrectPassphrase,

    #[error("Encrypt/decrypt failed: {0}")]
    EncryptDecrypt(String),
}

pub type EncryptorResult<T> = Result<T, EncryptorError>;

/// Argon2id cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 19 * 1024,
            iterations: 2,
            parallelism: 1,
        }
    }
}

impl KdfParams {
    pub const fn new(memory_kib: u32, iterations: u32, parallelism: u32) -> Self {
        Self {
            memory_kib,
            iterations,
            parallelism,
        }
    }

    /// Reject parameters Argon2 would refuse
    pub fn validate(&self) -> EncryptorResult<()> {
        self.argon2().map(|_| ())
    }

    fn argon2(&self) -> EncryptorResult<Argon2<'static>> {
        let params = Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| EncryptorError::EncryptDecrypt(format!("Invalid Argon2 params: {}", e)))?;

        Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
    }

    /// Stretch `secret` into an AES-256 key
    pub(crate) fn derive_key(
        &self,
        secret: &[u8],
        salt: &[u8],
    ) -> EncryptorResult<Zeroizing<[u8; KEY_LEN]>> {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        self.argon2()?
            .hash_password_into(secret, salt, key.as_mut_slice())
            .map_err(|e| EncryptorError::EncryptDecrypt(format!("Key derivation failed: {}", e)))?;
        Ok(key)
    }

    fn to_bytes(self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[0..4].copy_from_slice(&self.memory_kib.to_le_bytes());
        out[4..8].copy_from_slice(&self.iterations.to_le_bytes());
        out[8..12].copy_from_slice(&self.parallelism.to_le_bytes());
        out
    }

    fn from_bytes(bytes: &[u8]) -> EncryptorResult<Self> {
        let word = |i: usize| -> EncryptorResult<u32> {
            bytes
                .get(i..i + 4)
                .and_then(|s| s.try_into().ok())
                .map(u32::from_le_bytes)
                .ok_or_else(|| EncryptorError::EncryptDecrypt("Truncated KDF header".to_string()))
        };
        Ok(Self {
            memory_kib: word(0)?,
            iterations: word(4)?,
            parallelism: word(8)?,
        })
    }
}

/// Returns true if `data` starts with the passphrase blob header
pub fn is_passphrase_blob(data: &[u8]) -> bool {
    data.starts_with(PASSPHRASE_MAGIC)
}

/// Returns true if `data` starts with the master key blob header
pub fn is_master_key_blob(data: &[u8]) -> bool {
    data.starts_with(MASTER_KEY_MAGIC)
}

fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    rand::rng().fill_bytes(&mut out);
    out
}

fn seal(key: &[u8], nonce: &[u8; NONCE_LEN], plaintext: &[u8]) -> EncryptorResult<Vec<u8>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EncryptorError::EncryptDecrypt(format!("Invalid key: {}", e)))?;
    cipher
        .encrypt(Nonce::from_slice(nonce), plaintext)
        .map_err(|e| EncryptorError::EncryptDecrypt(format!("Encryption failed: {}", e)))
}

fn open(key: &[u8], nonce: &[u8], ciphertext: &[u8]) -> EncryptorResult<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new_from_slice(key)
        .map_err(|e| EncryptorError::EncryptDecrypt(format!("Invalid key: {}", e)))?;
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        // AEAD tag mismatch = wrong key or tampered blob
        .map_err(|_| EncryptorError::IncorrectPassphrase)
}

fn check_header(data: &[u8], magic: &[u8; 8], header_size: usize) -> EncryptorResult<()> {
    if data.len() < 9 {
        return Err(EncryptorError::EncryptDecrypt("Blob too short".to_string()));
    }
    if &data[0..8] != magic {
        return Err(EncryptorError::EncryptDecrypt("Invalid magic header".to_string()));
    }
    if data[8] != FORMAT_VERSION {
        return Err(EncryptorError::EncryptDecrypt(format!(
            "Unsupported version: {}",
            data[8]
        )));
    }
    if data.len() < header_size + TAG_LEN {
        return Err(EncryptorError::EncryptDecrypt("Truncated blob".to_string()));
    }
    Ok(())
}

/// Encrypts and decrypts opaque keyring blobs.
///
/// The configured [`KdfParams`] only apply when encrypting; decryption uses
/// the parameters recorded in the blob.
#[derive(Debug, Clone, Copy, Default)]
pub struct ByteArrayEncryptor {
    params: KdfParams,
}

impl ByteArrayEncryptor {
    pub fn new(params: KdfParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> KdfParams {
        self.params
    }

    /// Encrypt under a key stretched from `passphrase` with a fresh salt
    pub fn encrypt_byte_array(
        &self,
        plaintext: &[u8],
        passphrase: &Passphrase,
    ) -> EncryptorResult<Vec<u8>> {
        let salt = random_bytes::<SALT_LEN>();
        let nonce = random_bytes::<NONCE_LEN>();
        let key = self.params.derive_key(passphrase.as_bytes(), &salt)?;
        let ciphertext = seal(key.as_slice(), &nonce, plaintext)?;

        let mut out = Vec::with_capacity(PASSPHRASE_HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(PASSPHRASE_MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&self.params.to_bytes());
        out.extend_from_slice(&salt);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_byte_array(
        &self,
        ciphertext: &[u8],
        passphrase: &Passphrase,
    ) -> EncryptorResult<Zeroizing<Vec<u8>>> {
        check_header(ciphertext, PASSPHRASE_MAGIC, PASSPHRASE_HEADER_SIZE)?;

        let params = KdfParams::from_bytes(&ciphertext[9..21])?;
        let salt = &ciphertext[21..21 + SALT_LEN];
        let nonce = &ciphertext[21 + SALT_LEN..PASSPHRASE_HEADER_SIZE];

        let key = params.derive_key(passphrase.as_bytes(), salt)?;
        open(key.as_slice(), nonce, &ciphertext[PASSPHRASE_HEADER_SIZE..])
    }

    /// Encrypt under the session master key; no key stretching per blob
    pub fn encrypt_with_master_key(
        &self,
        plaintext: &[u8],
        key: &MasterKey,
    ) -> EncryptorResult<Vec<u8>> {
        let nonce = random_bytes::<NONCE_LEN>();
        let ciphertext = seal(key.bytes(), &nonce, plaintext)?;

        let mut out = Vec::with_capacity(MASTER_HEADER_SIZE + ciphertext.len());
        out.extend_from_slice(MASTER_KEY_MAGIC);
        out.push(FORMAT_VERSION);
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    pub fn decrypt_with_master_key(
        &self,
        ciphertext: &[u8],
        key: &MasterKey,
    ) -> EncryptorResult<Zeroizing<Vec<u8>>> {
        check_header(ciphertext, MASTER_KEY_MAGIC, MASTER_HEADER_SIZE)?;
        let nonce = &ciphertext[9..MASTER_HEADER_SIZE];
        open(key.bytes(), nonce, &ciphertext[MASTER_HEADER_SIZE..])
    }
}
