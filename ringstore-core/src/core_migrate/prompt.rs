//! Passphrase prompt collaborator

use crate::core_crypto::Passphrase;
use crate::core_keyring::{MasterKeyId, SubKeyId};

/// One request for a subkey passphrase
#[derive(Debug)]
pub struct PassphraseRequest<'a> {
    pub master_key_id: MasterKeyId,
    pub sub_key_id: SubKeyId,
    /// Cached blob of the keyring, for display or offline checks
    pub ring_data: &'a [u8],
    /// Passphrase of the previous subkeys of this keyring, offered as a
    /// pre-fill. Whatever comes back is verified before it is used.
    pub passphrase_to_try: Option<&'a Passphrase>,
    /// 1 for the first request of this subkey, incremented after each wrong answer
    pub attempt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptResponse {
    Passphrase(Passphrase),
    Cancelled,
}

/// Asks the user for passphrases; called synchronously from the engine
pub trait PassphrasePrompt {
    fn request(&mut self, request: &PassphraseRequest<'_>) -> PromptResponse;
}
