//! Symmetric migration of secret keyrings
//!
//! Moves every secret keyring from per-subkey passphrases to one key
//! derived from the master passphrase, and back. The forward path works
//! from a snapshot of the secret keyrings taken before any row is touched;
//! while that snapshot exists the "partially migrated" preference is set
//! and [`MigrationEngine::revert`] can put the original blobs back.

mod engine;
mod prompt;

pub use engine::{MigrationEngine, PassphraseCollection};
pub use prompt::{PassphrasePrompt, PassphraseRequest, PromptResponse};
