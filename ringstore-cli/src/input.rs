//! Passphrase input for the terminal
//!
//! Passphrases come from environment variables when set, otherwise one
//! per line from stdin. The same reader answers the migration engine's
//! subkey prompts, so piped input is consumed in request order.

use ringstore_core::core_crypto::Passphrase;
use ringstore_core::core_keyring::format_key_id;
use ringstore_core::core_migrate::{PassphrasePrompt, PassphraseRequest, PromptResponse};
use std::io::{self, BufRead, Write};
use tracing::{debug, info};

pub const MASTER_PASSPHRASE_ENV: &str = "RINGSTORE_MASTER_PASSPHRASE";
pub const NEW_PASSPHRASE_ENV: &str = "RINGSTORE_NEW_PASSPHRASE";

/// Line-oriented passphrase reader
pub struct PassphraseInput<R> {
    reader: R,
    /// Highest attempt answered per subkey before giving up
    max_attempts: u32,
}

impl PassphraseInput<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> PassphraseInput<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            max_attempts: 3,
        }
    }

    /// Read one passphrase, announcing `label` on stderr. `None` at end of input.
    pub fn read(&mut self, label: &str) -> io::Result<Option<Passphrase>> {
        eprint!("{}: ", label);
        io::stderr().flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        let trimmed = line.trim_end_matches(['\r', '\n']);
        Ok(Some(Passphrase::new(trimmed)))
    }

    /// Environment variable `var` if set, else one line of input
    pub fn read_or_env(&mut self, var: &str, label: &str) -> io::Result<Option<Passphrase>> {
        match std::env::var(var) {
            Ok(value) => {
                debug!(var, "Passphrase taken from environment");
                Ok(Some(Passphrase::new(value)))
            }
            Err(_) => self.read(label),
        }
    }
}

impl<R: BufRead> PassphrasePrompt for PassphraseInput<R> {
    fn request(&mut self, request: &PassphraseRequest<'_>) -> PromptResponse {
        let sub_key = format_key_id(request.sub_key_id);

        if request.attempt == 1 {
            if let Some(trial) = request.passphrase_to_try {
                info!(sub_key = %sub_key, "Trying passphrase of the previous subkey");
                return PromptResponse::Passphrase(trial.clone());
            }
        }
        if request.attempt > self.max_attempts {
            info!(sub_key = %sub_key, attempts = self.max_attempts, "Giving up on subkey");
            return PromptResponse::Cancelled;
        }

        let label = if request.attempt > 1 {
            format!("Wrong passphrase, try again for subkey {}", sub_key)
        } else {
            format!(
                "Passphrase for subkey {} of {}",
                sub_key,
                format_key_id(request.master_key_id)
            )
        };
        match self.read(&label) {
            Ok(Some(passphrase)) => PromptResponse::Passphrase(passphrase),
            Ok(None) => PromptResponse::Cancelled,
            Err(e) => {
                tracing::error!("Failed to read passphrase: {}", e);
                PromptResponse::Cancelled
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn request(attempt: u32, trial: Option<&Passphrase>) -> PassphraseRequest<'_> {
        PassphraseRequest {
            master_key_id: 0xA1,
            sub_key_id: 0x02,
            ring_data: &[],
            passphrase_to_try: trial,
            attempt,
        }
    }

    #[test]
    fn test_reads_lines_in_order() {
        let mut input = PassphraseInput::new(Cursor::new("first\r\nsecond\n"));

        assert_eq!(input.read("one").unwrap(), Some(Passphrase::new("first")));
        assert_eq!(input.read("two").unwrap(), Some(Passphrase::new("second")));
        assert_eq!(input.read("three").unwrap(), None);
    }

    #[test]
    fn test_empty_line_is_empty_passphrase() {
        let mut input = PassphraseInput::new(Cursor::new("\n"));
        let read = input.read("empty").unwrap().unwrap();
        assert!(read.is_empty());
    }

    #[test]
    fn test_trial_answers_first_attempt_only() {
        let trial = Passphrase::new("shared");
        let mut input = PassphraseInput::new(Cursor::new("typed\n"));

        assert_eq!(
            input.request(&request(1, Some(&trial))),
            PromptResponse::Passphrase(trial.clone())
        );
        assert_eq!(
            input.request(&request(2, None)),
            PromptResponse::Passphrase(Passphrase::new("typed"))
        );
    }

    #[test]
    fn test_end_of_input_cancels() {
        let mut input = PassphraseInput::new(Cursor::new(""));
        assert_eq!(input.request(&request(1, None)), PromptResponse::Cancelled);
    }

    #[test]
    fn test_too_many_attempts_cancels() {
        let mut input = PassphraseInput::new(Cursor::new("a\nb\nc\nd\n"));
        assert_eq!(input.request(&request(4, None)), PromptResponse::Cancelled);
    }
}
