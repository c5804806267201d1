//! Errors raised while loading or checking the ringstore configuration

use crate::core_crypto::EncryptorError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Cannot write config file {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config cannot be encoded as TOML: {0}")]
    Encode(#[from] toml::ser::Error),

    /// An environment override that does not parse as its setting's type
    #[error("{var}={value:?} is rejected: {reason}")]
    BadOverride {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("KDF parameters rejected: {0}")]
    Kdf(#[from] EncryptorError),

    #[error("Invalid setting: {0}")]
    Invalid(String),
}
