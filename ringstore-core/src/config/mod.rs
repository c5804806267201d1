//! Configuration management for ringstore
//!
//! Defaults, TOML files and environment overrides, validated before use.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

mod error;

pub use error::ConfigError;

use crate::core_crypto::KdfParams;

/// Upper bound on concurrent import workers
pub const MAX_IMPORT_WORKERS: usize = 200;

/// Main application configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Live store location
    pub store: StoreConfig,

    /// Snapshot cache location
    pub cache: CacheConfig,

    /// Key derivation cost for new blobs and the master key
    pub crypto: CryptoConfig,

    /// Import worker pool
    pub import: ImportConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding the database and preferences
    pub data_dir: PathBuf,

    /// Database file name inside `data_dir`
    pub database_file: String,

    /// SQLite connection pool size
    pub pool_size: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Snapshot cache directory; `<data_dir>/cache` when unset
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    pub kdf_memory_kib: u32,
    pub kdf_iterations: u32,
    pub kdf_parallelism: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    /// Concurrent keyring imports in a parallel import
    pub max_workers: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON formatting
    pub json_format: bool,

    /// Include timestamps
    pub with_timestamp: bool,

    /// Include target module
    pub with_target: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            database_file: "keyrings.db".to_string(),
            pool_size: 4,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        let kdf = KdfParams::default();
        Self {
            kdf_memory_kib: kdf.memory_kib,
            kdf_iterations: kdf.iterations,
            kdf_parallelism: kdf.parallelism,
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            max_workers: (num_cpus::get() * 4).min(MAX_IMPORT_WORKERS),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
            with_timestamp: true,
            with_target: true,
        }
    }
}

impl Config {
    /// Defaults rooted at `data_dir`
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::default();
        config.store.data_dir = data_dir.into();
        config
    }

    pub fn database_path(&self) -> PathBuf {
        self.store.data_dir.join(&self.store.database_file)
    }

    pub fn preferences_path(&self) -> PathBuf {
        self.store.data_dir.join("preferences.json")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache
            .dir
            .clone()
            .unwrap_or_else(|| self.store.data_dir.join("cache"))
    }

    pub fn kdf_params(&self) -> KdfParams {
        KdfParams::new(
            self.crypto.kdf_memory_kib,
            self.crypto.kdf_iterations,
            self.crypto.kdf_parallelism,
        )
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables follow the pattern: RINGSTORE_<SECTION>_<KEY>
    /// Example: RINGSTORE_STORE_DATA_DIR=/var/lib/ringstore
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_overrides(|key| env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RINGSTORE_*` overrides read through `lookup`
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(data_dir) = lookup("RINGSTORE_STORE_DATA_DIR") {
            self.store.data_dir = PathBuf::from(data_dir);
        }
        if let Some(file) = lookup("RINGSTORE_STORE_DATABASE_FILE") {
            self.store.database_file = file;
        }
        if let Some(size) = lookup("RINGSTORE_STORE_POOL_SIZE") {
            self.store.pool_size = parse_value("RINGSTORE_STORE_POOL_SIZE", size)?;
        }

        if let Some(dir) = lookup("RINGSTORE_CACHE_DIR") {
            self.cache.dir = Some(PathBuf::from(dir));
        }

        if let Some(memory) = lookup("RINGSTORE_CRYPTO_KDF_MEMORY_KIB") {
            self.crypto.kdf_memory_kib = parse_value("RINGSTORE_CRYPTO_KDF_MEMORY_KIB", memory)?;
        }
        if let Some(iterations) = lookup("RINGSTORE_CRYPTO_KDF_ITERATIONS") {
            self.crypto.kdf_iterations = parse_value("RINGSTORE_CRYPTO_KDF_ITERATIONS", iterations)?;
        }
        if let Some(parallelism) = lookup("RINGSTORE_CRYPTO_KDF_PARALLELISM") {
            self.crypto.kdf_parallelism = parse_value("RINGSTORE_CRYPTO_KDF_PARALLELISM", parallelism)?;
        }

        if let Some(workers) = lookup("RINGSTORE_IMPORT_MAX_WORKERS") {
            self.import.max_workers = parse_value("RINGSTORE_IMPORT_MAX_WORKERS", workers)?;
        }

        if let Some(level) = lookup("RINGSTORE_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(json) = lookup("RINGSTORE_LOG_JSON") {
            self.logging.json_format = parse_value("RINGSTORE_LOG_JSON", json)?;
        }

        Ok(())
    }

    /// Load configuration from file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self = toml::from_str(&contents)?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.database_file.is_empty() {
            return Err(ConfigError::Invalid(
                "database_file must not be empty".to_string(),
            ));
        }

        if self.store.pool_size == 0 {
            return Err(ConfigError::Invalid(
                "pool_size must be greater than 0".to_string(),
            ));
        }

        if self.import.max_workers == 0 || self.import.max_workers > MAX_IMPORT_WORKERS {
            return Err(ConfigError::Invalid(format!(
                "max_workers must be between 1 and {}",
                MAX_IMPORT_WORKERS
            )));
        }

        self.kdf_params().validate()?;

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "Invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let contents = toml::to_string_pretty(self)?;

        std::fs::write(path, contents).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(())
    }
}

fn parse_value<T>(var: &'static str, raw: String) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e: T::Err| ConfigError::BadOverride {
        var,
        reason: e.to_string(),
        value: raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.cache_dir(), PathBuf::from("./data").join("cache"));
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        config.store.pool_size = 0;
        assert!(config.validate().is_err());

        config = Config::default();
        config.import.max_workers = MAX_IMPORT_WORKERS + 1;
        assert!(config.validate().is_err());

        config = Config::default();
        config.crypto.kdf_parallelism = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_log_level_validation() {
        let mut config = Config::default();

        config.logging.level = "invalid".to_string();
        assert!(config.validate().is_err());

        config.logging.level = "debug".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RINGSTORE_STORE_DATA_DIR", "/tmp/rs"),
            ("RINGSTORE_CACHE_DIR", "/tmp/rs-cache"),
            ("RINGSTORE_IMPORT_MAX_WORKERS", "7"),
            ("RINGSTORE_LOG_JSON", "true"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.database_path(), PathBuf::from("/tmp/rs/keyrings.db"));
        assert_eq!(config.cache_dir(), PathBuf::from("/tmp/rs-cache"));
        assert_eq!(config.import.max_workers, 7);
        assert!(config.logging.json_format);

        let bad = config.apply_overrides(|k| {
            (k == "RINGSTORE_STORE_POOL_SIZE").then(|| "many".to_string())
        });
        assert!(matches!(
            bad,
            Err(ConfigError::BadOverride { var: "RINGSTORE_STORE_POOL_SIZE", .. })
        ));
    }

    #[test]
    fn test_file_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("ringstore.toml");

        let mut config = Config::with_data_dir(temp_dir.path());
        config.crypto.kdf_memory_kib = 64;
        config.save_to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.store.data_dir, temp_dir.path());
        assert_eq!(loaded.kdf_params().memory_kib, 64);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("partial.toml");
        std::fs::write(&path, "[logging]\nlevel = \"warn\"\n").unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.logging.level, "warn");
        assert_eq!(loaded.store.pool_size, 4);
    }
}
