//! Keyring store maintenance
//!
//! Consolidates the live keyring database through on-disk snapshot caches,
//! migrates secret keyrings from per-subkey passphrases to a master key
//! and back, and imports keyrings with bounded parallelism.

pub mod config;
pub mod context;
pub mod core_cache;
pub mod core_consolidate;
pub mod core_crypto;
pub mod core_import;
pub mod core_keyring;
pub mod core_migrate;
pub mod core_ops;
pub mod core_store;
pub mod logging;
pub mod metrics;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use config::Config;
pub use context::{ContextError, RingstoreContext, StoreStatus};
pub use core_consolidate::ConsolidationEngine;
pub use core_migrate::MigrationEngine;
pub use core_ops::{OperationLog, OperationResult, ResultStatus};
pub use logging::{init_logging, LogLevel};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_exports() {
        let _ = LogLevel::Info;
        let _ = ResultStatus::Ok;
        assert!(OperationLog::new().is_empty());
    }
}
