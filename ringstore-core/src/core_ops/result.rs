//! Operation results
//!
//! Every engine entry point returns an [`OperationResult`]: a status, the
//! ordered log and a payload specific to the operation. Import results keep
//! the finer grained [`ImportStatus`] bits because they get merged.

use super::log::OperationLog;
use crate::core_keyring::MasterKeyId;
use serde::Serialize;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Ok,
    Error,
    Cancelled,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResultStatus::Ok => write!(f, "ok"),
            ResultStatus::Error => write!(f, "error"),
            ResultStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResultPayload {
    None,
    Consolidate {
        own_public: usize,
        secret: usize,
        foreign_public: usize,
    },
    SecretCache {
        count: usize,
    },
    Migrate {
        rewritten: usize,
        db_exceptions: usize,
    },
    ChangeWorkflow {
        rewritten: usize,
    },
    Revert {
        restored: usize,
        db_exceptions: usize,
    },
    Import(ImportKeyResult),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OperationResult {
    pub status: ResultStatus,
    pub log: OperationLog,
    pub payload: ResultPayload,
}

impl OperationResult {
    pub fn ok(log: OperationLog, payload: ResultPayload) -> Self {
        Self {
            status: ResultStatus::Ok,
            log,
            payload,
        }
    }

    pub fn error(log: OperationLog, payload: ResultPayload) -> Self {
        Self {
            status: ResultStatus::Error,
            log,
            payload,
        }
    }

    pub fn cancelled(log: OperationLog, payload: ResultPayload) -> Self {
        Self {
            status: ResultStatus::Cancelled,
            log,
            payload,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.status == ResultStatus::Ok
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == ResultStatus::Cancelled
    }
}

/// Bit set describing an import outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
pub struct ImportStatus(u32);

impl ImportStatus {
    pub const ERROR: ImportStatus = ImportStatus(1);
    pub const OK_NEWKEYS: ImportStatus = ImportStatus(2);
    pub const OK_UPDATED: ImportStatus = ImportStatus(4);
    pub const WITH_ERRORS: ImportStatus = ImportStatus(8);
    pub const WITH_WARNINGS: ImportStatus = ImportStatus(16);
    /// Nothing was new, updated or bad
    pub const FAIL_NOTHING: ImportStatus = ImportStatus(32 | 1);
    pub const CANCELLED: ImportStatus = ImportStatus(64);

    pub const fn empty() -> Self {
        ImportStatus(0)
    }

    pub const fn bits(&self) -> u32 {
        self.0
    }

    pub const fn contains(&self, other: ImportStatus) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn intersection(&self, other: ImportStatus) -> ImportStatus {
        ImportStatus(self.0 & other.0)
    }
}

impl BitOr for ImportStatus {
    type Output = ImportStatus;

    fn bitor(self, rhs: ImportStatus) -> ImportStatus {
        ImportStatus(self.0 | rhs.0)
    }
}

impl BitOrAssign for ImportStatus {
    fn bitor_assign(&mut self, rhs: ImportStatus) {
        self.0 |= rhs.0;
    }
}

/// Outcome of importing one or more keyrings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportKeyResult {
    pub status: ImportStatus,
    pub log: OperationLog,
    pub new_keys: usize,
    pub updated_keys: usize,
    pub bad_keys: usize,
    pub secret_keys: usize,
    pub imported_master_key_ids: Vec<MasterKeyId>,
}

impl ImportKeyResult {
    pub fn is_cancelled(&self) -> bool {
        self.status.contains(ImportStatus::CANCELLED)
    }

    pub fn is_error(&self) -> bool {
        self.status.contains(ImportStatus::ERROR)
    }

    /// Status bits implied by the counts and log, on top of `base`.
    ///
    /// An import that touched nothing is `FAIL_NOTHING` regardless of `base`.
    pub fn derive_status(&self, base: ImportStatus) -> ImportStatus {
        if self.new_keys == 0 && self.updated_keys == 0 && self.bad_keys == 0 {
            return ImportStatus::FAIL_NOTHING;
        }
        let mut status = base;
        if self.new_keys > 0 {
            status |= ImportStatus::OK_NEWKEYS;
        }
        if self.updated_keys > 0 {
            status |= ImportStatus::OK_UPDATED;
        }
        if self.bad_keys > 0 {
            status |= ImportStatus::WITH_ERRORS;
            if self.new_keys == 0 && self.updated_keys == 0 {
                status |= ImportStatus::ERROR;
            }
        }
        if self.log.contains_warnings() {
            status |= ImportStatus::WITH_WARNINGS;
        }
        status
    }
}

impl From<ImportKeyResult> for OperationResult {
    fn from(result: ImportKeyResult) -> Self {
        let status = if result.is_cancelled() {
            ResultStatus::Cancelled
        } else if result.is_error() {
            ResultStatus::Error
        } else {
            ResultStatus::Ok
        };
        OperationResult {
            status,
            log: result.log.clone(),
            payload: ResultPayload::Import(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_ops::LogType;

    fn counts(new_keys: usize, updated_keys: usize, bad_keys: usize) -> ImportKeyResult {
        ImportKeyResult {
            new_keys,
            updated_keys,
            bad_keys,
            ..Default::default()
        }
    }

    #[test]
    fn test_status_derivation() {
        let nothing = counts(0, 0, 0).derive_status(ImportStatus::CANCELLED);
        assert_eq!(nothing, ImportStatus::FAIL_NOTHING);
        assert!(nothing.contains(ImportStatus::ERROR));

        let new_only = counts(2, 0, 0).derive_status(ImportStatus::empty());
        assert_eq!(new_only, ImportStatus::OK_NEWKEYS);

        let mixed = counts(1, 1, 1).derive_status(ImportStatus::empty());
        assert!(mixed.contains(ImportStatus::OK_NEWKEYS | ImportStatus::OK_UPDATED));
        assert!(mixed.contains(ImportStatus::WITH_ERRORS));
        assert!(!mixed.contains(ImportStatus::ERROR));

        let bad_only = counts(0, 0, 3).derive_status(ImportStatus::empty());
        assert!(bad_only.contains(ImportStatus::WITH_ERRORS | ImportStatus::ERROR));
    }

    #[test]
    fn test_warnings_flag_follows_log() {
        let mut result = counts(1, 0, 0);
        result.log.add(LogType::ConRecursive, 0);
        let status = result.derive_status(ImportStatus::empty());
        assert!(status.contains(ImportStatus::WITH_WARNINGS));
    }

    #[test]
    fn test_conversion_to_operation_result() {
        let mut result = counts(1, 0, 0);
        result.status = ImportStatus::OK_NEWKEYS | ImportStatus::CANCELLED;
        assert_eq!(OperationResult::from(result).status, ResultStatus::Cancelled);

        let mut result = counts(0, 0, 1);
        result.status = ImportStatus::ERROR | ImportStatus::WITH_ERRORS;
        assert_eq!(OperationResult::from(result).status, ResultStatus::Error);

        let result = OperationResult::from(counts(0, 1, 0));
        assert!(result.is_ok());
    }
}
