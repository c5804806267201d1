//! Structured operation log
//!
//! Entries are typed so callers can match on what happened; the message text
//! is derived from the type. Indentation records nesting: a sub-operation's
//! log is appended one level deeper than the step that ran it.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntrySeverity {
    Debug,
    Info,
    Start,
    Ok,
    Warn,
    Error,
    Cancelled,
}

impl EntrySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntrySeverity::Debug => "DEBUG",
            EntrySeverity::Info => "INFO",
            EntrySeverity::Start => "START",
            EntrySeverity::Ok => "OK",
            EntrySeverity::Warn => "WARN",
            EntrySeverity::Error => "ERROR",
            EntrySeverity::Cancelled => "CANCELLED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LogType {
    // consolidation
    ConStart,
    ConRecursive,
    ConSaveOwnPublic,
    ConSaveSecret,
    ConSaveForeignPublic,
    ConErrorDb,
    ConErrorIoOwnPublic,
    ConErrorIoSecret,
    ConErrorIoForeignPublic,
    ConCriticalIn,
    ConRecover,
    ConErrorBadState,
    ConErrorConcurrent,
    ConBackupUpdated,
    ConDbClear,
    ConReimportOwnPublic,
    ConReimportSecret,
    ConReimportForeignPublic,
    ConReimportPublicSkip,
    ConReimportSecretSkip,
    ConErrorOwnPublic,
    ConErrorSecret,
    ConErrorForeignPublic,
    ConRestoreUpdated,
    ConCriticalOut,
    ConDeleteOwnPublic,
    ConDeleteSecret,
    ConDeleteForeignPublic,
    ConWarnDeleteOwnPublic,
    ConWarnDeleteSecret,
    ConWarnDeleteForeignPublic,
    ConSuccess,

    // secret keyring cache for migration
    CcStart,
    CcCacheSecret,
    CcErrorDb,
    CcErrorIo,
    CcSuccess,

    // passphrase collection
    PcStart,
    PcKeyring,
    PcSkipSubkey,
    PcTrialAccepted,
    PcBadPassphrase,
    PcCancelled,
    PcErrorDecodeCache,
    PcSuccess,

    // migration to the master key
    MiStart,
    MiReimportSecret,
    MiKeyring,
    MiDbException,
    MiBadPassphrase,
    MiErrorEncryptDecrypt,
    MiErrorDecodeCache,
    MiErrorDb,
    MiCancelled,
    MiSuccess,

    // switching between master key and single passphrase
    PwStart,
    PwReimportSecret,
    PwDbException,
    PwBadPassphrase,
    PwErrorEncryptDecrypt,
    PwErrorIo,
    PwSuccess,

    // revert of an interrupted migration
    RwStart,
    RwReimportSecret,
    RwDbException,
    RwErrorIo,
    RwSuccess,

    // import
    ImStart,
    ImKeyring,
    ImInserted,
    ImUpdated,
    ImSecret,
    ImErrorEmpty,
    ImErrorDb,
    ImCancelled,
    ImSuccess,
}

impl LogType {
    pub fn severity(&self) -> EntrySeverity {
        use EntrySeverity::*;
        use LogType::*;
        match self {
            ConStart | CcStart | PcStart | MiStart | PwStart | RwStart | ImStart => Start,

            ConSuccess | CcSuccess | PcSuccess | MiSuccess | PwSuccess | RwSuccess | ImSuccess => Ok,

            ConRecursive | ConReimportPublicSkip | ConReimportSecretSkip
            | ConWarnDeleteOwnPublic | ConWarnDeleteSecret | ConWarnDeleteForeignPublic
            | PcBadPassphrase | MiDbException | RwDbException => Warn,

            ConErrorDb | ConErrorIoOwnPublic | ConErrorIoSecret | ConErrorIoForeignPublic
            | ConErrorBadState | ConErrorConcurrent | ConErrorOwnPublic | ConErrorSecret
            | ConErrorForeignPublic | CcErrorDb | CcErrorIo | PcErrorDecodeCache
            | MiBadPassphrase | MiErrorEncryptDecrypt | MiErrorDecodeCache | MiErrorDb
            | PwDbException | PwBadPassphrase | PwErrorEncryptDecrypt | PwErrorIo
            | RwErrorIo | ImErrorEmpty | ImErrorDb => Error,

            PcCancelled | MiCancelled | ImCancelled => Cancelled,

            PcSkipSubkey | PcTrialAccepted | ConDeleteOwnPublic | ConDeleteSecret
            | ConDeleteForeignPublic | ImKeyring => Debug,

            _ => Info,
        }
    }

    /// Message text; each `{}` is filled from the entry parameters in order
    pub fn template(&self) -> &'static str {
        use LogType::*;
        match self {
            ConStart => "Consolidating database",
            ConRecursive => "Consolidation already in progress, skipping",
            ConSaveOwnPublic => "Saving {} own public keyrings to cache",
            ConSaveSecret => "Saving {} secret keyrings to cache",
            ConSaveForeignPublic => "Saving {} foreign public keyrings to cache",
            ConErrorDb => "Database error while reading keyrings",
            ConErrorIoOwnPublic => "Could not write own public keyrings to cache",
            ConErrorIoSecret => "Could not write secret keyrings to cache",
            ConErrorIoForeignPublic => "Could not write foreign public keyrings to cache",
            ConCriticalIn => "Entering critical phase",
            ConRecover => "Resuming interrupted consolidation",
            ConErrorBadState => "Recovery requested but no consolidation was in progress",
            ConErrorConcurrent => "Another consolidation is already running",
            ConBackupUpdated => "Backed up {} keyserver update timestamps",
            ConDbClear => "Clearing keyring database",
            ConReimportOwnPublic => "Reimporting {} own public keyrings",
            ConReimportSecret => "Reimporting {} secret keyrings",
            ConReimportForeignPublic => "Reimporting {} foreign public keyrings",
            ConReimportPublicSkip => "No public keyrings to reimport",
            ConReimportSecretSkip => "No secret keyrings to reimport",
            ConErrorOwnPublic => "Error reimporting own public keyrings",
            ConErrorSecret => "Error reimporting secret keyrings",
            ConErrorForeignPublic => "Error reimporting foreign public keyrings",
            ConRestoreUpdated => "Restored {} keyserver update timestamps",
            ConCriticalOut => "Leaving critical phase",
            ConDeleteOwnPublic => "Deleted own public keyring cache",
            ConDeleteSecret => "Deleted secret keyring cache",
            ConDeleteForeignPublic => "Deleted foreign public keyring cache",
            ConWarnDeleteOwnPublic => "Could not delete own public keyring cache",
            ConWarnDeleteSecret => "Could not delete secret keyring cache",
            ConWarnDeleteForeignPublic => "Could not delete foreign public keyring cache",
            ConSuccess => "Consolidation successful",

            CcStart => "Caching secret keyrings for migration",
            CcCacheSecret => "Saving {} secret keyrings to cache",
            CcErrorDb => "Database error while reading secret keyrings",
            CcErrorIo => "Could not write secret keyring cache",
            CcSuccess => "Secret keyrings cached",

            PcStart => "Collecting passphrases for {} secret keyrings",
            PcKeyring => "Keyring {}",
            PcSkipSubkey => "Subkey {} has no passphrase protected secret, skipping",
            PcTrialAccepted => "Reused passphrase for subkey {}",
            PcBadPassphrase => "Wrong passphrase for subkey {}",
            PcCancelled => "Passphrase entry cancelled",
            PcErrorDecodeCache => "Could not read secret keyring cache",
            PcSuccess => "All passphrases collected",

            MiStart => "Migrating secret keyrings to master passphrase",
            MiReimportSecret => "Re-encrypting {} secret keyrings",
            MiKeyring => "Re-encrypted keyring {}",
            MiDbException => "Keyring {} not found in database",
            MiBadPassphrase => "Passphrase rejected for keyring {}",
            MiErrorEncryptDecrypt => "Encryption failed for keyring {}",
            MiErrorDecodeCache => "Could not read secret keyring cache",
            MiErrorDb => "Database error while writing keyring {}",
            MiCancelled => "Migration cancelled",
            MiSuccess => "Migration successful",

            PwStart => "Changing passphrase workflow",
            PwReimportSecret => "Re-encrypting {} secret keyrings",
            PwDbException => "Keyring {} not found in database",
            PwBadPassphrase => "Passphrase rejected for keyring {}",
            PwErrorEncryptDecrypt => "Encryption failed for keyring {}",
            PwErrorIo => "Could not read secret keyring cache",
            PwSuccess => "Passphrase workflow changed",

            RwStart => "Reverting interrupted migration",
            RwReimportSecret => "Restoring {} secret keyrings",
            RwDbException => "Keyring {} not found in database",
            RwErrorIo => "Could not read secret keyring cache",
            RwSuccess => "Migration reverted",

            ImStart => "Importing {} keyrings",
            ImKeyring => "Importing keyring {}",
            ImInserted => "Inserted {} keyring {}",
            ImUpdated => "Updated {} keyring {}",
            ImSecret => "Keyring {} carries secret material",
            ImErrorEmpty => "Keyring {} has no data",
            ImErrorDb => "Database error importing keyring {}",
            ImCancelled => "Import cancelled",
            ImSuccess => "Import finished",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub log_type: LogType,
    pub indent: usize,
    pub params: Vec<String>,
}

impl LogEntry {
    pub fn severity(&self) -> EntrySeverity {
        self.log_type.severity()
    }

    /// Template with parameters substituted; missing ones render as `?`
    pub fn message(&self) -> String {
        let mut params = self.params.iter();
        let mut out = String::new();
        let mut parts = self.log_type.template().split("{}").peekable();
        while let Some(part) = parts.next() {
            out.push_str(part);
            if parts.peek().is_some() {
                out.push_str(params.next().map(String::as_str).unwrap_or("?"));
            }
        }
        out
    }
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:indent$}[{}] {}",
            "",
            self.severity().as_str(),
            self.message(),
            indent = self.indent * 2
        )
    }
}

/// Ordered log of typed entries
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationLog {
    entries: Vec<LogEntry>,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, log_type: LogType, indent: usize) {
        self.entries.push(LogEntry {
            log_type,
            indent,
            params: Vec::new(),
        });
    }

    pub fn add_with<I, P>(&mut self, log_type: LogType, indent: usize, params: I)
    where
        I: IntoIterator<Item = P>,
        P: ToString,
    {
        self.entries.push(LogEntry {
            log_type,
            indent,
            params: params.into_iter().map(|p| p.to_string()).collect(),
        });
    }

    /// Append a sub-operation's log, shifted `indent` levels deeper
    pub fn add_nested(&mut self, sub: &OperationLog, indent: usize) {
        self.entries.extend(sub.entries.iter().map(|e| LogEntry {
            indent: e.indent + indent,
            ..e.clone()
        }));
    }

    /// Append without shifting
    pub fn append(&mut self, other: OperationLog) {
        self.entries.extend(other.entries);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn contains(&self, log_type: LogType) -> bool {
        self.entries.iter().any(|e| e.log_type == log_type)
    }

    pub fn count_of(&self, log_type: LogType) -> usize {
        self.entries.iter().filter(|e| e.log_type == log_type).count()
    }

    pub fn contains_warnings(&self) -> bool {
        self.entries
            .iter()
            .any(|e| matches!(e.severity(), EntrySeverity::Warn | EntrySeverity::Error))
    }
}

impl fmt::Display for OperationLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for entry in &self.entries {
            writeln!(f, "{}", entry)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_substitution() {
        let mut log = OperationLog::new();
        log.add_with(LogType::ImInserted, 0, ["public", "0x01"]);
        log.add_with(LogType::ConSaveSecret, 1, [3]);
        log.add(LogType::ImKeyring, 0);

        assert_eq!(log.entries()[0].message(), "Inserted public keyring 0x01");
        assert_eq!(log.entries()[1].to_string(), "  [INFO] Saving 3 secret keyrings to cache");
        assert_eq!(log.entries()[2].message(), "Importing keyring ?");
    }

    #[test]
    fn test_nested_logs_shift_indent() {
        let mut sub = OperationLog::new();
        sub.add(LogType::ImStart, 0);
        sub.add(LogType::ImKeyring, 1);

        let mut log = OperationLog::new();
        log.add(LogType::ConStart, 0);
        log.add_nested(&sub, 2);

        let indents: Vec<_> = log.entries().iter().map(|e| e.indent).collect();
        assert_eq!(indents, vec![0, 2, 3]);
    }

    #[test]
    fn test_contains_warnings() {
        let mut log = OperationLog::new();
        log.add(LogType::ConStart, 0);
        log.add(LogType::ConSuccess, 0);
        assert!(!log.contains_warnings());

        log.add(LogType::MiDbException, 1);
        assert!(log.contains_warnings());
        assert!(log.contains(LogType::MiDbException));
        assert_eq!(log.count_of(LogType::ConStart), 1);
    }
}
