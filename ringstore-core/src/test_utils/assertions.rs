//! Custom assertions for operation results
//!
//! Failures print the whole operation log, which is usually the fastest
//! way to see where an engine stopped.

use crate::core_ops::{LogType, OperationLog, OperationResult, ResultStatus};
use std::fmt::Debug;

/// Assert that a Result is Ok and return the value
pub fn assert_ok<T, E: Debug>(result: Result<T, E>) -> T {
    match result {
        Ok(value) => value,
        Err(e) => panic!("Expected Ok, got Err: {:?}", e),
    }
}

/// Assert that an operation ended with `status`
pub fn assert_status(result: &OperationResult, status: ResultStatus) {
    if result.status != status {
        panic!(
            "Expected status {:?}, got {:?}. Log:\n{}",
            status, result.status, result.log
        );
    }
}

/// Assert that the log holds an entry of `log_type`
pub fn assert_logged(log: &OperationLog, log_type: LogType) {
    if !log.contains(log_type) {
        panic!("Expected {:?} in log:\n{}", log_type, log);
    }
}

/// Assert that the log holds no entry of `log_type`
pub fn assert_not_logged(log: &OperationLog, log_type: LogType) {
    if log.contains(log_type) {
        panic!("Did not expect {:?} in log:\n{}", log_type, log);
    }
}

/// Assert that the given entry types appear in this order (others may sit between)
pub fn assert_logged_in_order(log: &OperationLog, expected: &[LogType]) {
    let mut wanted = expected.iter().peekable();
    for entry in log.entries() {
        if wanted.peek().is_some_and(|t| **t == entry.log_type) {
            wanted.next();
        }
    }
    if let Some(missing) = wanted.next() {
        panic!(
            "Expected {:?} in order, {:?} missing or out of order. Log:\n{}",
            expected, missing, log
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_ops::ResultPayload;

    fn sample_log() -> OperationLog {
        let mut log = OperationLog::new();
        log.add(LogType::MiStart, 0);
        log.add_with(LogType::MiKeyring, 1, ["A1"]);
        log.add(LogType::MiSuccess, 0);
        log
    }

    #[test]
    fn test_assert_ok() {
        let result: Result<i32, &str> = Ok(42);
        assert_eq!(assert_ok(result), 42);
    }

    #[test]
    #[should_panic(expected = "Expected Ok, got Err")]
    fn test_assert_ok_panics_on_err() {
        let result: Result<i32, &str> = Err("error");
        let _ = assert_ok(result);
    }

    #[test]
    fn test_logged_in_order() {
        let log = sample_log();
        assert_logged(&log, LogType::MiKeyring);
        assert_not_logged(&log, LogType::MiCancelled);
        assert_logged_in_order(&log, &[LogType::MiStart, LogType::MiSuccess]);
    }

    #[test]
    #[should_panic(expected = "missing or out of order")]
    fn test_logged_in_order_rejects_reversed() {
        assert_logged_in_order(&sample_log(), &[LogType::MiSuccess, LogType::MiStart]);
    }

    #[test]
    #[should_panic(expected = "Expected status")]
    fn test_assert_status_mismatch() {
        let result = OperationResult::error(sample_log(), ResultPayload::None);
        assert_status(&result, ResultStatus::Ok);
    }
}
