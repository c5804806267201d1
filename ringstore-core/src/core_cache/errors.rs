/*
    errors.rs - Error types for snapshot caches
*/

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache file not found: {}", .0.display())]
    NotFound(PathBuf),

    /// Bad magic, truncated entry or checksum mismatch
    #[error("Corrupted cache: {0}")]
    Corrupted(String),

    #[error("Cache serialization error: {0}")]
    Serialization(String),

    #[error("Cache expected {expected} entries but the source yielded {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("Cache entry {index} is {len} bytes, the limit is {max}")]
    EntryTooLarge { index: usize, len: usize, max: usize },

    #[error("Read past the end of a cache holding {size} entries")]
    Exhausted { size: usize },
}

pub type CacheResult<T> = Result<T, CacheError>;

impl From<bincode::Error> for CacheError {
    fn from(err: bincode::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_error_display() {
        let err = CacheError::CountMismatch { expected: 3, actual: 2 };
        assert!(err.to_string().contains("expected 3"));

        let err = CacheError::NotFound(PathBuf::from("/tmp/x.pcl"));
        assert_eq!(err.to_string(), "Cache file not found: /tmp/x.pcl");
    }
}
