//! File-backed snapshot caches
//!
//! Ordered, count-prefixed sequences of records written in one pass and
//! read back in one pass. The consolidation and migration engines park
//! keyrings here while the live store is rebuilt or rewritten.

mod errors;
mod snapshot_cache;

pub use errors::{CacheError, CacheResult};
pub use snapshot_cache::{CacheReader, SnapshotCache, MAX_FRAME_LEN};

/// Own public keyrings saved before a rebuild
pub const CONSOLIDATE_OWN_PUBLIC: &str = "consolidate_own_public.pcl";

/// Secret keyrings saved before a rebuild
pub const CONSOLIDATE_SECRET: &str = "consolidate_secret.pcl";

/// Foreign public keyrings saved before a rebuild
pub const CONSOLIDATE_FOREIGN_PUBLIC: &str = "consolidate_foreign_public.pcl";

/// Keyrings queued for a background import
pub const KEY_IMPORT: &str = "key_import.pcl";

/// Pre-migration secret keyrings
pub const MIGRATE_SECRET: &str = "migrate_secret.pcl";
