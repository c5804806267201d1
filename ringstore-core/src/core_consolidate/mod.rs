//! Database consolidation
//!
//! Rebuilds the live store from snapshot caches: every keyring is saved
//! to disk, the store is wiped and everything is imported again. The
//! "cached consolidate" preference marks the window in which the store is
//! incomplete, so an interrupted rebuild is resumed from the caches on the
//! next start.

mod engine;
mod guard;

pub use engine::{ConsolidationEngine, ConsolidationPhase};
pub use guard::{ConsolidationGuard, ConsolidationPermit};
