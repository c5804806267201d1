//! Keyring import
//!
//! A [`KeyringImporter`] imports one keyring; the [`ImportService`] drives
//! it serially or on a bounded worker pool, and the [`ImportAccumulator`]
//! folds the per-keyring results into one.

mod accumulator;
mod importer;
mod service;

pub use accumulator::ImportAccumulator;
pub use importer::{KeyringImporter, StoreImporter};
pub use service::ImportService;
