//! Test utilities shared by unit and integration tests
//!
//! Fixtures build keyrings sealed the way the store holds them; the
//! doubles script passphrase prompts, record progress and inject store
//! failures.

pub mod assertions;
pub mod doubles;
pub mod fixtures;

pub use assertions::*;
pub use doubles::*;
pub use fixtures::*;
