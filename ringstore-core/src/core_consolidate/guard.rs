//! Single-writer guard for the destructive rebuild

use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// Admits one rebuild at a time.
///
/// Engines normally share [`ConsolidationGuard::process_wide`]; tests build
/// their own so they do not contend with each other.
#[derive(Debug, Default)]
pub struct ConsolidationGuard {
    running: Mutex<bool>,
}

impl ConsolidationGuard {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn process_wide() -> Arc<Self> {
        static GUARD: OnceLock<Arc<ConsolidationGuard>> = OnceLock::new();
        GUARD.get_or_init(ConsolidationGuard::new).clone()
    }

    /// Take the guard, or `None` if a rebuild is already running
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConsolidationPermit> {
        let mut running = self.running.lock().unwrap_or_else(PoisonError::into_inner);
        if *running {
            return None;
        }
        *running = true;
        Some(ConsolidationPermit {
            guard: Arc::clone(self),
        })
    }

    pub fn is_held(&self) -> bool {
        *self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases the guard when dropped
#[derive(Debug)]
pub struct ConsolidationPermit {
    guard: Arc<ConsolidationGuard>,
}

impl Drop for ConsolidationPermit {
    fn drop(&mut self) {
        *self
            .guard
            .running
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let guard = ConsolidationGuard::new();
        let permit = guard.try_acquire().unwrap();
        assert!(guard.is_held());
        assert!(guard.try_acquire().is_none());

        drop(permit);
        assert!(!guard.is_held());
        assert!(guard.try_acquire().is_some());
    }

    #[test]
    fn test_process_wide_is_shared() {
        assert!(Arc::ptr_eq(
            &ConsolidationGuard::process_wide(),
            &ConsolidationGuard::process_wide()
        ));
    }
}
