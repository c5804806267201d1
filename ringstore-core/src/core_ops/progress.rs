/*
    progress.rs - Progress reporting and cooperative cancellation

    Engines report through a ProgressReporter they are handed. A
    ProgressScaler maps a sub-step's 0..max onto a slice of the parent's
    percentage range so nested steps share one progress bar.
*/

use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// What the engine is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ProgressMessage {
    Consolidating,
    SavingOwnPublic,
    SavingSecret,
    SavingForeignPublic,
    ClearingDatabase,
    ImportingOwnPublic,
    ImportingSecret,
    ImportingForeignPublic,
    CachingSecret,
    CollectingPassphrases,
    Migrating,
    Reverting,
    Importing,
}

impl fmt::Display for ProgressMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProgressMessage::Consolidating => "consolidating database",
            ProgressMessage::SavingOwnPublic => "saving own public keyrings",
            ProgressMessage::SavingSecret => "saving secret keyrings",
            ProgressMessage::SavingForeignPublic => "saving foreign public keyrings",
            ProgressMessage::ClearingDatabase => "clearing database",
            ProgressMessage::ImportingOwnPublic => "importing own public keyrings",
            ProgressMessage::ImportingSecret => "importing secret keyrings",
            ProgressMessage::ImportingForeignPublic => "importing foreign public keyrings",
            ProgressMessage::CachingSecret => "caching secret keyrings",
            ProgressMessage::CollectingPassphrases => "collecting passphrases",
            ProgressMessage::Migrating => "re-encrypting keyrings",
            ProgressMessage::Reverting => "restoring keyrings",
            ProgressMessage::Importing => "importing keyrings",
        };
        f.write_str(text)
    }
}

/// Sink for progress updates; called from worker threads
pub trait ProgressReporter: Send + Sync {
    /// `message` of `None` keeps the previous message
    fn set_progress(&self, message: Option<ProgressMessage>, current: usize, max: usize);

    /// The running operation cannot be cancelled from here on
    fn set_prevent_cancel(&self);
}

impl<P: ProgressReporter + ?Sized> ProgressReporter for Arc<P> {
    fn set_progress(&self, message: Option<ProgressMessage>, current: usize, max: usize) {
        (**self).set_progress(message, current, max)
    }

    fn set_prevent_cancel(&self) {
        (**self).set_prevent_cancel()
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressReporter for NoopProgress {
    fn set_progress(&self, _message: Option<ProgressMessage>, _current: usize, _max: usize) {}

    fn set_prevent_cancel(&self) {}
}

/// Reports progress as tracing events
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressReporter for TracingProgress {
    fn set_progress(&self, message: Option<ProgressMessage>, current: usize, max: usize) {
        match message {
            Some(message) => info!(current, max, "{}", message),
            None => debug!(current, max, "progress"),
        }
    }

    fn set_prevent_cancel(&self) {
        debug!("Cancellation disabled for running operation");
    }
}

/// Maps `0..=max` of a sub-step onto `from..=to` of the parent's `0..=parent_max`
pub struct ProgressScaler<'a> {
    inner: &'a dyn ProgressReporter,
    from: usize,
    to: usize,
    parent_max: usize,
}

impl<'a> ProgressScaler<'a> {
    pub fn new(inner: &'a dyn ProgressReporter, from: usize, to: usize, parent_max: usize) -> Self {
        Self {
            inner,
            from,
            to: to.max(from),
            parent_max,
        }
    }

    pub fn scale(&self, current: usize, max: usize) -> usize {
        if max == 0 {
            return self.from;
        }
        let current = current.min(max);
        self.from + (self.to - self.from) * current / max
    }
}

impl ProgressReporter for ProgressScaler<'_> {
    fn set_progress(&self, message: Option<ProgressMessage>, current: usize, max: usize) {
        self.inner
            .set_progress(message, self.scale(current, max), self.parent_max);
    }

    fn set_prevent_cancel(&self) {
        self.inner.set_prevent_cancel();
    }
}

/// Cooperative cancellation flag, checked between rows or keyrings
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
