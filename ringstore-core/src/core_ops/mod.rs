//! Operation plumbing shared by the engines
//!
//! Every engine entry point returns an [`OperationResult`]: a status, a
//! typed and indented log, and a payload specific to the operation.
//! Progress and cancellation flow the other way through
//! [`ProgressReporter`] and [`CancelToken`].

mod log;
mod progress;
mod result;

pub use log::{EntrySeverity, LogEntry, LogType, OperationLog};
pub use progress::{
    CancelToken, NoopProgress, ProgressMessage, ProgressReporter, ProgressScaler, TracingProgress,
};
pub use result::{
    ImportKeyResult, ImportStatus, OperationResult, ResultPayload, ResultStatus,
};
