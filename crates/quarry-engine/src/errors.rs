//! Engine-level error kinds that callers discriminate on.

use std::time::Duration;

/// An operation stopped before completion, either by external cancellation
/// or by exceeding its deadline. Callers that need to tell the two apart
/// downcast with `err.downcast_ref::<Interrupted>()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Interrupted {
    #[error("operation cancelled")]
    Cancelled,
    #[error("timed out after {}", humantime::format_duration(*.0))]
    DeadlineExceeded(Duration),
}
