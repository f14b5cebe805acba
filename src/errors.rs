//! Task-level error taxonomy.
//!
//! Every error raised on behalf of a task is converted into a [`TaskError`]
//! and delivered through the task's completion contract; the scheduler
//! itself never loses a worker thread to a task error. The enum is
//! `#[non_exhaustive]` so classification can grow without breaking callers;
//! match with a fallback arm.
//!
//! # Design Notes
//! - `Io` preserves its source so diagnostics stay actionable.
//! - `Interrupted` is an expected shutdown artifact, not a user-visible
//!   failure; it still flows through the failure path so upstream
//!   bookkeeping stays consistent, but sinks report it at low severity.
//! - `Fatal` additionally escalates to the process-wide fatal handler; the
//!   scheduler does not attempt recovery.

use std::fmt;
use std::io;

use crate::disk_map::DiskId;

/// Errors raised while placing or executing a disk task.
#[derive(Debug)]
#[non_exhaustive]
pub enum TaskError {
    /// The submitted task kind has no placement policy in this scheduler.
    UnsupportedKind {
        /// Name of the offending kind, for diagnostics.
        kind: &'static str,
    },
    /// A placement decision produced a disk id outside the known set.
    ///
    /// This indicates a bug in a placement policy, not a transient
    /// condition.
    UnknownDisk(DiskId),
    /// I/O error raised by the task's execution body.
    Io(io::Error),
    /// Execution was cut short because the scheduler is shutting down.
    Interrupted,
    /// Process-fatal condition (e.g. resource exhaustion).
    Fatal(String),
}

impl TaskError {
    /// Creates an I/O error variant.
    #[inline]
    pub fn io(err: io::Error) -> Self {
        Self::Io(err)
    }

    /// Whether this error is a shutdown artifact rather than a real failure.
    ///
    /// Covers both the explicit [`TaskError::Interrupted`] variant and I/O
    /// errors whose kind is `Interrupted` (a read or write cut off at the
    /// I/O layer).
    pub fn is_interrupted(&self) -> bool {
        match self {
            Self::Interrupted => true,
            Self::Io(err) => err.kind() == io::ErrorKind::Interrupted,
            _ => false,
        }
    }

    /// Whether this error must escalate to the process-wide fatal handler.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnsupportedKind { kind } => {
                write!(f, "unsupported disk task kind: {kind}")
            }
            Self::UnknownDisk(id) => write!(f, "unknown disk identifier: {id}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Interrupted => write!(f, "interrupted during shutdown"),
            Self::Fatal(detail) => write!(f, "process-fatal error: {detail}"),
        }
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TaskError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
