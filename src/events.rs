//! Structured scheduler diagnostics.
//!
//! Workers emit [`SchedulerEvent`] values through an [`EventSink`]. The
//! default [`WriterSink`] renders each event as one `key=value` line and
//! writes it atomically to the underlying writer; formatting happens
//! outside the lock, which is held only for the `write_all` call.
//!
//! Interrupted-I/O events are expected shutdown artifacts and carry the
//! `debug` level; real task failures carry `error`.

use std::io::Write;
use std::sync::Mutex;

use crate::disk_map::DiskId;
use crate::errors::TaskError;
use crate::task::TaskId;

/// Diagnostic event emitted by scheduler internals.
///
/// Variants borrow the error to avoid allocation on the failure path.
pub enum SchedulerEvent<'a> {
    /// A task failed for a reason that is not a shutdown artifact.
    TaskFailed {
        task: TaskId,
        /// Disk the task was running against, if it got that far.
        disk: Option<DiskId>,
        error: &'a TaskError,
    },
    /// A task was cut short by shutdown; expected, low severity.
    TaskInterrupted { task: TaskId, disk: DiskId },
    /// A placement decision failed on the asynchronous placement stage.
    PlacementFailed { task: TaskId, error: &'a TaskError },
    /// A pool worker left its loop (shutdown or scheduler drop).
    WorkerExited { disk: DiskId, worker: usize },
}

impl SchedulerEvent<'_> {
    /// Severity label for line-oriented sinks.
    pub fn level(&self) -> &'static str {
        match self {
            Self::TaskFailed { .. } | Self::PlacementFailed { .. } => "error",
            Self::TaskInterrupted { .. } | Self::WorkerExited { .. } => "debug",
        }
    }
}

/// Thread-safe sink for scheduler diagnostics.
///
/// Implementations must tolerate concurrent calls from every worker thread
/// and must not block indefinitely.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: SchedulerEvent<'_>);
}

/// Sink that drops every event. Useful when the embedding runtime has its
/// own diagnostics and only consumes completion notifications.
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: SchedulerEvent<'_>) {}
}

/// Line-oriented sink over any writer.
pub struct WriterSink<W: Write + Send> {
    inner: Mutex<W>,
}

impl<W: Write + Send> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        WriterSink {
            inner: Mutex::new(writer),
        }
    }
}

impl<W: Write + Send> EventSink for WriterSink<W> {
    fn emit(&self, event: SchedulerEvent<'_>) {
        let mut line = String::with_capacity(96);
        render(&event, &mut line);
        line.push('\n');

        let mut guard = match self.inner.lock() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Diagnostics are best-effort; a failed write must not take a
        // worker down with it.
        let _ = guard.write_all(line.as_bytes());
    }
}

fn render(event: &SchedulerEvent<'_>, out: &mut String) {
    use std::fmt::Write as _;

    out.push_str(event.level());
    match event {
        SchedulerEvent::TaskFailed { task, disk, error } => {
            let _ = write!(out, " task={task}");
            if let Some(disk) = disk {
                let _ = write!(out, " disk={disk}");
            }
            let _ = write!(out, " failed: {error}");
        }
        SchedulerEvent::TaskInterrupted { task, disk } => {
            let _ = write!(out, " task={task} disk={disk} interrupted during shutdown");
        }
        SchedulerEvent::PlacementFailed { task, error } => {
            let _ = write!(out, " task={task} placement failed: {error}");
        }
        SchedulerEvent::WorkerExited { disk, worker } => {
            let _ = write!(out, " disk={disk} worker={worker} exited");
        }
    }
}
