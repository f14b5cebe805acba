//! Uniform execution wrapper for one disk task.
//!
//! Runs the task's opaque work body, accounts elapsed nanoseconds into the
//! task context, classifies failures, and reports exactly one completion
//! upstream. Accounting always happens before the completion report so
//! downstream metrics are consistent whether the task succeeded or failed.

use std::sync::Arc;
use std::time::Instant;

use crate::disk_map::DiskId;
use crate::events::{EventSink, SchedulerEvent};
use crate::task::{CompletionSink, DiskTask, FatalHandler, InterruptFlag};

/// Injected collaborators shared by every worker thread.
pub(crate) struct Collaborators {
    pub(crate) completion: Arc<dyn CompletionSink>,
    pub(crate) fatal: Arc<dyn FatalHandler>,
    pub(crate) events: Arc<dyn EventSink>,
}

/// How one execution attempt ended, for pool counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Outcome {
    Succeeded,
    Failed,
    Interrupted,
}

/// Execute `task` against `disk` and report the outcome.
///
/// Returns the outcome plus the execution nanoseconds that were added to
/// the task context.
///
/// Failure handling, in order:
/// 1. account elapsed time (before any notification),
/// 2. escalate process-fatal errors to the fatal handler (local handling
///    continues either way),
/// 3. emit a diagnostic: `debug` for interrupted-I/O shutdown artifacts,
///    `error` otherwise,
/// 4. deliver the failure through the task's contract, which notifies the
///    upstream scheduler.
pub(crate) fn run_task(
    task: &DiskTask,
    disk: DiskId,
    interrupt: &InterruptFlag,
    collab: &Collaborators,
) -> (Outcome, u64) {
    let started = Instant::now();
    let result = task.work().execute(disk, interrupt);
    let elapsed_ns = started.elapsed().as_nanos() as u64;

    task.context().add_disk_ns(elapsed_ns);

    match result {
        Ok(()) => {
            task.report_success(&*collab.completion);
            (Outcome::Succeeded, elapsed_ns)
        }
        Err(error) => {
            if error.is_fatal() {
                collab.fatal.on_fatal(&error);
            }

            let interrupted = error.is_interrupted();
            if interrupted {
                collab.events.emit(SchedulerEvent::TaskInterrupted {
                    task: task.id(),
                    disk,
                });
            } else {
                collab.events.emit(SchedulerEvent::TaskFailed {
                    task: task.id(),
                    disk: Some(disk),
                    error: &error,
                });
            }

            task.report_failure(&*collab.completion, error);
            let outcome = if interrupted {
                Outcome::Interrupted
            } else {
                Outcome::Failed
            };
            (outcome, elapsed_ns)
        }
    }
}
