//! Per-disk worker pool: one FIFO queue and a fixed set of worker threads
//! per physical disk.
//!
//! # Architecture
//!
//! ```text
//! submit/placement ---> [unbounded FIFO] ---> worker 0 ... worker C-1
//!                            |                    |
//!                            |                    +-- claim check (replicated)
//!                            |                    +-- queue-wait accounting
//!                            |                    +-- execution wrapper
//!                            +-- running-or-queued counter (atomic)
//! ```
//!
//! Workers block on the queue; `stop()` wakes every blocked worker by
//! dropping the shared shutdown sender, and raises the interrupt flag so a
//! worker that dequeued a task in the same instant does not start it.
//!
//! # Shutdown Protocol
//!
//! 1. `stop()` raises the interrupt flag and drops the shutdown sender.
//! 2. Workers blocked in `select!` wake on the disconnected shutdown
//!    channel and exit their loop.
//! 3. A worker that raced a dequeue against the signal re-checks the flag
//!    before touching the task and exits without executing it. Abandoned
//!    queue entries are neither executed nor failed, and their
//!    running-or-queued counts are not rolled back.
//! 4. In-flight work is not joined; it observes the flag at its next I/O
//!    boundary and surfaces an interrupted failure through the normal path.
//!
//! Queues also drain-and-exit when every sender disconnects (scheduler
//! drop without an explicit `stop()`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{select, Receiver, Sender};

use crate::disk_map::DiskId;
use crate::errors::TaskError;
use crate::events::SchedulerEvent;
use crate::execute::{run_task, Collaborators, Outcome};
use crate::task::{DiskTask, InterruptFlag, TaskKind};

// ============================================================================
// Queue payload
// ============================================================================

/// One queue entry: the task plus its enqueue instant, so the dequeuing
/// worker can record the actual FIFO wait.
pub(crate) struct Queued {
    task: Arc<DiskTask>,
    enqueued: Instant,
}

// ============================================================================
// Counters
// ============================================================================

/// Snapshot of one pool's counters.
///
/// `executed` counts tasks whose work body ran, regardless of outcome;
/// `succeeded + failed + interrupted == executed`. `claims_declined` counts
/// replicated-write queue entries dropped after losing the claim.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DiskPoolStats {
    pub executed: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub interrupted: u64,
    pub claims_declined: u64,
    /// Cumulative nanoseconds spent in work bodies.
    pub exec_ns: u64,
    /// Cumulative nanoseconds tasks waited in this disk's queue.
    pub queue_wait_ns: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    executed: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    interrupted: AtomicU64,
    claims_declined: AtomicU64,
    exec_ns: AtomicU64,
    queue_wait_ns: AtomicU64,
}

impl PoolCounters {
    fn record_declined(&self) {
        self.claims_declined.fetch_add(1, Ordering::AcqRel);
    }

    fn record_wait(&self, ns: u64) {
        self.queue_wait_ns.fetch_add(ns, Ordering::AcqRel);
    }

    fn record_outcome(&self, outcome: Outcome, exec_ns: u64) {
        self.executed.fetch_add(1, Ordering::AcqRel);
        self.exec_ns.fetch_add(exec_ns, Ordering::AcqRel);
        let bucket = match outcome {
            Outcome::Succeeded => &self.succeeded,
            Outcome::Failed => &self.failed,
            Outcome::Interrupted => &self.interrupted,
        };
        bucket.fetch_add(1, Ordering::AcqRel);
    }

    fn snapshot(&self) -> DiskPoolStats {
        DiskPoolStats {
            executed: self.executed.load(Ordering::Acquire),
            succeeded: self.succeeded.load(Ordering::Acquire),
            failed: self.failed.load(Ordering::Acquire),
            interrupted: self.interrupted.load(Ordering::Acquire),
            claims_declined: self.claims_declined.load(Ordering::Acquire),
            exec_ns: self.exec_ns.load(Ordering::Acquire),
            queue_wait_ns: self.queue_wait_ns.load(Ordering::Acquire),
        }
    }
}

// ============================================================================
// DiskPool
// ============================================================================

/// Bounded-concurrency worker pool for one physical disk.
///
/// Worker handles are kept only so the threads stay attributable in
/// debuggers; the pool never joins them (shutdown is signal-and-return).
pub(crate) struct DiskPool {
    disk: DiskId,
    name: Arc<str>,
    tx: Sender<Queued>,
    outstanding: Arc<AtomicUsize>,
    counters: Arc<PoolCounters>,
    _workers: Vec<JoinHandle<()>>,
}

impl DiskPool {
    /// Start `threads` workers for `disk`. Worker threads are named
    /// `disk-<name>-<index>` so they are attributable in stack dumps.
    pub(crate) fn spawn(
        disk: DiskId,
        name: Arc<str>,
        threads: usize,
        shutdown: Receiver<()>,
        interrupt: InterruptFlag,
        collab: Arc<Collaborators>,
    ) -> Self {
        debug_assert!(threads > 0, "pool must have at least one worker");

        let (tx, rx) = crossbeam_channel::unbounded::<Queued>();
        let outstanding = Arc::new(AtomicUsize::new(0));
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(threads);
        for worker in 0..threads {
            let ctx = WorkerCtx {
                disk,
                worker,
                queue: rx.clone(),
                shutdown: shutdown.clone(),
                interrupt: interrupt.clone(),
                collab: Arc::clone(&collab),
                outstanding: Arc::clone(&outstanding),
                counters: Arc::clone(&counters),
            };
            let handle = thread::Builder::new()
                .name(format!("disk-{name}-{worker}"))
                .spawn(move || worker_loop(ctx))
                .expect("failed to spawn disk worker thread");
            workers.push(handle);
        }

        DiskPool {
            disk,
            name,
            tx,
            outstanding,
            counters,
            _workers: workers,
        }
    }

    /// Queue a task on this disk.
    ///
    /// The running-or-queued count is incremented before the send so the
    /// load snapshot never under-reports. A disconnected queue means the
    /// workers are gone (scheduler stopped and exited); the count is rolled
    /// back and the caller fails the task.
    pub(crate) fn enqueue(&self, task: &Arc<DiskTask>) -> Result<(), TaskError> {
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        let entry = Queued {
            task: Arc::clone(task),
            enqueued: Instant::now(),
        };
        if self.tx.send(entry).is_err() {
            self.outstanding.fetch_sub(1, Ordering::AcqRel);
            return Err(TaskError::Interrupted);
        }
        Ok(())
    }

    #[inline]
    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    /// Current running-or-queued count for this disk.
    pub(crate) fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    pub(crate) fn stats(&self) -> DiskPoolStats {
        self.counters.snapshot()
    }
}

// ============================================================================
// Worker loop
// ============================================================================

struct WorkerCtx {
    disk: DiskId,
    worker: usize,
    queue: Receiver<Queued>,
    shutdown: Receiver<()>,
    interrupt: InterruptFlag,
    collab: Arc<Collaborators>,
    outstanding: Arc<AtomicUsize>,
    counters: Arc<PoolCounters>,
}

fn worker_loop(ctx: WorkerCtx) {
    loop {
        let entry = select! {
            recv(ctx.queue) -> msg => match msg {
                Ok(entry) => entry,
                // Every sender dropped: scheduler is gone, drain is over.
                Err(_) => break,
            },
            // The shutdown sender never sends; disconnection is the signal.
            recv(ctx.shutdown) -> _ => break,
        };

        // A dequeue can race the shutdown signal. Re-check before touching
        // the task so no task logic starts after stop().
        if ctx.interrupt.is_raised() {
            break;
        }

        let task = entry.task;

        // Replicated writes settle their claim here; losers drop the entry
        // without running any task logic.
        if let TaskKind::ReplicatedWrite(claim) = task.kind() {
            if !claim.claim(ctx.disk) {
                ctx.counters.record_declined();
                ctx.outstanding.fetch_sub(1, Ordering::AcqRel);
                continue;
            }
        }

        let wait_ns = entry.enqueued.elapsed().as_nanos() as u64;
        task.context().add_queue_wait_ns(wait_ns);
        ctx.counters.record_wait(wait_ns);

        let (outcome, exec_ns) = run_task(&task, ctx.disk, &ctx.interrupt, &ctx.collab);
        ctx.counters.record_outcome(outcome, exec_ns);
        ctx.outstanding.fetch_sub(1, Ordering::AcqRel);
    }

    ctx.collab.events.emit(SchedulerEvent::WorkerExited {
        disk: ctx.disk,
        worker: ctx.worker,
    });
}

// ============================================================================
// Tests
// ============================================================================
