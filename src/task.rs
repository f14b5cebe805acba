//! Disk task model: identity, placement policy, timing context, and the
//! completion contract.
//!
//! # Architecture
//!
//! ```text
//! DiskTask (Arc-shared)
//!     |-- TaskId / BlockId        identity and target data block
//!     |-- TaskKind                closed enum, one placement policy per kind
//!     |       ReplicatedWrite ->  queued on every disk, atomic claim
//!     |       Read / Remove   ->  pinned to an embedded DiskId
//!     |       RemoteWrite     ->  trial-write placement (async stage)
//!     |       DiskResident    ->  synchronous directory pick
//!     |       Foreign         ->  no policy, rejected at submit
//!     |-- TaskContext             atomic nanosecond accumulators
//!     |-- dyn DiskWork            opaque execution body, owned by the task
//!     +-- completion guard        at most one success/failure report
//! ```
//!
//! # Exactly-Once Claim
//!
//! A replicated write is enqueued on every disk simultaneously. Each worker
//! that dequeues it tries [`ReplicatedWrite::claim`] for its own disk; a
//! single compare-and-swap on the task-owned winner slot guarantees exactly
//! one worker gets `true`, with no coordination between the per-disk pools.
//! Losing workers drop their queue entry without touching the work body.
//!
//! # Correctness Invariants
//!
//! - The claim succeeds for at most one disk over the task's lifetime.
//! - `report_success` / `report_failure` deliver at most one notification
//!   total, guarded by a task-owned flag.
//! - Context accumulators only grow, and are written before the
//!   corresponding completion report (enforced by the execution wrapper).

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use crate::disk_map::{DiskId, DiskMap};
use crate::errors::TaskError;

// ============================================================================
// Identity
// ============================================================================

/// Identity of one scheduled disk task.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TaskId(pub u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the data block a task targets.
///
/// Opaque to the scheduler; shared cheaply because replicated writes carry
/// one task through many queues.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct BlockId(Arc<str>);

impl BlockId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        BlockId(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Timing context
// ============================================================================

/// Per-task timing accumulators, nanosecond precision.
///
/// Written by worker threads, read by upstream metrics consumers after the
/// completion notification; atomics keep the counters consistent without a
/// lock. Both counters only ever grow.
#[derive(Debug, Default)]
pub struct TaskContext {
    disk_ns: AtomicU64,
    queue_wait_ns: AtomicU64,
}

impl TaskContext {
    /// Add time spent executing against a disk.
    pub fn add_disk_ns(&self, ns: u64) {
        self.disk_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Add time spent waiting in a disk queue.
    pub fn add_queue_wait_ns(&self, ns: u64) {
        self.queue_wait_ns.fetch_add(ns, Ordering::AcqRel);
    }

    /// Total execution nanoseconds accumulated so far.
    pub fn disk_ns(&self) -> u64 {
        self.disk_ns.load(Ordering::Acquire)
    }

    /// Total queue-wait nanoseconds accumulated so far.
    pub fn queue_wait_ns(&self) -> u64 {
        self.queue_wait_ns.load(Ordering::Acquire)
    }
}

// ============================================================================
// Interruption
// ============================================================================

/// Cooperative cancellation flag shared between the scheduler and task
/// execution bodies.
///
/// `stop()` raises the flag; long-running work checks it at I/O boundaries
/// via [`InterruptFlag::check`] and bails out with
/// [`TaskError::Interrupted`]. There is no other cancellation primitive.
#[derive(Clone, Debug, Default)]
pub struct InterruptFlag(Arc<AtomicBool>);

impl InterruptFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Irreversible.
    pub fn raise(&self) {
        self.0.store(true, Ordering::Release);
    }

    #[inline]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    /// Bail-out helper for execution bodies: `interrupt.check()?`.
    pub fn check(&self) -> Result<(), TaskError> {
        if self.is_raised() {
            Err(TaskError::Interrupted)
        } else {
            Ok(())
        }
    }
}

// ============================================================================
// Collaborator contracts
// ============================================================================

/// Opaque execution body owned by the task.
///
/// `execute` runs on a pool worker thread with the claim already settled:
/// `disk` is the single disk this task runs against. Implementations should
/// poll `interrupt` at I/O boundaries and return
/// [`TaskError::Interrupted`] when it is raised.
pub trait DiskWork: Send + Sync {
    fn execute(&self, disk: DiskId, interrupt: &InterruptFlag) -> Result<(), TaskError>;
}

/// Upstream execution-graph scheduler notification surface.
///
/// Implementations must be callable from any worker thread. Exactly one of
/// the two methods is invoked per executed task, after the task's timing
/// context has been updated.
pub trait CompletionSink: Send + Sync {
    fn task_succeeded(&self, task: &DiskTask);
    fn task_failed(&self, task: &DiskTask, error: &TaskError);
}

/// Process-wide fatal-error escalation point.
///
/// Injectable so tests can substitute a capturing stub; production wiring
/// typically aborts or begins process teardown. Invoked in addition to the
/// normal failure report, never instead of it.
pub trait FatalHandler: Send + Sync {
    fn on_fatal(&self, error: &TaskError);
}

/// Placement decision for remotely sourced writes.
///
/// Runs on the single placement thread, strictly serialized with every
/// other remote write's decision. `choose_dir` is expected to perform a
/// small, unsynced trial write (see [`crate::ProbePlacement`]).
pub trait RemotePlacement: Send + Sync {
    /// One-time setup before placement (may allocate buffers/state).
    fn initialize(&self) -> Result<(), TaskError> {
        Ok(())
    }

    /// Pick the disk this write should land on.
    fn choose_dir(&self, disks: &DiskMap) -> Result<DiskId, TaskError>;
}

/// Synchronous directory pick for disk-resident tasks whose placement needs
/// no I/O. Runs on the submitting caller's thread.
pub trait DirPick: Send + Sync {
    fn pick(&self, disks: &DiskMap) -> DiskId;
}

// ============================================================================
// Replicated-write claim
// ============================================================================

const NO_WINNER: u32 = u32::MAX;

/// Task-owned exactly-once disk assignment for replicated writes.
///
/// The winner slot starts empty; the first worker to CAS its disk id in
/// wins and executes, every later caller gets `false`. No lock spans the
/// per-disk pools.
#[derive(Debug)]
pub struct ReplicatedWrite {
    winner: AtomicU32,
}

impl ReplicatedWrite {
    pub fn new() -> Self {
        ReplicatedWrite {
            winner: AtomicU32::new(NO_WINNER),
        }
    }

    /// Try to assign this task to `disk`. Returns `true` to exactly one
    /// caller across all disks holding a copy.
    pub fn claim(&self, disk: DiskId) -> bool {
        self.winner
            .compare_exchange(NO_WINNER, disk.raw(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// The disk that won the claim, if any worker has claimed yet.
    pub fn winner(&self) -> Option<DiskId> {
        match self.winner.load(Ordering::Acquire) {
            NO_WINNER => None,
            raw => Some(DiskId::from_raw(raw)),
        }
    }
}

impl Default for ReplicatedWrite {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Task kind
// ============================================================================

/// Placement policy, one variant per supported task kind.
///
/// Closed on purpose: placement dispatch in the router is exhaustive and
/// reviewable, and [`TaskKind::Foreign`] is the explicit arm for kinds the
/// scheduler refuses.
pub enum TaskKind {
    /// Block write replicated into every disk queue; executes exactly once
    /// at the disk that wins the claim.
    ReplicatedWrite(ReplicatedWrite),
    /// Read of a block already resident on a specific disk.
    Read { disk: DiskId },
    /// Removal of a block already resident on a specific disk.
    Remove { disk: DiskId },
    /// Write of remotely sourced data; the disk is chosen by a trial write
    /// on the asynchronous placement stage.
    RemoteWrite(Box<dyn RemotePlacement>),
    /// Disk-resident task that can pick a directory without I/O.
    DiskResident(Box<dyn DirPick>),
    /// A kind this scheduler has no placement policy for; always rejected.
    Foreign,
}

impl TaskKind {
    /// Stable kind name for diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            Self::ReplicatedWrite(_) => "replicated-write",
            Self::Read { .. } => "read",
            Self::Remove { .. } => "remove",
            Self::RemoteWrite(_) => "remote-write",
            Self::DiskResident(_) => "disk-resident",
            Self::Foreign => "foreign",
        }
    }
}

impl fmt::Debug for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// DiskTask
// ============================================================================

/// One unit of scheduled disk I/O work.
///
/// Shared via `Arc` because a replicated write lives in several queues at
/// once. The execution body is opaque to the scheduler; the scheduler only
/// decides where and when it runs and reports how it went.
pub struct DiskTask {
    id: TaskId,
    block: BlockId,
    kind: TaskKind,
    context: TaskContext,
    work: Box<dyn DiskWork>,
    completed: AtomicBool,
}

impl DiskTask {
    pub fn new(id: TaskId, block: BlockId, kind: TaskKind, work: Box<dyn DiskWork>) -> Arc<Self> {
        Arc::new(DiskTask {
            id,
            block,
            kind,
            context: TaskContext::default(),
            work,
            completed: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn id(&self) -> TaskId {
        self.id
    }

    #[inline]
    pub fn block(&self) -> &BlockId {
        &self.block
    }

    #[inline]
    pub fn kind(&self) -> &TaskKind {
        &self.kind
    }

    #[inline]
    pub fn context(&self) -> &TaskContext {
        &self.context
    }

    pub(crate) fn work(&self) -> &dyn DiskWork {
        &*self.work
    }

    /// Whether a completion (success or failure) has been reported.
    pub fn is_completed(&self) -> bool {
        self.completed.load(Ordering::Acquire)
    }

    /// Report success upstream. At most one completion is ever delivered;
    /// later calls are ignored.
    pub fn report_success(&self, sink: &dyn CompletionSink) {
        if self.begin_completion() {
            sink.task_succeeded(self);
        }
    }

    /// Report failure through the task's contract, which notifies the
    /// upstream scheduler. At most one completion is ever delivered; later
    /// calls are ignored.
    pub fn report_failure(&self, sink: &dyn CompletionSink, error: TaskError) {
        if self.begin_completion() {
            sink.task_failed(self, &error);
        }
    }

    fn begin_completion(&self) -> bool {
        !self.completed.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for DiskTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiskTask")
            .field("id", &self.id)
            .field("block", &self.block)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================
