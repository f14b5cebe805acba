//! Disk task scheduler: placement and bounded-concurrency execution across a
//! fixed set of physical disks.
//!
//! ## Scope
//! This crate is the disk-resource-management core of a task-execution
//! runtime. Callers submit self-contained disk tasks without knowing disk
//! topology or load; the scheduler decides placement, queues the task on the
//! right disk, executes it on a bounded per-disk worker pool, records timing
//! into the task's context, and reports the outcome upstream.
//!
//! ## Key invariants
//! - Per-disk concurrency is bounded by a fixed worker count; queues are FIFO.
//! - A replicated write lives in every disk's queue but executes exactly once,
//!   at whichever disk wins the task's atomic claim.
//! - Disk-time and queue-wait accumulators are updated before any completion
//!   notification, on success and on failure alike.
//! - Task errors never kill a worker thread; they become structured failures
//!   delivered through the task's completion contract.
//! - Shutdown is interrupt-style: `stop()` signals workers and returns without
//!   draining in-flight work.
//!
//! ## Submission flow
//! `DiskTask -> DiskScheduler::submit -> (broadcast | pinned | placement
//! stage | directory pick) -> per-disk FIFO -> worker -> execution wrapper ->
//! CompletionSink`
//!
//! ## Notable entry points
//! - [`DiskScheduler`] / [`SchedulerConfig`]: construction, `submit`,
//!   `disk_load_snapshot`, `stop`.
//! - [`DiskTask`] / [`TaskKind`]: task identity and placement policy.
//! - [`DiskMap`]: the fixed disk set and its human-readable names.
//! - [`CompletionSink`] / [`FatalHandler`] / [`EventSink`]: injectable
//!   collaborators, substitutable in tests.
//! - [`ProbePlacement`]: trial-write placement for remotely sourced writes.

pub mod disk_map;
pub mod errors;
pub mod events;
mod execute;
pub mod placement;
mod pool;
pub mod router;
pub mod task;

pub use disk_map::{DiskId, DiskMap};
pub use errors::TaskError;
pub use events::{EventSink, NullSink, SchedulerEvent, WriterSink};
pub use placement::ProbePlacement;
pub use pool::DiskPoolStats;
pub use router::{DiskScheduler, SchedulerConfig};
pub use task::{
    BlockId, CompletionSink, DirPick, DiskTask, DiskWork, FatalHandler, InterruptFlag,
    RemotePlacement, ReplicatedWrite, TaskContext, TaskId, TaskKind,
};
