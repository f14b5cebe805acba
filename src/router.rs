//! Scheduler entry point: kind-based placement routing and lifecycle.
//!
//! # Architecture
//!
//! ```text
//!                         DiskScheduler::submit(task)
//!                                   |
//!            +----------------------+---------------------+
//!            |              |               |             |
//!     replicated write:     pinned (read/   remote write  disk-resident
//!     broadcast to every    remove) to its  -> hand-off   -> synchronous
//!     disk queue            embedded disk      queue         pick, enqueue
//!                                               |
//!                                        placement thread
//!                                        (trial write, then
//!                                         normal enqueue)
//! ```
//!
//! Unsupported kinds and out-of-set disk ids never reach a queue; they fail
//! the task through its completion contract and the scheduler keeps
//! running.
//!
//! # Lifecycle
//!
//! Construction builds one worker pool per known disk (a single configured
//! thread count, identical across disks) and starts the placement thread.
//! `stop()` is idempotent: it raises the interrupt flag and wakes every
//! pool worker, without draining in-flight work and without touching the
//! placement stage. Dropping the scheduler calls `stop()` (the best-effort
//! shutdown hook), then disconnects the hand-off queue and joins the
//! placement thread so queued placements drain.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;

use crate::disk_map::{DiskId, DiskMap};
use crate::errors::TaskError;
use crate::events::EventSink;
use crate::execute::Collaborators;
use crate::placement;
use crate::pool::{DiskPool, DiskPoolStats};
use crate::task::{CompletionSink, DiskTask, FatalHandler, InterruptFlag, TaskKind};

// ============================================================================
// Configuration
// ============================================================================

/// Scheduler configuration.
#[derive(Clone, Copy, Debug)]
pub struct SchedulerConfig {
    /// Worker threads per disk. The sizing that matters is disk parallelism:
    /// spinning disks rarely benefit from more than 1, SSDs from a few.
    pub threads_per_disk: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        SchedulerConfig { threads_per_disk: 1 }
    }
}

impl SchedulerConfig {
    /// Validate configuration. Panics on invalid values.
    pub fn validate(&self) {
        assert!(self.threads_per_disk > 0, "threads_per_disk must be > 0");
    }
}

// ============================================================================
// DiskScheduler
// ============================================================================

/// Disk task scheduler: fixed per-disk pools plus one placement thread.
pub struct DiskScheduler {
    disks: Arc<DiskMap>,
    pools: Arc<Vec<DiskPool>>,
    collab: Arc<Collaborators>,
    interrupt: InterruptFlag,
    /// Dropping this sender is the shutdown signal for every pool worker.
    shutdown: Mutex<Option<Sender<()>>>,
    /// Hand-off queue into the placement stage; `None` only during drop.
    placement_tx: Option<Sender<Arc<DiskTask>>>,
    placement_thread: Option<JoinHandle<()>>,
}

impl DiskScheduler {
    /// Build the pools and start every worker.
    ///
    /// # Panics
    ///
    /// Panics if `config` is invalid.
    pub fn new(
        disks: DiskMap,
        config: SchedulerConfig,
        completion: Arc<dyn CompletionSink>,
        fatal: Arc<dyn FatalHandler>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        config.validate();

        let disks = Arc::new(disks);
        let collab = Arc::new(Collaborators {
            completion,
            fatal,
            events,
        });
        let interrupt = InterruptFlag::new();

        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(0);
        let pools: Vec<DiskPool> = disks
            .ids()
            .map(|id| {
                let name = disks.name_arc(id).expect("id from the fixed set");
                DiskPool::spawn(
                    id,
                    name,
                    config.threads_per_disk,
                    shutdown_rx.clone(),
                    interrupt.clone(),
                    Arc::clone(&collab),
                )
            })
            .collect();
        let pools = Arc::new(pools);

        let (placement_tx, placement_rx) = crossbeam_channel::unbounded::<Arc<DiskTask>>();
        let placement_thread = placement::spawn(
            placement_rx,
            Arc::clone(&disks),
            Arc::clone(&pools),
            Arc::clone(&collab),
        );

        DiskScheduler {
            disks,
            pools,
            collab,
            interrupt,
            shutdown: Mutex::new(Some(shutdown_tx)),
            placement_tx: Some(placement_tx),
            placement_thread: Some(placement_thread),
        }
    }

    /// The fixed disk set this scheduler was built over.
    pub fn disks(&self) -> &DiskMap {
        &self.disks
    }

    /// Fire-and-forget placement and execution scheduling.
    ///
    /// Never blocks on disk I/O: pinned and replicated kinds enqueue
    /// directly, remote writes are handed to the placement stage, and the
    /// disk-resident pick runs without I/O on the caller's thread. Any
    /// placement problem fails the task through its completion contract.
    pub fn submit(&self, task: Arc<DiskTask>) {
        match task.kind() {
            TaskKind::ReplicatedWrite(_) => {
                for id in self.disks.ids() {
                    if let Err(error) = self.enqueue(id, &task) {
                        // Replica entries already queued are covered by the
                        // task's single-completion guard.
                        task.report_failure(&*self.collab.completion, error);
                        return;
                    }
                }
            }
            TaskKind::Read { disk } | TaskKind::Remove { disk } => {
                let disk = *disk;
                if let Err(error) = self.enqueue(disk, &task) {
                    task.report_failure(&*self.collab.completion, error);
                }
            }
            TaskKind::RemoteWrite(_) => {
                let tx = self
                    .placement_tx
                    .as_ref()
                    .expect("placement stage alive until drop");
                if tx.send(Arc::clone(&task)).is_err() {
                    task.report_failure(&*self.collab.completion, TaskError::Interrupted);
                }
            }
            TaskKind::DiskResident(pick) => {
                let disk = pick.pick(&self.disks);
                if let Err(error) = self.enqueue(disk, &task) {
                    task.report_failure(&*self.collab.completion, error);
                }
            }
            TaskKind::Foreign => {
                task.report_failure(
                    &*self.collab.completion,
                    TaskError::UnsupportedKind {
                        kind: task.kind().name(),
                    },
                );
            }
        }
    }

    fn enqueue(&self, disk: DiskId, task: &Arc<DiskTask>) -> Result<(), TaskError> {
        match self.pools.get(disk.index()) {
            Some(pool) => pool.enqueue(task),
            None => Err(TaskError::UnknownDisk(disk)),
        }
    }

    /// Current running-or-queued count per disk, keyed by disk name.
    ///
    /// Replicated writes count once per disk until their claim settles, so
    /// reported load is inflated while the race is open. Monitoring
    /// consumers rely on that behavior.
    pub fn disk_load_snapshot(&self) -> HashMap<String, usize> {
        self.pools
            .iter()
            .map(|pool| (pool.name().to_string(), pool.outstanding()))
            .collect()
    }

    /// Per-pool execution counters, keyed by disk name.
    pub fn pool_stats(&self) -> Vec<(String, DiskPoolStats)> {
        self.pools
            .iter()
            .map(|pool| (pool.name().to_string(), pool.stats()))
            .collect()
    }

    /// Interrupt every pool worker. Idempotent; returns without waiting
    /// for in-flight tasks, and does not stop the placement stage.
    pub fn stop(&self) {
        self.interrupt.raise();
        let mut guard = match self.shutdown.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        // Dropping the sender disconnects the channel and wakes every
        // worker blocked on it.
        guard.take();
    }
}

impl Drop for DiskScheduler {
    fn drop(&mut self) {
        self.stop();
        // Disconnect the hand-off queue, then let the placement thread
        // drain what is already queued and exit.
        self.placement_tx.take();
        if let Some(handle) = self.placement_thread.take() {
            let _ = handle.join();
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
