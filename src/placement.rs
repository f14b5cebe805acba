//! Asynchronous placement stage for remotely sourced writes.
//!
//! A single dedicated thread consumes the hand-off queue one task at a
//! time: initialize the task, ask it to choose a directory (a small,
//! deliberately unsynced trial write), then forward the task to the chosen
//! disk's queue. Serializing the stage keeps trial writes from interfering
//! with the bulk of disk I/O; placement throughput is the accepted cost.
//!
//! Placement errors are delegated to the task's failure contract. The
//! worker itself survives every error; it exits only when the hand-off
//! sender disconnects (scheduler drop), draining whatever is still queued
//! first.
//!
//! `stop()` intentionally does not interrupt this stage; queued placements
//! are expected to drain before process exit.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;

use crate::disk_map::{DiskId, DiskMap};
use crate::errors::TaskError;
use crate::events::SchedulerEvent;
use crate::execute::Collaborators;
use crate::pool::DiskPool;
use crate::task::{DiskTask, RemotePlacement, TaskKind};

// ============================================================================
// Stage worker
// ============================================================================

/// Start the placement thread. It blocks on `rx` and exits when every
/// sender is gone.
pub(crate) fn spawn(
    rx: Receiver<Arc<DiskTask>>,
    disks: Arc<DiskMap>,
    pools: Arc<Vec<DiskPool>>,
    collab: Arc<Collaborators>,
) -> JoinHandle<()> {
    thread::Builder::new()
        .name(String::from("disk-placement"))
        .spawn(move || placement_loop(rx, &disks, &pools, &collab))
        .expect("failed to spawn placement thread")
}

fn placement_loop(
    rx: Receiver<Arc<DiskTask>>,
    disks: &DiskMap,
    pools: &[DiskPool],
    collab: &Collaborators,
) {
    for task in rx.iter() {
        let placed = match task.kind() {
            TaskKind::RemoteWrite(placement) => place(&**placement, disks),
            // The router only hands remote writes to this stage.
            other => {
                debug_assert!(false, "non-remote-write kind on placement stage: {other:?}");
                Err(TaskError::UnsupportedKind { kind: other.name() })
            }
        };

        let enqueued = placed.and_then(|disk| match pools.get(disk.index()) {
            Some(pool) => pool.enqueue(&task),
            None => Err(TaskError::UnknownDisk(disk)),
        });

        if let Err(error) = enqueued {
            collab.events.emit(SchedulerEvent::PlacementFailed {
                task: task.id(),
                error: &error,
            });
            task.report_failure(&*collab.completion, error);
        }
    }
}

fn place(placement: &dyn RemotePlacement, disks: &DiskMap) -> Result<DiskId, TaskError> {
    placement.initialize()?;
    placement.choose_dir(disks)
}

// ============================================================================
// Trial-write probe
// ============================================================================

static PROBE_SEQ: AtomicU64 = AtomicU64::new(0);

/// Ready-made [`RemotePlacement`] that probes every candidate directory
/// with a small write and picks the fastest disk.
///
/// The probe file is written without any durability barrier, so the bytes
/// normally stay in the OS page cache and the probe does not contend with
/// real disk traffic. The file is removed immediately after the write.
///
/// Disks whose probe write fails simply lose the race; placement errors
/// only when every candidate fails.
pub struct ProbePlacement {
    probe_len: usize,
    // Allocated by `initialize`, reused across retries of `choose_dir`.
    payload: Mutex<Option<Vec<u8>>>,
}

impl ProbePlacement {
    /// Probe payload defaults to one 4 KiB filesystem block.
    pub const DEFAULT_PROBE_LEN: usize = 4096;

    pub fn new(probe_len: usize) -> Self {
        assert!(probe_len > 0, "probe_len must be > 0");
        ProbePlacement {
            probe_len,
            payload: Mutex::new(None),
        }
    }
}

impl Default for ProbePlacement {
    fn default() -> Self {
        Self::new(Self::DEFAULT_PROBE_LEN)
    }
}

impl RemotePlacement for ProbePlacement {
    fn initialize(&self) -> Result<(), TaskError> {
        let mut guard = self.payload.lock().expect("probe payload mutex poisoned");
        if guard.is_none() {
            *guard = Some(vec![0xA5; self.probe_len]);
        }
        Ok(())
    }

    fn choose_dir(&self, disks: &DiskMap) -> Result<DiskId, TaskError> {
        let guard = self.payload.lock().expect("probe payload mutex poisoned");
        let payload = guard.as_deref().ok_or_else(|| {
            TaskError::io(io::Error::new(
                io::ErrorKind::Other,
                "probe placement not initialized",
            ))
        })?;

        let mut best: Option<(DiskId, Duration)> = None;
        for id in disks.ids() {
            let dir = match disks.dir(id) {
                Some(dir) => dir,
                None => continue,
            };
            let elapsed = match probe_once(dir, payload) {
                Ok(elapsed) => elapsed,
                Err(_) => continue,
            };
            if best.map_or(true, |(_, fastest)| elapsed < fastest) {
                best = Some((id, elapsed));
            }
        }

        best.map(|(id, _)| id).ok_or_else(|| {
            TaskError::io(io::Error::new(
                io::ErrorKind::Other,
                "trial write failed on every disk",
            ))
        })
    }
}

/// Write `payload` to a uniquely named file in `dir`, unsynced, and remove
/// it. Returns the elapsed write time.
fn probe_once(dir: &Path, payload: &[u8]) -> io::Result<Duration> {
    let seq = PROBE_SEQ.fetch_add(1, Ordering::Relaxed);
    let path = dir.join(format!(".write-probe-{}-{seq}", std::process::id()));

    let started = Instant::now();
    let mut file = File::create(&path)?;
    file.write_all(payload)?;
    // No sync_all: the probe must not force durability.
    drop(file);
    let elapsed = started.elapsed();

    let _ = fs::remove_file(&path);
    Ok(elapsed)
}

// ============================================================================
// Tests
// ============================================================================
