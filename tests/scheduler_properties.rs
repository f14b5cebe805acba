//! End-to-end properties of the disk scheduler: placement, FIFO order,
//! exactly-once replicated claims, load accounting, concurrency bounds,
//! serialized trial-write placement, and interrupt-style shutdown.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use disk_sched::{
    BlockId, CompletionSink, DirPick, DiskId, DiskMap, DiskScheduler, DiskTask, DiskWork,
    FatalHandler, InterruptFlag, NullSink, ProbePlacement, RemotePlacement, ReplicatedWrite,
    SchedulerConfig, TaskError, TaskId, TaskKind,
};

// ============================================================================
// Test collaborators
// ============================================================================

struct FnWork<F>(F);

impl<F> DiskWork for FnWork<F>
where
    F: Fn(DiskId, &InterruptFlag) -> Result<(), TaskError> + Send + Sync,
{
    fn execute(&self, disk: DiskId, interrupt: &InterruptFlag) -> Result<(), TaskError> {
        (self.0)(disk, interrupt)
    }
}

/// Bound-driven constructor so closure signatures infer cleanly.
fn fn_work<F>(f: F) -> Box<dyn DiskWork>
where
    F: Fn(DiskId, &InterruptFlag) -> Result<(), TaskError> + Send + Sync + 'static,
{
    Box::new(FnWork(f))
}

/// One completion observation, captured at notification time so tests can
/// check that timing accumulators were already set.
#[derive(Clone, Debug)]
struct Completion {
    task: TaskId,
    succeeded: bool,
    error: Option<String>,
    disk_ns: u64,
    queue_wait_ns: u64,
}

#[derive(Default)]
struct RecordingSink {
    completions: Mutex<Vec<Completion>>,
}

impl RecordingSink {
    fn completions(&self) -> Vec<Completion> {
        self.completions.lock().unwrap().clone()
    }

    fn count(&self) -> usize {
        self.completions.lock().unwrap().len()
    }

    fn record(&self, task: &DiskTask, succeeded: bool, error: Option<String>) {
        self.completions.lock().unwrap().push(Completion {
            task: task.id(),
            succeeded,
            error,
            disk_ns: task.context().disk_ns(),
            queue_wait_ns: task.context().queue_wait_ns(),
        });
    }
}

impl CompletionSink for RecordingSink {
    fn task_succeeded(&self, task: &DiskTask) {
        self.record(task, true, None);
    }

    fn task_failed(&self, task: &DiskTask, error: &TaskError) {
        self.record(task, false, Some(error.to_string()));
    }
}

#[derive(Default)]
struct CapturingFatal {
    errors: Mutex<Vec<String>>,
}

impl FatalHandler for CapturingFatal {
    fn on_fatal(&self, error: &TaskError) {
        self.errors.lock().unwrap().push(error.to_string());
    }
}

/// Tracks how many work bodies run at once and the observed maximum.
#[derive(Default)]
struct OverlapTracker {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl OverlapTracker {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        let mut seen = self.max.load(Ordering::Relaxed);
        while now > seen {
            match self
                .max
                .compare_exchange_weak(seen, now, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => break,
                Err(actual) => seen = actual,
            }
        }
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

fn wait_until(what: &str, mut pred: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

fn fake_disks(n: usize) -> DiskMap {
    DiskMap::new(
        (0..n)
            .map(|i| PathBuf::from(format!("/mnt{i}/storage")))
            .collect(),
    )
}

fn build(
    disks: DiskMap,
    threads_per_disk: usize,
) -> (DiskScheduler, Arc<RecordingSink>, Arc<CapturingFatal>) {
    let sink = Arc::new(RecordingSink::default());
    let fatal = Arc::new(CapturingFatal::default());
    let sched = DiskScheduler::new(
        disks,
        SchedulerConfig { threads_per_disk },
        Arc::clone(&sink) as Arc<dyn CompletionSink>,
        Arc::clone(&fatal) as Arc<dyn FatalHandler>,
        Arc::new(NullSink),
    );
    (sched, sink, fatal)
}

fn pinned(id: u64, disk: DiskId, work: Box<dyn DiskWork>) -> Arc<DiskTask> {
    DiskTask::new(
        TaskId(id),
        BlockId::new(format!("block-{id}")),
        TaskKind::Read { disk },
        work,
    )
}

// ============================================================================
// Placement and ordering
// ============================================================================

#[test]
fn pinned_tasks_run_once_on_their_disk_in_fifo_order() {
    let (sched, sink, _fatal) = build(fake_disks(2), 1);
    let runs: Arc<Mutex<Vec<(u64, DiskId)>>> = Arc::new(Mutex::new(Vec::new()));

    for id in 0..10u64 {
        let disk = DiskId::from_raw((id % 2) as u32);
        let runs = Arc::clone(&runs);
        sched.submit(pinned(
            id,
            disk,
            fn_work(move |ran_on, _| {
                runs.lock().unwrap().push((id, ran_on));
                Ok(())
            }),
        ));
    }

    wait_until("all tasks to complete", || sink.count() == 10);

    let runs = runs.lock().unwrap();
    assert_eq!(runs.len(), 10);
    // Every task ran on the disk it was pinned to.
    for (id, ran_on) in runs.iter() {
        assert_eq!(ran_on.raw() as u64, id % 2, "task {id} ran on wrong disk");
    }
    // FIFO within each disk.
    for disk in 0..2u64 {
        let per_disk: Vec<u64> = runs
            .iter()
            .filter(|(_, d)| d.raw() as u64 == disk)
            .map(|(id, _)| *id)
            .collect();
        let mut sorted = per_disk.clone();
        sorted.sort_unstable();
        assert_eq!(per_disk, sorted, "disk {disk} executed out of order");
    }
    assert!(sink.completions().iter().all(|c| c.succeeded));
}

#[test]
fn replicated_write_executes_exactly_once_across_disks() {
    const DISKS: usize = 4;
    let (sched, sink, _fatal) = build(fake_disks(DISKS), 1);
    let executions = Arc::new(AtomicUsize::new(0));

    let executions2 = Arc::clone(&executions);
    let task = DiskTask::new(
        TaskId(1),
        BlockId::new("replicated"),
        TaskKind::ReplicatedWrite(ReplicatedWrite::new()),
        fn_work(move |_, _| {
            executions2.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }),
    );

    sched.submit(Arc::clone(&task));

    wait_until("claim race to settle", || {
        sched.disk_load_snapshot().values().sum::<usize>() == 0
    });

    assert_eq!(executions.load(Ordering::SeqCst), 1);
    assert_eq!(sink.count(), 1);
    assert!(sink.completions()[0].succeeded);

    // The winner recorded by the claim is where it ran, and the other
    // queue entries were discarded without running task logic.
    let winner = match task.kind() {
        TaskKind::ReplicatedWrite(claim) => claim.winner().expect("settled claim"),
        _ => unreachable!(),
    };
    assert!(winner.raw() < DISKS as u32);

    let stats: HashMap<String, _> = sched.pool_stats().into_iter().collect();
    let executed: u64 = stats.values().map(|s| s.executed).sum();
    let declined: u64 = stats.values().map(|s| s.claims_declined).sum();
    assert_eq!(executed, 1);
    assert_eq!(declined, (DISKS - 1) as u64);
}

#[test]
fn disk_resident_pick_of_unknown_disk_fails_the_task() {
    let (sched, sink, _fatal) = build(fake_disks(2), 1);

    struct BadPick;
    impl DirPick for BadPick {
        fn pick(&self, _disks: &DiskMap) -> DiskId {
            DiskId::from_raw(42)
        }
    }

    sched.submit(DiskTask::new(
        TaskId(1),
        BlockId::new("b"),
        TaskKind::DiskResident(Box::new(BadPick)),
        fn_work(|_, _| panic!("misplaced task must not execute")),
    ));

    wait_until("failure report", || sink.count() == 1);
    let completion = &sink.completions()[0];
    assert!(!completion.succeeded);
    assert!(completion
        .error
        .as_deref()
        .unwrap()
        .contains("unknown disk identifier"));

    // Scheduler is still usable.
    sched.submit(pinned(2, DiskId::from_raw(0), fn_work(|_, _| Ok(()))));
    wait_until("next task to succeed", || sink.count() == 2);
    assert!(sink.completions()[1].succeeded);
}

// ============================================================================
// Timing accounting
// ============================================================================

#[test]
fn accumulators_are_set_before_the_completion_is_observed() {
    let (sched, sink, _fatal) = build(fake_disks(1), 1);
    let disk = DiskId::from_raw(0);

    // The blocker occupies the only worker so the probe task measurably
    // waits in the queue.
    sched.submit(pinned(
        0,
        disk,
        fn_work(|_, _| {
            thread::sleep(Duration::from_millis(10));
            Ok(())
        }),
    ));
    sched.submit(pinned(
        1,
        disk,
        fn_work(|_, _| {
            thread::sleep(Duration::from_millis(3));
            Ok(())
        }),
    ));
    // A failing task gets the same accounting.
    sched.submit(pinned(
        2,
        disk,
        fn_work(|_, _| {
            thread::sleep(Duration::from_millis(3));
            Err(TaskError::io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "bad sector",
            )))
        }),
    ));

    wait_until("all completions", || sink.count() == 3);
    let completions = sink.completions();

    let probe = completions.iter().find(|c| c.task == TaskId(1)).unwrap();
    assert!(probe.succeeded);
    assert!(probe.disk_ns >= 1_000_000, "disk time not set at report time");
    assert!(
        probe.queue_wait_ns >= 1_000_000,
        "queue wait not set at report time"
    );

    let failed = completions.iter().find(|c| c.task == TaskId(2)).unwrap();
    assert!(!failed.succeeded);
    assert!(
        failed.disk_ns >= 1_000_000,
        "failed task still accumulates disk time before the report"
    );
}

// ============================================================================
// Load snapshot
// ============================================================================

#[test]
fn snapshot_counts_track_submissions_and_completions() {
    let (sched, sink, _fatal) = build(fake_disks(2), 1);
    let disk0 = DiskId::from_raw(0);
    let gate = Arc::new(AtomicUsize::new(0));

    let hold = |gate: &Arc<AtomicUsize>| {
        let gate = Arc::clone(gate);
        fn_work(move |_, interrupt| {
            while gate.load(Ordering::SeqCst) == 0 {
                interrupt.check()?;
                thread::sleep(Duration::from_millis(1));
            }
            Ok(())
        })
    };

    for id in 0..3u64 {
        sched.submit(pinned(id, disk0, hold(&gate)));
    }
    // A replicated write inflates every disk's count until claimed.
    sched.submit(DiskTask::new(
        TaskId(10),
        BlockId::new("replicated"),
        TaskKind::ReplicatedWrite(ReplicatedWrite::new()),
        hold(&gate),
    ));

    wait_until("replica on the idle disk to be claimed or queued", || {
        sched.disk_load_snapshot()["mnt1"] >= 1
    });
    let snapshot = sched.disk_load_snapshot();
    // Disk 0: three pinned tasks plus the unclaimed replica entry.
    assert_eq!(snapshot["mnt0"], 4);
    assert_eq!(snapshot["mnt1"], 1);

    gate.store(1, Ordering::SeqCst);
    wait_until("counts to drain to zero", || {
        sched.disk_load_snapshot().values().sum::<usize>() == 0
    });
    // 3 pinned + 1 replicated completion; the discarded replica entry is
    // counted down without a notification.
    assert_eq!(sink.count(), 4);
}

// ============================================================================
// Concurrency bounds
// ============================================================================

#[test]
fn per_disk_concurrency_never_exceeds_the_configured_bound() {
    const BOUND: usize = 3;
    let (sched, sink, _fatal) = build(fake_disks(1), BOUND);
    let disk = DiskId::from_raw(0);
    let tracker = Arc::new(OverlapTracker::default());

    for id in 0..32u64 {
        let tracker = Arc::clone(&tracker);
        sched.submit(pinned(
            id,
            disk,
            fn_work(move |_, _| {
                tracker.enter();
                thread::sleep(Duration::from_millis(2));
                tracker.exit();
                Ok(())
            }),
        ));
    }

    wait_until("all tasks to complete", || sink.count() == 32);
    assert!(
        tracker.max() <= BOUND,
        "observed overlap {} exceeds bound {BOUND}",
        tracker.max()
    );
}

#[test]
fn pool_actually_reaches_the_configured_parallelism() {
    const BOUND: usize = 3;
    let (sched, sink, _fatal) = build(fake_disks(1), BOUND);
    let disk = DiskId::from_raw(0);
    // Only passable if BOUND tasks run simultaneously.
    let rendezvous = Arc::new(Barrier::new(BOUND));

    for id in 0..BOUND as u64 {
        let rendezvous = Arc::clone(&rendezvous);
        sched.submit(pinned(
            id,
            disk,
            fn_work(move |_, _| {
                rendezvous.wait();
                Ok(())
            }),
        ));
    }

    wait_until("rendezvous tasks to complete", || sink.count() == BOUND);
    assert!(sink.completions().iter().all(|c| c.succeeded));
}

// ============================================================================
// Asynchronous placement
// ============================================================================

#[test]
fn remote_write_places_via_trial_write_and_executes() {
    let dirs: Vec<tempfile::TempDir> = (0..2).map(|_| tempfile::tempdir().unwrap()).collect();
    let disks = DiskMap::new(dirs.iter().map(|d| d.path().to_path_buf()).collect());
    let (sched, sink, _fatal) = build(disks, 1);

    let ran_on = Arc::new(Mutex::new(None));
    let ran_on2 = Arc::clone(&ran_on);
    sched.submit(DiskTask::new(
        TaskId(1),
        BlockId::new("remote-block"),
        TaskKind::RemoteWrite(Box::new(ProbePlacement::default())),
        fn_work(move |disk, _| {
            *ran_on2.lock().unwrap() = Some(disk);
            Ok(())
        }),
    ));

    wait_until("remote write to complete", || sink.count() == 1);
    assert!(sink.completions()[0].succeeded);
    let disk = ran_on.lock().unwrap().expect("remote write ran");
    assert!(disk.raw() < 2);
}

#[test]
fn trial_writes_are_strictly_serialized() {
    let (sched, sink, _fatal) = build(fake_disks(2), 2);
    let tracker = Arc::new(OverlapTracker::default());

    struct TrackedPlacement {
        tracker: Arc<OverlapTracker>,
    }

    impl RemotePlacement for TrackedPlacement {
        fn choose_dir(&self, disks: &DiskMap) -> Result<DiskId, TaskError> {
            self.tracker.enter();
            thread::sleep(Duration::from_millis(5));
            self.tracker.exit();
            Ok(disks.ids().next().unwrap())
        }
    }

    for id in 0..6u64 {
        sched.submit(DiskTask::new(
            TaskId(id),
            BlockId::new(format!("remote-{id}")),
            TaskKind::RemoteWrite(Box::new(TrackedPlacement {
                tracker: Arc::clone(&tracker),
            })),
            fn_work(|_, _| Ok(())),
        ));
    }

    wait_until("remote writes to complete", || sink.count() == 6);
    assert_eq!(
        tracker.max(),
        1,
        "trial-write decisions overlapped on the placement stage"
    );
}

#[test]
fn placement_errors_fail_the_task_but_not_the_stage() {
    let dir = tempfile::tempdir().unwrap();
    let disks = DiskMap::new(vec![dir.path().to_path_buf()]);
    let (sched, sink, _fatal) = build(disks, 1);

    struct FailingPlacement;
    impl RemotePlacement for FailingPlacement {
        fn initialize(&self) -> Result<(), TaskError> {
            Err(TaskError::io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "remote fetch refused",
            )))
        }

        fn choose_dir(&self, _disks: &DiskMap) -> Result<DiskId, TaskError> {
            unreachable!("initialize failed first")
        }
    }

    sched.submit(DiskTask::new(
        TaskId(1),
        BlockId::new("doomed"),
        TaskKind::RemoteWrite(Box::new(FailingPlacement)),
        fn_work(|_, _| panic!("unplaced task must not execute")),
    ));
    // The stage must survive and serve the next placement.
    sched.submit(DiskTask::new(
        TaskId(2),
        BlockId::new("fine"),
        TaskKind::RemoteWrite(Box::new(ProbePlacement::default())),
        fn_work(|_, _| Ok(())),
    ));

    wait_until("both completions", || sink.count() == 2);
    let completions = sink.completions();
    let doomed = completions.iter().find(|c| c.task == TaskId(1)).unwrap();
    assert!(!doomed.succeeded);
    assert!(doomed
        .error
        .as_deref()
        .unwrap()
        .contains("remote fetch refused"));
    let fine = completions.iter().find(|c| c.task == TaskId(2)).unwrap();
    assert!(fine.succeeded);
}

// ============================================================================
// Fatal escalation
// ============================================================================

#[test]
fn fatal_errors_reach_the_fatal_handler_and_the_failure_path() {
    let (sched, sink, fatal) = build(fake_disks(1), 1);

    sched.submit(pinned(
        1,
        DiskId::from_raw(0),
        fn_work(|_, _| Err(TaskError::Fatal(String::from("out of memory")))),
    ));

    wait_until("failure report", || sink.count() == 1);
    assert!(!sink.completions()[0].succeeded);
    let escalated = fatal.errors.lock().unwrap();
    assert_eq!(escalated.len(), 1);
    assert!(escalated[0].contains("out of memory"));
}

// ============================================================================
// Shutdown
// ============================================================================

#[test]
fn stop_interrupts_in_flight_work_and_parks_queued_tasks() {
    let (sched, sink, _fatal) = build(fake_disks(1), 1);
    let disk = DiskId::from_raw(0);
    let started = Arc::new(AtomicUsize::new(0));
    let later_ran = Arc::new(AtomicUsize::new(0));

    // In-flight task: spins until the interrupt flag is raised, then
    // surfaces the interruption like real I/O would.
    let started2 = Arc::clone(&started);
    sched.submit(pinned(
        0,
        disk,
        fn_work(move |_, interrupt| {
            started2.fetch_add(1, Ordering::SeqCst);
            loop {
                interrupt.check()?;
                thread::sleep(Duration::from_millis(1));
            }
        }),
    ));
    wait_until("in-flight task to start", || {
        started.load(Ordering::SeqCst) == 1
    });

    // Queued behind it: must never begin executing once stop() is called.
    for id in 1..5u64 {
        let later_ran = Arc::clone(&later_ran);
        sched.submit(pinned(
            id,
            disk,
            fn_work(move |_, _| {
                later_ran.fetch_add(1, Ordering::SeqCst);
                Ok(())
            }),
        ));
    }

    sched.stop();
    sched.stop(); // idempotent

    wait_until("in-flight task to surface interruption", || sink.count() >= 1);
    let completion = &sink.completions()[0];
    assert!(!completion.succeeded);
    assert!(completion
        .error
        .as_deref()
        .unwrap()
        .contains("interrupted during shutdown"));

    // Give any misbehaving worker a chance to run a queued task.
    thread::sleep(Duration::from_millis(20));
    assert_eq!(later_ran.load(Ordering::SeqCst), 0);
    assert_eq!(sink.count(), 1);
}

#[test]
fn drop_drains_the_placement_stage() {
    let dir = tempfile::tempdir().unwrap();
    let disks = DiskMap::new(vec![dir.path().to_path_buf()]);
    let (sched, _sink, _fatal) = build(disks, 1);

    struct SlowPlacement;
    impl RemotePlacement for SlowPlacement {
        fn choose_dir(&self, disks: &DiskMap) -> Result<DiskId, TaskError> {
            thread::sleep(Duration::from_millis(40));
            Ok(disks.ids().next().unwrap())
        }
    }

    sched.submit(DiskTask::new(
        TaskId(1),
        BlockId::new("slow"),
        TaskKind::RemoteWrite(Box::new(SlowPlacement)),
        fn_work(|_, _| Ok(())),
    ));

    // Dropping the scheduler joins the placement thread, so the pending
    // trial write finishes first.
    let dropped_at = Instant::now();
    drop(sched);
    assert!(dropped_at.elapsed() >= Duration::from_millis(20));
}
