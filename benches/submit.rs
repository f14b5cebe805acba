//! Submit-to-drain throughput of the disk scheduler.
//!
//! Measures the full path: router dispatch, per-disk FIFO, worker dequeue,
//! execution wrapper, completion notification. Work bodies are no-ops so
//! the numbers reflect scheduler overhead, not disk time.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use disk_sched::{
    BlockId, CompletionSink, DiskId, DiskMap, DiskScheduler, DiskTask, DiskWork, FatalHandler,
    InterruptFlag, NullSink, SchedulerConfig, TaskError, TaskId, TaskKind,
};

const TASKS: u64 = 1_000;

struct NoopWork;

impl DiskWork for NoopWork {
    fn execute(&self, _disk: DiskId, _interrupt: &InterruptFlag) -> Result<(), TaskError> {
        Ok(())
    }
}

#[derive(Default)]
struct CountingSink {
    completed: AtomicUsize,
}

impl CompletionSink for CountingSink {
    fn task_succeeded(&self, _task: &DiskTask) {
        self.completed.fetch_add(1, Ordering::Release);
    }

    fn task_failed(&self, _task: &DiskTask, _error: &TaskError) {
        self.completed.fetch_add(1, Ordering::Release);
    }
}

struct AbortFatal;

impl FatalHandler for AbortFatal {
    fn on_fatal(&self, error: &TaskError) {
        panic!("fatal error during bench: {error}");
    }
}

fn bench_submit_drain(c: &mut Criterion) {
    let mut group = c.benchmark_group("submit_drain");
    group.throughput(Throughput::Elements(TASKS));

    for &disks in &[1usize, 4] {
        group.bench_with_input(BenchmarkId::from_parameter(disks), &disks, |b, &disks| {
            let map = DiskMap::new(
                (0..disks)
                    .map(|i| PathBuf::from(format!("/mnt{i}/bench")))
                    .collect(),
            );
            let sink = Arc::new(CountingSink::default());
            let sched = DiskScheduler::new(
                map,
                SchedulerConfig { threads_per_disk: 1 },
                Arc::clone(&sink) as Arc<dyn CompletionSink>,
                Arc::new(AbortFatal),
                Arc::new(NullSink),
            );

            let mut next_id = 0u64;
            b.iter(|| {
                let before = sink.completed.load(Ordering::Acquire);
                for _ in 0..TASKS {
                    let disk = DiskId::from_raw((next_id % disks as u64) as u32);
                    sched.submit(DiskTask::new(
                        TaskId(next_id),
                        BlockId::new("bench-block"),
                        TaskKind::Read { disk },
                        Box::new(NoopWork),
                    ));
                    next_id += 1;
                }
                while sink.completed.load(Ordering::Acquire) < before + TASKS as usize {
                    std::hint::spin_loop();
                }
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_submit_drain);
criterion_main!(benches);
