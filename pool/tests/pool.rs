use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{bounded, Receiver};
use taskloom_core::{DispatchMode, Signal, Subscriber};
use taskloom_pool::{FnWorker, Pool, PoolControl, PoolStats, Processor, ProcessorHost, Worker};

/// Keeps every result in arrival order.
#[derive(Default)]
struct Collect(Vec<u64>);

impl Processor<u64, u64> for Collect {
    fn on_result(&mut self, result: u64, _pool: &PoolControl<u64>) {
        self.0.push(result);
    }
}

fn results<P>(pool: &Pool<u64, u64, P>) -> Vec<u64>
where
    P: Processor<u64, u64> + AsRef<[u64]>,
{
    pool.processor().with(|p, _| p.as_ref().to_vec())
}

impl AsRef<[u64]> for Collect {
    fn as_ref(&self) -> &[u64] {
        &self.0
    }
}

/// A worker that waits for the gate to close before returning its task.
fn gated(gate: Receiver<()>) -> impl Worker<u64, u64> {
    FnWorker::new(move |task: u64| {
        let _ = gate.recv();
        task
    })
}

fn wait_until(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}

#[test]
fn pool_processes_each_task_once() {
    let worker = FnWorker::new(|task: u64| {
        thread::sleep(Duration::from_millis(5 * (task % 3)));
        task * 10
    });
    let pool = Pool::new(worker, Collect::default(), 2).unwrap();
    pool.control().extend([1, 2, 3, 4]).unwrap();
    pool.wait_for_idle().unwrap();

    let mut got = results(&pool);
    got.sort_unstable();
    assert_eq!(got, vec![10, 20, 30, 40]);
    assert_eq!(pool.stats().get_dispatched(), 4);
    assert_eq!(pool.stats().get_completed(), 4);
    assert_eq!(pool.stats().get_results(), 4);
    pool.shutdown().unwrap();
}

/// Groups results by the worker thread that produced them.
#[derive(Default)]
struct ByWorker(HashMap<String, Vec<u64>>);

impl Processor<u64, (String, u64)> for ByWorker {
    fn on_result(&mut self, (worker, task): (String, u64), _pool: &PoolControl<u64>) {
        self.0.entry(worker).or_default().push(task);
    }
}

#[test]
fn pool_workers_take_tasks_in_submission_order() {
    let worker = FnWorker::new(|task: u64| {
        thread::sleep(Duration::from_millis(5 * (task % 3)));
        let name = thread::current().name().unwrap_or_default().to_owned();
        (name, task)
    });
    let pool = Pool::new(worker, ByWorker::default(), 2).unwrap();
    pool.control().extend([1, 2, 3, 4]).unwrap();
    pool.wait_for_idle().unwrap();

    let by_worker = pool.processor().with(|p, _| p.0.clone());
    let mut all: Vec<u64> = by_worker.values().flatten().copied().collect();
    all.sort_unstable();
    assert_eq!(all, vec![1, 2, 3, 4]);
    for (worker, tasks) in &by_worker {
        assert!(worker.contains("worker-"), "unexpected thread {}", worker);
        assert!(
            tasks.windows(2).all(|pair| pair[0] < pair[1]),
            "{} ran {:?} out of order",
            worker,
            tasks
        );
    }
}

#[test]
fn pool_single_worker_preserves_submission_order() {
    let pool = Pool::new(FnWorker::new(|task: u64| task), Collect::default(), 1).unwrap();
    pool.control().extend(0..50).unwrap();
    pool.wait_for_idle().unwrap();
    assert_eq!(results(&pool), (0..50).collect::<Vec<_>>());
}

#[test]
fn pool_shrink_abandons_in_flight_tasks() {
    let (gate, gate_rx) = bounded::<()>(0);
    let pool = Pool::new(gated(gate_rx), Collect::default(), 3).unwrap();
    let control = pool.control().clone();
    control.extend([1, 2, 3]).unwrap();
    wait_until("three busy workers", || control.snapshot().unwrap().busy == 3);

    // Slots 1 and 2 are retired while blocked; open the gate once both are detached.
    let stats = Arc::clone(pool.stats());
    let opener = thread::spawn(move || {
        wait_until("two abandoned tasks", || stats.get_abandoned() == 2);
        drop(gate);
    });
    control.set_pool_size(1).unwrap();
    opener.join().unwrap();
    pool.wait_for_idle().unwrap();

    let snapshot = control.snapshot().unwrap();
    assert_eq!(snapshot.size, 1);
    assert_eq!(snapshot.busy, 0);
    assert_eq!(results(&pool), vec![1]);
    assert_eq!(pool.stats().get_workers_retired(), 2);
}

#[test]
fn pool_clear_keeps_assigned_tasks() {
    let (gate, gate_rx) = bounded::<()>(0);
    let pool = Pool::new(gated(gate_rx), Collect::default(), 1).unwrap();
    let control = pool.control();
    control.extend([1, 2, 3]).unwrap();
    assert_eq!(control.snapshot().unwrap().queued, 2);

    control.clear().unwrap();
    let snapshot = control.snapshot().unwrap();
    assert_eq!((snapshot.busy, snapshot.queued), (1, 0));

    drop(gate);
    pool.wait_for_idle().unwrap();
    assert_eq!(results(&pool), vec![1]);
    assert_eq!(pool.stats().get_cleared(), 2);
}

struct Counted {
    clones: Arc<AtomicUsize>,
}

impl Worker<u64, u64> for Counted {
    fn execute(&mut self, task: u64) -> u64 {
        task + 100
    }

    fn clone_worker(&self) -> Box<dyn Worker<u64, u64>> {
        self.clones.fetch_add(1, Ordering::SeqCst);
        Box::new(Counted {
            clones: Arc::clone(&self.clones),
        })
    }
}

#[test]
fn pool_resize_to_zero_is_idempotent() {
    let clones = Arc::new(AtomicUsize::new(0));
    let worker = Counted {
        clones: Arc::clone(&clones),
    };
    let pool = Pool::new(worker, Collect::default(), 2).unwrap();
    assert_eq!(clones.load(Ordering::SeqCst), 2);

    let control = pool.control();
    control.set_pool_size(0).unwrap();
    control.set_pool_size(0).unwrap();
    assert_eq!(control.snapshot().unwrap().size, 0);
    assert_eq!(pool.stats().get_workers_retired(), 2);

    control.extend([5]).unwrap();
    assert_eq!(control.snapshot().unwrap().queued, 1);
    control.set_pool_size(1).unwrap();
    assert_eq!(clones.load(Ordering::SeqCst), 3);

    pool.wait_for_idle().unwrap();
    assert_eq!(results(&pool), vec![105]);
}

/// Queues a follow-up task for every result below the limit.
struct Chain {
    limit: u64,
    seen: Vec<u64>,
}

impl AsRef<[u64]> for Chain {
    fn as_ref(&self) -> &[u64] {
        &self.seen
    }
}

impl Processor<u64, u64> for Chain {
    fn on_result(&mut self, result: u64, pool: &PoolControl<u64>) {
        // Keeps the scheduler idle while the follow-up is still being decided.
        thread::sleep(Duration::from_millis(20));
        self.seen.push(result);
        if result < self.limit {
            pool.extend([result + 1]).unwrap();
        }
    }
}

#[test]
fn pool_processor_drives_the_queue() {
    let chain = Chain {
        limit: 5,
        seen: Vec::new(),
    };
    let pool = Pool::new(FnWorker::new(|task: u64| task), chain, 2).unwrap();
    pool.control().extend([0]).unwrap();
    pool.wait_for_idle().unwrap();
    assert_eq!(results(&pool), vec![0, 1, 2, 3, 4, 5]);
    assert!(pool.snapshot().unwrap().is_idle());
}

#[test]
fn pool_processor_host_accepts_application_slots() {
    let pool = Pool::new(FnWorker::new(|task: u64| task), Collect::default(), 1).unwrap();
    pool.control().extend([7, 8]).unwrap();
    pool.wait_for_idle().unwrap();

    fn truncate_results(host: &ProcessorHost<u64, u64, Collect>, keep: usize) {
        host.with(|collect, _| collect.0.truncate(keep));
    }

    let requests = Signal::<usize>::new(pool.processor().endpoint().context());
    requests.connect(pool.processor(), truncate_results, DispatchMode::BlockingQueued);
    assert_eq!(requests.invoke(1), 1);
    assert_eq!(results(&pool), vec![7]);

    pool.processor()
        .post(DispatchMode::BlockingQueued, |collect, _| collect.0.push(9))
        .unwrap();
    assert_eq!(results(&pool), vec![7, 9]);
}

#[test]
fn pool_control_is_inert_after_shutdown() {
    let (gate, gate_rx) = bounded::<()>(0);
    let pool = Pool::new(gated(gate_rx), Collect::default(), 2).unwrap();
    let control = pool.control().clone();
    let stats: Arc<PoolStats> = Arc::clone(pool.stats());
    control.extend(0..10).unwrap();

    let watched = Arc::clone(&stats);
    let opener = thread::spawn(move || {
        wait_until("both workers retired", || watched.get_abandoned() == 2);
        drop(gate);
    });
    pool.shutdown().unwrap();
    opener.join().unwrap();

    assert!(!control.is_attached());
    control.set_pool_size(4).unwrap();
    control.extend([1]).unwrap();
    assert_eq!(control.snapshot().unwrap(), Default::default());
    control.wait_for_idle().unwrap();
    assert_eq!(stats.get_workers_retired(), 2);
    assert_eq!(stats.get_results(), 0);
}
