//! Pool statistics.
//!
//! Counters are updated from the scheduler and processor contexts and can be read from any thread.

use std::sync::atomic::{AtomicU64, Ordering};

/// Thread-safe counters for the life of one pool.
#[derive(Debug, Default)]
pub struct PoolStats {
    /// Tasks handed to a worker.
    pub dispatched: AtomicU64,

    /// Completions reconciled by the scheduler.
    pub completed: AtomicU64,

    /// Completions ignored because their slot was removed or reissued.
    pub stale: AtomicU64,

    /// Workers retired while not ready. A task still running on one never produces a result.
    pub abandoned: AtomicU64,

    /// Queued tasks dropped by `clear`.
    pub cleared: AtomicU64,

    pub workers_spawned: AtomicU64,

    pub workers_retired: AtomicU64,

    /// Results consumed by the processor.
    pub results: AtomicU64,
}

impl PoolStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64, by: u64) {
        counter.fetch_add(by, Ordering::Relaxed);
    }

    pub fn get_dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::Relaxed)
    }

    pub fn get_completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn get_stale(&self) -> u64 {
        self.stale.load(Ordering::Relaxed)
    }

    pub fn get_abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::Relaxed)
    }

    pub fn get_cleared(&self) -> u64 {
        self.cleared.load(Ordering::Relaxed)
    }

    pub fn get_workers_spawned(&self) -> u64 {
        self.workers_spawned.load(Ordering::Relaxed)
    }

    pub fn get_workers_retired(&self) -> u64 {
        self.workers_retired.load(Ordering::Relaxed)
    }

    pub fn get_results(&self) -> u64 {
        self.results.load(Ordering::Relaxed)
    }

    /// Prints current statistics to stdout.
    pub fn print(&self) {
        println!("Dispatched: {}", self.get_dispatched());
        println!("Completed: {}", self.get_completed());
        println!("Results: {}", self.get_results());
        println!("Stale: {}", self.get_stale());
        println!("Abandoned: {}", self.get_abandoned());
        println!("Cleared: {}", self.get_cleared());
        println!(
            "Workers: {} spawned, {} retired",
            self.get_workers_spawned(),
            self.get_workers_retired()
        );
    }
}
