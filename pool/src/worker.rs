//! Workers and the hosts that run them.
//!
//! A [`Worker`] is application code: it turns a task into a result. The pool keeps one prototype
//! and hosts a fresh clone of it in every worker slot. Each clone runs inside a [`WorkerHost`] on
//! its own context, which publishes results towards the processor and completions towards the
//! scheduler without ever waiting on either.

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use taskloom_core::{Context, Endpoint, Signal, Subscriber};

/// Executes tasks of type `T` into results of type `R`.
pub trait Worker<T, R>: Send + 'static {
    /// Runs one task to completion. May block for as long as it needs.
    fn execute(&mut self, task: T) -> R;

    /// Returns a new instance with the same configuration. Called once per slot the pool grows by.
    fn clone_worker(&self) -> Box<dyn Worker<T, R>>;
}

/// A [`Worker`] built from a cloneable closure.
///
/// ```rust
/// use taskloom_pool::{FnWorker, Worker};
///
/// let mut square = FnWorker::new(|x: u64| x * x);
/// assert_eq!(square.execute(7), 49);
/// ```
#[derive(Clone)]
pub struct FnWorker<F> {
    f: F,
}

impl<F> FnWorker<F> {
    pub fn new(f: F) -> Self {
        FnWorker { f }
    }
}

impl<T, R, F> Worker<T, R> for FnWorker<F>
where
    F: FnMut(T) -> R + Clone + Send + 'static,
    T: 'static,
    R: 'static,
{
    fn execute(&mut self, task: T) -> R {
        (self.f)(task)
    }

    fn clone_worker(&self) -> Box<dyn Worker<T, R>> {
        Box::new(self.clone())
    }
}

/* --------------------------------------------------------------------------------- */

/// Index of a worker slot in the scheduler's slot table.
#[derive(Debug, Copy, Clone, Hash, Ord, Eq, PartialEq, PartialOrd)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "slot {}", self.0)
    }
}

const UNBOUND: usize = usize::MAX;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of one worker instance. Never reused.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct InstanceToken(u64);

impl InstanceToken {
    pub(crate) fn next() -> Self {
        InstanceToken(NEXT_TOKEN.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for InstanceToken {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Completion notice posted by a worker to the scheduler.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct WorkDone {
    pub slot: SlotId,
    pub token: InstanceToken,
}

/// Runs one worker instance on its own context.
pub struct WorkerHost<T, R>
where
    R: Clone + Send + 'static,
{
    endpoint: Endpoint,
    slot: AtomicUsize,
    token: InstanceToken,
    worker: Mutex<Box<dyn Worker<T, R>>>,
    results: Signal<R>,
    done: Signal<WorkDone>,
}

impl<T, R> WorkerHost<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Hosts `worker` on `context`. The host is not bound to a slot until [`WorkerHost::bind`].
    pub(crate) fn new(worker: Box<dyn Worker<T, R>>, context: &Context) -> Self {
        WorkerHost {
            endpoint: Endpoint::new(context),
            slot: AtomicUsize::new(UNBOUND),
            token: InstanceToken::next(),
            worker: Mutex::new(worker),
            results: Signal::new(context),
            done: Signal::new(context),
        }
    }

    /// Slot this instance reports its completions for.
    pub fn slot(&self) -> SlotId {
        SlotId(self.slot.load(Ordering::Acquire))
    }

    pub(crate) fn bind(&self, slot: SlotId) {
        self.slot.store(slot.0, Ordering::Release);
    }

    pub fn token(&self) -> InstanceToken {
        self.token
    }

    /// Publishes every result this instance produces.
    pub fn results(&self) -> &Signal<R> {
        &self.results
    }

    /// Publishes a [`WorkDone`] after each result.
    pub fn done(&self) -> &Signal<WorkDone> {
        &self.done
    }

    /// Executes `task`, then publishes its result followed by the completion notice.
    pub fn receive_task(&self, task: T) {
        let result = {
            let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
            worker.execute(task)
        };
        self.results.invoke(result);
        self.done.invoke(WorkDone {
            slot: self.slot(),
            token: self.token,
        });
    }

    /// Removes every connection to and from this host.
    pub(crate) fn detach(&self) {
        self.results.disconnect_all();
        self.done.disconnect_all();
        self.endpoint.disconnect_all();
    }
}

impl<T, R> Subscriber for WorkerHost<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
