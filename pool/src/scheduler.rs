//! Task queue, worker slots and the resize protocol.
//!
//! The scheduler lives on its own context. Every operation, whether it comes from a
//! [`PoolControl`](crate::PoolControl) or from a worker's completion notice, runs there, so the
//! queue and slot table are never touched concurrently. Workers only ever hold their
//! `(slot, token)` pair; the scheduler owns them.

use crate::config::PoolConfig;
use crate::control::{PoolSnapshot, TaskSink};
use crate::processor::{Processor, ProcessorHost};
use crate::stats::PoolStats;
use crate::worker::{SlotId, WorkDone, Worker, WorkerHost};

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use taskloom_core::{
    dispatch, Context, ContextBuilder, ContextError, ContextThread, DispatchMode, Endpoint, Signal,
    Subscriber,
};

/// Connects a new worker's result signal to the processor.
type ResultWiring<R> = Box<dyn Fn(&Signal<R>) + Send + Sync>;

struct WorkerSlot<T, R>
where
    R: Clone + Send + 'static,
{
    host: Arc<WorkerHost<T, R>>,
    thread: ContextThread,
}

struct SchedulerState<T, R>
where
    R: Clone + Send + 'static,
{
    prototype: Box<dyn Worker<T, R>>,
    tasks: VecDeque<T>,
    slots: Vec<WorkerSlot<T, R>>,
    ready: BTreeSet<SlotId>,
    wiring: Option<ResultWiring<R>>,
}

pub(crate) struct Scheduler<T, R>
where
    R: Clone + Send + 'static,
{
    endpoint: Endpoint,
    this: Weak<Self>,
    config: PoolConfig,
    accepting: AtomicBool,
    state: Mutex<SchedulerState<T, R>>,
    stats: Arc<PoolStats>,
}

impl<T, R> Scheduler<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    /// Creates an empty scheduler living on `context`. Workers are only started by a later resize.
    pub(crate) fn new(
        prototype: Box<dyn Worker<T, R>>,
        context: &Context,
        config: PoolConfig,
        stats: Arc<PoolStats>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Scheduler {
            endpoint: Endpoint::new(context),
            this: Weak::clone(this),
            config,
            accepting: AtomicBool::new(true),
            state: Mutex::new(SchedulerState {
                prototype,
                tasks: VecDeque::new(),
                slots: Vec::new(),
                ready: BTreeSet::new(),
                wiring: None,
            }),
            stats,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SchedulerState<T, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Routes the results of every worker started from now on to `processor`.
    pub(crate) fn bind_processor<P>(&self, processor: &Arc<ProcessorHost<T, R, P>>)
    where
        P: Processor<T, R>,
    {
        let target = Arc::downgrade(processor);
        self.lock().wiring = Some(Box::new(move |results: &Signal<R>| {
            if let Some(processor) = target.upgrade() {
                results.connect(&processor, ProcessorHost::receive_result, DispatchMode::Queued);
            }
        }));
    }

    pub(crate) fn context(&self) -> &Context {
        self.endpoint.context()
    }

    /// Refuses growth and new tasks from now on.
    pub(crate) fn stop_accepting(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            log::debug!("Scheduler on {} stopped accepting work", self.context());
        }
    }

    fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Stops accepting work, unhooks the scheduler and its workers from the bus and retires every
    /// worker.
    pub(crate) fn shutdown(&self) {
        self.stop_accepting();
        self.endpoint.disconnect_all();
        let mut state = self.lock();
        state.wiring = None;
        self.retire(&mut state, 0);
        let dropped = state.tasks.len();
        state.tasks.clear();
        if dropped > 0 {
            log::debug!("Scheduler dropped {} queued tasks on shutdown", dropped);
        }
        log::info!("Pool scheduler shut down");
    }

    /// Slot connected to every worker's done signal.
    pub(crate) fn on_worker_done(&self, done: WorkDone) {
        let mut state = self.lock();
        let current = state.slots.get(done.slot.0).map(|slot| slot.host.token());
        if current != Some(done.token) {
            PoolStats::incr(&self.stats.stale, 1);
            log::trace!("Ignoring stale completion for {} ({})", done.slot, done.token);
            return;
        }
        PoolStats::incr(&self.stats.completed, 1);
        state.ready.insert(done.slot);
        self.dispatch_tasks(&mut state);
    }

    /// Assigns queued tasks to ready workers, lowest slot first, until either runs out.
    ///
    /// A task whose worker can no longer take it goes back to the front of the queue; that slot
    /// stays out of the ready set until it is retired.
    fn dispatch_tasks(&self, state: &mut SchedulerState<T, R>) {
        while !state.tasks.is_empty() {
            let Some(id) = state.ready.pop_first() else {
                break;
            };
            let Some(slot) = state.slots.get(id.0) else {
                continue;
            };
            let Some(task) = state.tasks.pop_front() else {
                break;
            };
            // Handed over only once the callable runs on the worker.
            let parcel = Arc::new(Mutex::new(Some(task)));
            let host = Arc::downgrade(&slot.host);
            let delivery = Arc::clone(&parcel);
            let delivered = dispatch(slot.thread.context(), DispatchMode::Queued, move || {
                let task = delivery.lock().unwrap_or_else(PoisonError::into_inner).take();
                if let (Some(host), Some(task)) = (host.upgrade(), task) {
                    host.receive_task(task);
                }
            });
            match delivered {
                Ok(()) => PoolStats::incr(&self.stats.dispatched, 1),
                Err(e) => {
                    log::warn!("Worker {} on {}: {}", id, slot.thread.context(), e);
                    let task = parcel.lock().unwrap_or_else(PoisonError::into_inner).take();
                    if let Some(task) = task {
                        state.tasks.push_front(task);
                    }
                }
            }
        }
    }

    fn spawn_worker(
        &self,
        id: SlotId,
        prototype: &dyn Worker<T, R>,
        wiring: Option<&ResultWiring<R>>,
    ) -> Result<WorkerSlot<T, R>, ContextError> {
        let mut builder = ContextBuilder::new(self.config.thread_name(&format!("worker-{}", id.0)));
        if let Some(core) = self.config.worker_core(id) {
            builder = builder.set_core(core);
        }
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.set_stack_size(stack_size);
        }
        let thread = builder.spawn()?;

        let host = Arc::new(WorkerHost::new(prototype.clone_worker(), thread.context()));
        host.bind(id);
        if let Some(wiring) = wiring {
            wiring(host.results());
        }
        if let Some(scheduler) = self.this.upgrade() {
            host.done()
                .connect(&scheduler, Scheduler::on_worker_done, DispatchMode::Queued);
        }
        PoolStats::incr(&self.stats.workers_spawned, 1);
        log::debug!("Started worker {} ({}) on {}", id, host.token(), thread.context());
        Ok(WorkerSlot { host, thread })
    }

    /// Removes every slot from `keep` onwards. Slots that are not ready lose their task, if any.
    fn retire(&self, state: &mut SchedulerState<T, R>, keep: usize) {
        if keep >= state.slots.len() {
            return;
        }
        let retired = state.slots.split_off(keep);
        for slot in &retired {
            let id = slot.host.slot();
            slot.host.detach();
            if !state.ready.remove(&id) {
                PoolStats::incr(&self.stats.abandoned, 1);
                log::debug!("Abandoning the task held by worker {}", id);
            }
            slot.thread.stop();
        }
        for slot in retired {
            let id = slot.host.slot();
            if let Err(e) = slot.thread.shutdown() {
                log::error!("Worker {}: {}", id, e);
            }
            PoolStats::incr(&self.stats.workers_retired, 1);
        }
    }
}

impl<T, R> TaskSink<T> for Scheduler<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    fn resize(&self, size: usize) {
        let mut state = self.lock();
        let current = state.slots.len();
        if size < current {
            self.retire(&mut state, size);
            log::info!("Pool resized from {} to {} workers", current, size);
            return;
        }
        if size == current {
            return;
        }
        if !self.is_accepting() {
            log::debug!("Ignoring resize to {} while shutting down", size);
            return;
        }

        let state = &mut *state;
        for id in (current..size).map(SlotId) {
            match self.spawn_worker(id, state.prototype.as_ref(), state.wiring.as_ref()) {
                Ok(slot) => {
                    state.slots.push(slot);
                    state.ready.insert(id);
                }
                Err(e) => {
                    log::error!("Failed to start worker {}: {}", id, e);
                    break;
                }
            }
        }
        log::info!("Pool resized from {} to {} workers", current, state.slots.len());
        self.dispatch_tasks(state);
    }

    fn extend(&self, tasks: Vec<T>) {
        if !self.is_accepting() {
            log::debug!("Ignoring {} tasks while shutting down", tasks.len());
            return;
        }
        let mut state = self.lock();
        state.tasks.extend(tasks);
        self.dispatch_tasks(&mut state);
    }

    fn clear(&self) {
        if !self.is_accepting() {
            return;
        }
        let mut state = self.lock();
        let cleared = state.tasks.len();
        state.tasks.clear();
        PoolStats::incr(&self.stats.cleared, cleared as u64);
        log::debug!("Cleared {} queued tasks", cleared);
    }

    fn snapshot(&self) -> PoolSnapshot {
        let state = self.lock();
        let size = state.slots.len();
        let ready = state.ready.len();
        PoolSnapshot {
            size,
            ready,
            busy: size - ready,
            queued: state.tasks.len(),
        }
    }
}

impl<T, R> Subscriber for Scheduler<T, R>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
{
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{FnWorker, Pool, PoolControl};

    use taskloom_core::call;

    struct Discard;

    impl Processor<u32, u32> for Discard {
        fn on_result(&mut self, _result: u32, _pool: &PoolControl<u32>) {}
    }

    #[test]
    fn pool_scheduler_ignores_stale_completions() {
        let pool = Pool::new(FnWorker::new(|x: u32| x), Discard, 2).unwrap();
        let scheduler = Arc::clone(pool.scheduler());
        let before = pool.control().snapshot().unwrap();
        assert_eq!(before.ready, 2);

        let live = {
            let s = Arc::clone(&scheduler);
            call(scheduler.context(), move || s.lock().slots[1].host.token()).unwrap()
        };
        let retired = {
            let s = Arc::clone(&scheduler);
            call(scheduler.context(), move || {
                s.resize(1);
                s.resize(2);
                s.lock().slots[1].host.token()
            })
            .unwrap()
        };
        assert_ne!(live, retired);

        let s = Arc::clone(&scheduler);
        call(scheduler.context(), move || {
            // Out of range.
            s.on_worker_done(WorkDone {
                slot: SlotId(7),
                token: retired,
            });
            // Reissued slot.
            s.on_worker_done(WorkDone {
                slot: SlotId(1),
                token: live,
            });
        })
        .unwrap();

        assert_eq!(pool.stats().get_stale(), 2);
        assert_eq!(pool.stats().get_completed(), 0);
        assert_eq!(pool.control().snapshot().unwrap(), before);
    }

    #[test]
    fn pool_scheduler_assigns_lowest_ready_slot() {
        let pool = Pool::new(FnWorker::new(|x: u32| x), Discard, 3).unwrap();
        let scheduler = Arc::clone(pool.scheduler());
        let s = Arc::clone(&scheduler);
        let ready = call(scheduler.context(), move || {
            let mut state = s.lock();
            // Park the workers' completions behind this callable.
            state.tasks.extend([1, 2]);
            s.dispatch_tasks(&mut state);
            state.ready.iter().copied().collect::<Vec<_>>()
        })
        .unwrap();
        assert_eq!(ready, vec![SlotId(2)]);
        pool.control().wait_for_idle().unwrap();
        assert_eq!(pool.stats().get_dispatched(), 2);
    }

    #[test]
    fn pool_scheduler_requeues_task_of_stopped_worker() {
        let pool = Pool::new(FnWorker::new(|x: u32| x), Discard, 2).unwrap();
        let scheduler = Arc::clone(pool.scheduler());
        let s = Arc::clone(&scheduler);
        let (queued, ready, dispatched) = call(scheduler.context(), move || {
            let mut state = s.lock();
            state.slots[0].thread.stop();
            state.tasks.extend([1, 2]);
            s.dispatch_tasks(&mut state);
            let queued = state.tasks.iter().copied().collect::<Vec<_>>();
            (queued, state.ready.len(), s.stats.get_dispatched())
        })
        .unwrap();
        // Task 1 bounced off slot 0 and went to slot 1; task 2 waits at the front.
        assert_eq!(queued, vec![2]);
        assert_eq!(ready, 0);
        assert_eq!(dispatched, 1);
    }

    #[test]
    fn pool_scheduler_refuses_work_after_shutdown() {
        let pool = Pool::new(FnWorker::new(|x: u32| x), Discard, 1).unwrap();
        let scheduler = Arc::clone(pool.scheduler());
        let s = Arc::clone(&scheduler);
        let snapshot = call(scheduler.context(), move || {
            s.shutdown();
            s.resize(4);
            s.extend(vec![1, 2, 3]);
            s.snapshot()
        })
        .unwrap();
        assert_eq!(snapshot, PoolSnapshot::default());
        assert_eq!(pool.stats().get_workers_retired(), 1);
    }
}
