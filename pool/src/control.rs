use crate::error::PoolError;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::sleep;
use std::time::Duration;

use taskloom_core::{call, Context};

/// Scheduler operations reachable through a [`PoolControl`]. Always invoked on the scheduler's
/// context.
pub(crate) trait TaskSink<T>: Send + Sync {
    fn resize(&self, size: usize);
    fn extend(&self, tasks: Vec<T>);
    fn clear(&self);
    fn snapshot(&self) -> PoolSnapshot;
}

/// Point-in-time view of the scheduler.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct PoolSnapshot {
    /// Live worker slots.
    pub size: usize,
    pub ready: usize,
    pub busy: usize,
    /// Tasks waiting for a worker.
    pub queued: usize,
}

impl PoolSnapshot {
    /// No worker is busy and no queued task can be assigned.
    pub fn is_idle(&self) -> bool {
        self.busy == 0 && (self.queued == 0 || self.size == 0)
    }
}

/// Cloneable handle for driving a pool's scheduler from any thread.
///
/// Every operation runs on the scheduler's context and returns once it has been applied. Once the
/// pool has started tearing down, operations do nothing and return `Ok`.
pub struct PoolControl<T> {
    sink: Weak<dyn TaskSink<T>>,
    context: Context,
    attached: Arc<AtomicBool>,
}

impl<T> Clone for PoolControl<T> {
    fn clone(&self) -> Self {
        PoolControl {
            sink: Weak::clone(&self.sink),
            context: self.context.clone(),
            attached: Arc::clone(&self.attached),
        }
    }
}

impl<T: Send + 'static> PoolControl<T> {
    pub(crate) fn new(sink: Weak<dyn TaskSink<T>>, context: Context) -> Self {
        PoolControl {
            sink,
            context,
            attached: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Grows or shrinks the pool to `size` workers. Tasks held by removed workers are abandoned.
    pub fn set_pool_size(&self, size: usize) -> Result<(), PoolError> {
        self.submit(move |sink| sink.resize(size)).map(drop)
    }

    /// Appends `tasks` to the queue, in order.
    pub fn extend<I>(&self, tasks: I) -> Result<(), PoolError>
    where
        I: IntoIterator<Item = T>,
    {
        let tasks: Vec<T> = tasks.into_iter().collect();
        self.submit(move |sink| sink.extend(tasks)).map(drop)
    }

    /// Drops every queued task. Tasks already handed to a worker still complete.
    pub fn clear(&self) -> Result<(), PoolError> {
        self.submit(|sink| sink.clear()).map(drop)
    }

    pub fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        Ok(self
            .submit(|sink| sink.snapshot())?
            .unwrap_or_default())
    }

    /// Blocks until no worker is busy and the queue is empty (or there are no workers to drain
    /// it).
    pub fn wait_for_idle(&self) -> Result<(), PoolError> {
        loop {
            if self.snapshot()?.is_idle() {
                return Ok(());
            }
            // Small sleep to avoid busy waiting
            sleep(Duration::from_millis(10));
        }
    }

    /// Whether operations still reach the scheduler.
    pub fn is_attached(&self) -> bool {
        self.attached.load(Ordering::Acquire)
    }

    /// Turns every clone of this handle into a no-op.
    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }

    fn submit<F, U>(&self, op: F) -> Result<Option<U>, PoolError>
    where
        F: FnOnce(&dyn TaskSink<T>) -> U + Send + 'static,
        U: Send + 'static,
    {
        if !self.is_attached() {
            return Ok(None);
        }
        let sink = Weak::clone(&self.sink);
        let out = call(&self.context, move || sink.upgrade().map(|sink| op(sink.as_ref())))?;
        Ok(out)
    }
}
