//! The single consumer of a pool's results.

use crate::control::PoolControl;
use crate::stats::PoolStats;

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use taskloom_core::{dispatch, Context, DispatchError, DispatchMode, Endpoint, Subscriber};

/// Consumes results produced by the pool's workers.
///
/// Called on the processor context, once per completed task, in completion order. The processor
/// may drive the pool through `pool`, for instance to queue follow-up tasks.
pub trait Processor<T, R>: Send + 'static {
    fn on_result(&mut self, result: R, pool: &PoolControl<T>);
}

/// Hosts the application's [`Processor`] on the processor context.
///
/// The host is a [`Subscriber`], so application signals can be connected to slots that reach the
/// processor through [`ProcessorHost::with`].
pub struct ProcessorHost<T, R, P> {
    endpoint: Endpoint,
    processor: Mutex<P>,
    control: PoolControl<T>,
    stats: Arc<PoolStats>,
    _results: PhantomData<fn(R)>,
}

impl<T, R, P> ProcessorHost<T, R, P>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Processor<T, R>,
{
    pub(crate) fn new(
        processor: P,
        control: PoolControl<T>,
        context: &Context,
        stats: Arc<PoolStats>,
    ) -> Self {
        ProcessorHost {
            endpoint: Endpoint::new(context),
            processor: Mutex::new(processor),
            control,
            stats,
            _results: PhantomData,
        }
    }

    fn lock(&self) -> MutexGuard<'_, P> {
        self.processor.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Slot connected to every worker's result signal.
    pub fn receive_result(&self, result: R) {
        PoolStats::incr(&self.stats.results, 1);
        self.lock().on_result(result, &self.control);
    }

    /// Runs `f` with exclusive access to the processor.
    pub fn with<F, U>(&self, f: F) -> U
    where
        F: FnOnce(&mut P, &PoolControl<T>) -> U,
    {
        let mut processor = self.lock();
        f(&mut processor, &self.control)
    }

    /// Runs `f` with the processor on the processor context.
    pub fn post<F>(self: &Arc<Self>, mode: DispatchMode, f: F) -> Result<(), DispatchError>
    where
        F: FnOnce(&mut P, &PoolControl<T>) + Send + 'static,
    {
        let host = Arc::clone(self);
        dispatch(self.endpoint.context(), mode, move || host.with(f))
    }

    pub fn control(&self) -> &PoolControl<T> {
        &self.control
    }

    /// Cuts the processor off from the pool: results stop arriving and [`PoolControl`] calls
    /// become no-ops.
    pub(crate) fn detach(&self) {
        self.control.detach();
        self.endpoint.disconnect_all();
    }
}

impl<T, R, P> Subscriber for ProcessorHost<T, R, P>
where
    T: Send + 'static,
    R: Send + 'static,
    P: Processor<T, R>,
{
    fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }
}
