use crate::config::{default_config, PoolConfig};
use crate::control::{PoolControl, PoolSnapshot, TaskSink};
use crate::error::PoolError;
use crate::processor::{Processor, ProcessorHost};
use crate::scheduler::Scheduler;
use crate::stats::PoolStats;
use crate::worker::Worker;

use std::sync::{Arc, Weak};

use taskloom_core::{call, ContextBuilder, ContextThread, CoreId};

/// Threads owned by a running pool besides its workers.
struct PoolThreads {
    scheduler: ContextThread,
    processor: ContextThread,
}

/// A resizable pool of workers feeding a single processor.
///
/// The pool owns three kinds of context: one scheduler, one processor and one per worker. Tasks
/// submitted through [`PoolControl`] are handed out in submission order to the lowest-numbered
/// idle worker; each result is then delivered to the processor.
///
/// Dropping the pool tears it down; see [`Pool::shutdown`].
pub struct Pool<T, R, P>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    P: Processor<T, R>,
{
    scheduler: Arc<Scheduler<T, R>>,
    processor: Arc<ProcessorHost<T, R, P>>,
    control: PoolControl<T>,
    stats: Arc<PoolStats>,
    threads: Option<PoolThreads>,
}

impl<T, R, P> Pool<T, R, P>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    P: Processor<T, R>,
{
    /// Starts a pool of `size` clones of `worker`, with the default configuration otherwise.
    pub fn new<W>(worker: W, processor: P, size: usize) -> Result<Self, PoolError>
    where
        W: Worker<T, R>,
    {
        let config = PoolConfig {
            pool_size: size,
            ..default_config()
        };
        Self::with_config(worker, processor, &config)
    }

    /// Starts a pool as described by `config`. Workers are running when this returns.
    pub fn with_config<W>(worker: W, processor: P, config: &PoolConfig) -> Result<Self, PoolError>
    where
        W: Worker<T, R>,
    {
        let scheduler_thread = spawn_context(config.thread_name("scheduler"), config.scheduler_core)?;
        let processor_thread = spawn_context(config.thread_name("processor"), config.processor_core)?;

        let stats = Arc::new(PoolStats::new());
        let scheduler = Scheduler::new(
            Box::new(worker),
            scheduler_thread.context(),
            config.clone(),
            Arc::clone(&stats),
        );
        let weak = Arc::downgrade(&scheduler);
        let sink: Weak<dyn TaskSink<T>> = weak;
        let control = PoolControl::new(sink, scheduler_thread.context().clone());
        let processor = Arc::new(ProcessorHost::new(
            processor,
            control.clone(),
            processor_thread.context(),
            Arc::clone(&stats),
        ));
        scheduler.bind_processor(&processor);

        let pool = Pool {
            scheduler,
            processor,
            control,
            stats,
            threads: Some(PoolThreads {
                scheduler: scheduler_thread,
                processor: processor_thread,
            }),
        };
        pool.control.set_pool_size(config.pool_size)?;
        log::info!(
            "Started pool {} with {} workers",
            config.name_prefix,
            config.pool_size
        );
        Ok(pool)
    }

    /// Returns a handle for driving the scheduler.
    pub fn control(&self) -> &PoolControl<T> {
        &self.control
    }

    pub fn processor(&self) -> &Arc<ProcessorHost<T, R, P>> {
        &self.processor
    }

    pub fn stats(&self) -> &Arc<PoolStats> {
        &self.stats
    }

    pub fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        self.control.snapshot()
    }

    /// Blocks until the pool is idle and every result produced so far has been processed.
    ///
    /// Work the processor queues while handling those results is waited for as well.
    pub fn wait_for_idle(&self) -> Result<(), PoolError> {
        let threads = match &self.threads {
            Some(threads) => threads,
            None => return Ok(()),
        };
        loop {
            self.control.wait_for_idle()?;
            let dispatched = self.stats.get_dispatched();
            // Results are queued on the processor before the matching completion reaches the
            // scheduler.
            call(threads.processor.context(), || ())?;
            if self.stats.get_dispatched() == dispatched && self.control.snapshot()?.is_idle() {
                return Ok(());
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn scheduler(&self) -> &Arc<Scheduler<T, R>> {
        &self.scheduler
    }

    /// Tears the pool down: stops accepting work, detaches the processor, retires every worker,
    /// then stops the processor and scheduler threads. Tasks still queued are dropped.
    pub fn shutdown(mut self) -> Result<(), PoolError> {
        self.teardown()
    }

    fn teardown(&mut self) -> Result<(), PoolError> {
        let threads = match self.threads.take() {
            Some(threads) => threads,
            None => return Ok(()),
        };
        self.scheduler.stop_accepting();
        self.processor.detach();

        let scheduler = Arc::clone(&self.scheduler);
        if let Err(e) = call(threads.scheduler.context(), move || scheduler.shutdown()) {
            log::warn!("Scheduler unreachable ({}), retiring workers from caller", e);
            self.scheduler.shutdown();
        }

        let processor = threads.processor.shutdown();
        let scheduler = threads.scheduler.shutdown();
        processor?;
        scheduler?;
        log::info!("Pool shut down");
        Ok(())
    }
}

impl<T, R, P> Drop for Pool<T, R, P>
where
    T: Send + 'static,
    R: Clone + Send + 'static,
    P: Processor<T, R>,
{
    fn drop(&mut self) {
        if let Err(e) = self.teardown() {
            log::error!("Pool teardown: {}", e);
        }
    }
}

fn spawn_context(name: String, core: Option<u32>) -> Result<ContextThread, PoolError> {
    let mut builder = ContextBuilder::new(name);
    if let Some(core) = core {
        builder = builder.set_core(CoreId(core));
    }
    Ok(builder.spawn()?)
}
